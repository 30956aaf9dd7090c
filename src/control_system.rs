//! Control-system adapter contract: the seam
//! through which `ControlSystem`-kind nodes are exported to (or fed by)
//! whatever external control system the deployment uses. Mirrors the
//! `DeviceBackend` trait's shape — a narrow, synchronous contract an
//! application wires at freeze time, with an in-memory test double
//! standing in for the real adapter in unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::dataflow::application::Sample;
use crate::error::{CoreError, Result};
use crate::user_type::UserTypeTag;

/// Implemented once per control-system integration (EPICS, DOOCS, a
/// REST facade, ...). `create_process_scalar`/`create_process_array`
/// register a named variable before any `set`/`get` call is legal, one
/// call per `ControlSystem` node at `Application::freeze` time.
pub trait ControlSystemAdapter: Send + Sync {
    fn create_process_scalar(&self, public_name: &str, value_type: UserTypeTag) -> Result<()>;
    fn create_process_array(&self, public_name: &str, value_type: UserTypeTag, n_elements: usize) -> Result<()>;

    /// Application module pushes a feeder sample out to the control
    /// system.
    fn set(&self, public_name: &str, sample: Sample) -> Result<()>;
    /// Application module polls the latest value the control system
    /// holds for `public_name`.
    fn get(&self, public_name: &str) -> Result<Option<Sample>>;
}

struct Registration {
    value_type: UserTypeTag,
    n_elements: usize,
    current: Option<Sample>,
}

/// Test double recording every registered variable and its last value
/// in memory, analogous to [`crate::backend::InMemoryBackend`] on the
/// register side.
#[derive(Default)]
pub struct ChannelControlSystemAdapter {
    registrations: Mutex<HashMap<String, Registration>>,
}

impl ChannelControlSystemAdapter {
    pub fn new() -> Self {
        ChannelControlSystemAdapter::default()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.registrations.lock().unwrap().keys().cloned().collect()
    }
}

impl ControlSystemAdapter for ChannelControlSystemAdapter {
    fn create_process_scalar(&self, public_name: &str, value_type: UserTypeTag) -> Result<()> {
        self.create_process_array(public_name, value_type, 1)
    }

    fn create_process_array(&self, public_name: &str, value_type: UserTypeTag, n_elements: usize) -> Result<()> {
        let mut registrations = self.registrations.lock().unwrap();
        if registrations.contains_key(public_name) {
            return Err(CoreError::logic(format!(
                        "control-system variable {public_name} already registered"
            )));
        }
        registrations.insert(
            public_name.to_string(),
            Registration { value_type, n_elements, current: None },
        );
        Ok(())
    }

    fn set(&self, public_name: &str, sample: Sample) -> Result<()> {
        let mut registrations = self.registrations.lock().unwrap();
        let registration = registrations
        .get_mut(public_name)
        .ok_or_else(|| CoreError::logic(format!("control-system variable {public_name} not registered")))?;
        if sample.values.len() != registration.n_elements {
            return Err(CoreError::logic(format!(
                        "control-system variable {public_name} expects {} elements, got {}",
                        registration.n_elements,
                        sample.values.len()
            )));
        }
        registration.current = Some(sample);
        Ok(())
    }

    fn get(&self, public_name: &str) -> Result<Option<Sample>> {
        let registrations = self.registrations.lock().unwrap();
        let registration = registrations
        .get(public_name)
        .ok_or_else(|| CoreError::logic(format!("control-system variable {public_name} not registered")))?;
        Ok(registration.current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionNumber;

    #[test]
    fn set_before_registration_is_rejected() {
        let adapter = ChannelControlSystemAdapter::new();
        let sample = Sample { version: VersionNumber::new(), values: vec![] };
        assert!(adapter.set("/Foo", sample).is_err());
    }

    #[test]
    fn round_trips_a_registered_scalar() {
        let adapter = ChannelControlSystemAdapter::new();
        adapter.create_process_scalar("/Foo", UserTypeTag::Float64).unwrap();
        let sample = Sample {
            version: VersionNumber::new(),
            values: vec![crate::user_type::UserValue::Float64(3.5)],
        };
        adapter.set("/Foo", sample).unwrap();
        let got = adapter.get("/Foo").unwrap().unwrap();
        assert_eq!(got.values, vec![crate::user_type::UserValue::Float64(3.5)]);
    }
}
