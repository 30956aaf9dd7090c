//! Network materialization: turns a resolved `Device`/`ControlSystem`
//! node into a running thread that drives reads/writes against the
//! register catalogue or the control-system adapter, publishing into (or
//! draining from) the `BroadcastQueue` the network's consumers share.
//!
//! `Application::freeze` only synthesizes missing constant feeders and
//! validates the graph; it does not itself walk the node arena to spawn
//! these threads, because resolving a `Device` node into a concrete,
//! correctly-typed accessor needs the embedding application's device
//! registry and its `defineConnections()`-time choice of word offset and
//! length. The building blocks here are what an embedding application's
//! setup code (see `src/bin/device-server.rs`) composes per network, the
//! same way it already composes the data-loss sampler's trigger feed.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::accessor::{RegisterAccessor, ScalarAccessor};
use crate::backend::DeviceBackend;
use crate::control_system::ControlSystemAdapter;
use crate::dataflow::application::{BroadcastQueue, RunnableModule, Sample, ShutdownHandle};
use crate::error::{CoreError, Result};
use crate::register::catalogue::RegisterCatalogue;
use crate::user_type::UserTypeTag;
use crate::version::VersionNumber;

/// One named hardware device: its frozen register catalogue and the
/// backend transport that serves it. `Device` nodes name a device by
/// this alias plus a register path within its catalogue.
#[derive(Clone)]
pub struct DeviceHandle {
    pub catalogue: Arc<RegisterCatalogue>,
    pub backend: Arc<dyn DeviceBackend>,
}

/// Looked up by the `deviceAlias` a `Device` node carries, so an
/// application with several backends (e.g. two PCIe boards) can resolve
/// each node against the right one.
#[derive(Default, Clone)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceHandle>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    pub fn register(&mut self, alias: impl Into<String>, handle: DeviceHandle) {
        self.devices.insert(alias.into(), handle);
    }

    pub fn get(&self, alias: &str) -> Result<DeviceHandle> {
        self.devices
        .get(alias)
        .cloned()
        .ok_or_else(|| CoreError::logic(format!("unknown device alias '{alias}'")))
    }
}

/// Drives a `Device` feeder backed by a [`ScalarAccessor`]: either a
/// continuously-blocking read loop (a push/interrupt-backed register,
/// where `backend.read` itself blocks until new data arrives) or, when
/// `trigger` is set, one read per trigger firing (`TriggerType::External`).
/// Muxed (2-D) device feeders are wired the same way by an embedding
/// application, reading through [`crate::accessor::MuxedAccessor`]
/// instead; this module only covers the scalar shape.
pub struct DeviceFeederModule {
    accessor: ScalarAccessor,
    queue: BroadcastQueue,
    trigger: Option<Receiver<Sample>>,
}

impl DeviceFeederModule {
    pub fn new(accessor: ScalarAccessor, queue: BroadcastQueue, trigger: Option<Receiver<Sample>>) -> Self {
        DeviceFeederModule { accessor, queue, trigger }
    }

    fn read_and_publish(&mut self) -> Result<()> {
        self.accessor.read()?;
        let values = (0..self.accessor.len()).map(|i| self.accessor.get(i).clone()).collect();
        self.queue.publish(Sample { version: self.accessor.version_number(), values });
        Ok(())
    }
}

impl RunnableModule for DeviceFeederModule {
    fn main_loop(&mut self, shutdown: &ShutdownHandle) -> Result<()> {
        const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);
        match self.trigger.take() {
            Some(trigger) => {
                while !shutdown.is_requested() {
                    match trigger.recv_timeout(POLL_INTERVAL) {
                        Ok(_) => self.read_and_publish()?,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
            None => {
                while !shutdown.is_requested() {
                    self.read_and_publish()?;
                }
            }
        }
        Ok(())
    }
}

/// A poll feeder with exactly one poll-mode consumer performs one read
/// per consumer call, not on a background thread (`TriggerType::PollingConsumer`).
/// This is the synchronous counterpart to [`DeviceFeederModule`]: the
/// owning `ApplicationModule`'s own `main_loop` calls `poll_once` at the
/// point it would otherwise block on a queue receive.
pub struct PolledDeviceSource<T> {
    accessor: Box<dyn RegisterAccessor + Send>,
    extract: Box<dyn Fn(&dyn RegisterAccessor) -> T + Send>,
}

impl<T> PolledDeviceSource<T> {
    pub fn new(
        accessor: Box<dyn RegisterAccessor + Send>,
        extract: Box<dyn Fn(&dyn RegisterAccessor) -> T + Send>,
    ) -> Self {
        PolledDeviceSource { accessor, extract }
    }

    pub fn poll_once(&mut self) -> Result<(VersionNumber, T)> {
        self.accessor.read()?;
        let value = (self.extract)(self.accessor.as_ref());
        Ok((self.accessor.version_number(), value))
    }
}

/// Drains a feeder's `BroadcastQueue` receiver and pushes every sample
/// into the control-system adapter under `public_name`: the common
/// "application/device feeds, control system exports" wiring.
pub struct ControlSystemSinkModule {
    receiver: Receiver<Sample>,
    adapter: Arc<dyn ControlSystemAdapter>,
    public_name: String,
}

impl ControlSystemSinkModule {
    pub fn new(receiver: Receiver<Sample>, adapter: Arc<dyn ControlSystemAdapter>, public_name: impl Into<String>) -> Self {
        ControlSystemSinkModule { receiver, adapter, public_name: public_name.into() }
    }
}

impl RunnableModule for ControlSystemSinkModule {
    fn main_loop(&mut self, shutdown: &ShutdownHandle) -> Result<()> {
        const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);
        while !shutdown.is_requested() {
            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(sample) => self.adapter.set(&self.public_name, sample)?,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }
}

/// Registers `public_name` with the control-system adapter up front, at
/// freeze time, the way `Application::freeze` chooses a concrete
/// implementation for every node before any module thread starts.
pub fn register_control_system_variable(
    adapter: &dyn ControlSystemAdapter,
    public_name: &str,
    value_type: UserTypeTag,
    n_elements: usize,
) -> Result<()> {
    if n_elements <= 1 {
        adapter.create_process_scalar(public_name, value_type)
    } else {
        adapter.create_process_array(public_name, value_type, n_elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::ScalarAccessor;
    use crate::backend::InMemoryBackend;
    use crate::register::info::{AccessMode, ChannelInfo, DataType, RegisterInfo};
    use crate::user_type::UserTypeTag;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Counts reads so the trigger-fan-out scenario can assert exactly
    /// three device reads happened for three trigger firings.
    struct CountingBackend {
        inner: InMemoryBackend,
        reads: AtomicU64,
    }

    impl CountingBackend {
        fn new() -> Self {
            CountingBackend { inner: InMemoryBackend::new(1, 4096), reads: AtomicU64::new(0) }
        }
    }

    impl DeviceBackend for CountingBackend {
        fn read(&self, bar: u64, address: u64, out: &mut [u8]) -> Result<()> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(bar, address, out)
        }
        fn write(&self, bar: u64, address: u64, data: &[u8]) -> Result<()> {
            self.inner.write(bar, address, data)
        }
        fn unaligned_access_lock(&self) -> &std::sync::Mutex<()> {
            self.inner.unaligned_access_lock()
        }
    }

    fn device_register() -> RegisterInfo {
        RegisterInfo {
            path: "/APP/D".to_string(),
            n_elements: 1,
            element_pitch_bits: 32,
            bar: 0,
            address: 0,
            access: AccessMode::ReadOnly,
            interrupt_id: vec![],
            channels: vec![ChannelInfo {
                    bit_offset: 0,
                    data_type: DataType::FixedPoint,
                    width: 32,
                    n_fractional_bits: 0,
                    signed: true,
                    raw_type: 32,
            }],
            double_buffer: None,
        }
    }

    #[test]
    fn trigger_fan_out_reads_device_once_per_firing_and_shares_versions() {
        let backend = Arc::new(CountingBackend::new());
        let accessor = ScalarAccessor::new(
            backend.clone(),
            device_register(),
            UserTypeTag::Int32,
            false,
            0,
            1,
            None,
        )
        .unwrap();

        let (queue, receivers) = BroadcastQueue::new(2, 8, crate::dataflow::data_loss::DataLossCounter::new());
        let (trigger_tx, trigger_rx) = crossbeam_channel::bounded::<Sample>(4);
        let mut module = DeviceFeederModule::new(accessor, queue, Some(trigger_rx));
        let shutdown = ShutdownHandle::for_test();

        for _ in 0..3 {
            trigger_tx.send(Sample { version: VersionNumber::new(), values: vec![] }).unwrap();
        }
        drop(trigger_tx);
        module.main_loop(&shutdown).unwrap();

        assert_eq!(backend.reads.load(Ordering::SeqCst), 3);
        let versions_a: Vec<u64> = receivers[0].try_iter().map(|s| s.version.value()).collect();
        let versions_b: Vec<u64> = receivers[1].try_iter().map(|s| s.version.value()).collect();
        assert_eq!(versions_a.len(), 3);
        assert_eq!(versions_a, versions_b);
    }
}
