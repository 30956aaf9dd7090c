//! Data-loss accounting: one process-wide relaxed atomic, shared by every
//! [`crate::dataflow::application::BroadcastQueue`] in the running
//! application, plus a built-in `ApplicationModule` that samples and
//! resets it once per trigger.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::dataflow::application::{RunnableModule, Sample, ShutdownHandle};
use crate::error::Result;

/// How long a trigger-wait blocks between checks of the shutdown flag.
/// Module loops otherwise only suspend on `read*()` calls;
/// this bounded poll is how that suspension is expressed without an
/// async runtime.
const TRIGGER_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

/// Counts pushes a feeder could not enqueue because a consumer's queue
/// was full. One instance is shared by
/// the whole running `Application`; cloning shares the same atomic.
#[derive(Clone, Default)]
pub struct DataLossCounter {
    count: Arc<AtomicU64>,
}

impl DataLossCounter {
    pub fn new() -> Self {
        DataLossCounter::default()
    }

    pub fn record_loss(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Reads and resets the counter atomically, as the sampler module
    /// does once per trigger.
    pub fn sample_and_reset(&self) -> u64 {
        self.count.swap(0, Ordering::Relaxed)
    }
}

/// Built-in `ApplicationModule`: one push-type trigger
/// input and two outputs, `lost_in_last_trigger` and
/// `triggers_with_data_loss`. Blocks on the trigger, reads and resets the
/// process-wide data-loss counter, updates the outputs, and writes them.
pub struct DataLossSamplerModule {
    trigger: Receiver<Sample>,
    counter: DataLossCounter,
    lost_in_last_trigger: Box<dyn FnMut(u64) -> Result<()> + Send>,
    triggers_with_data_loss: Box<dyn FnMut(u64) -> Result<()> + Send>,
    triggers_with_data_loss_count: u64,
}

impl DataLossSamplerModule {
    pub fn new(
        trigger: Receiver<Sample>,
        counter: DataLossCounter,
        lost_in_last_trigger: Box<dyn FnMut(u64) -> Result<()> + Send>,
        triggers_with_data_loss: Box<dyn FnMut(u64) -> Result<()> + Send>,
    ) -> Self {
        DataLossSamplerModule {
            trigger,
            counter,
            lost_in_last_trigger,
            triggers_with_data_loss,
            triggers_with_data_loss_count: 0,
        }
    }

    /// Runs the work of one trigger firing; factored out of `main_loop`
    /// so tests can drive it without spawning a thread.
    fn sample_once(&mut self) -> Result<u64> {
        let lost = self.counter.sample_and_reset();
        if lost > 0 {
            self.triggers_with_data_loss_count += 1;
        }
        (self.lost_in_last_trigger)(lost)?;
        (self.triggers_with_data_loss)(self.triggers_with_data_loss_count)?;
        Ok(lost)
    }
}

impl RunnableModule for DataLossSamplerModule {
    fn main_loop(&mut self, shutdown: &ShutdownHandle) -> Result<()> {
        while !shutdown.is_requested() {
            match self.trigger.recv_timeout(TRIGGER_POLL_INTERVAL) {
                Ok(_sample) => {
                    self.sample_once()?;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionNumber;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;

    fn sink(log: Arc<Mutex<Vec<u64>>>) -> Box<dyn FnMut(u64) -> Result<()> + Send> {
        Box::new(move |v| {
                log.lock().unwrap().push(v);
                Ok(())
        })
    }

    #[test]
    fn sample_and_reset_reports_the_delta_then_zeroes() {
        let counter = DataLossCounter::new();
        counter.record_loss();
        counter.record_loss();
        assert_eq!(counter.sample_and_reset(), 2);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn sampler_updates_outputs_once_per_trigger() {
        let (tx, rx) = bounded(4);
        let counter = DataLossCounter::new();
        let lost_log = Arc::new(Mutex::new(Vec::new()));
        let triggers_log = Arc::new(Mutex::new(Vec::new()));
        let mut module = DataLossSamplerModule::new(
            rx,
            counter.clone(),
            sink(lost_log.clone()),
            sink(triggers_log.clone()),
        );

        counter.record_loss();
        counter.record_loss();
        counter.record_loss();
        tx.send(Sample { version: VersionNumber::new(), values: vec![] }).unwrap();
        module.sample_once().unwrap();

        tx.send(Sample { version: VersionNumber::new(), values: vec![] }).unwrap();
        module.sample_once().unwrap();

        assert_eq!(*lost_log.lock().unwrap(), vec![3, 0]);
        assert_eq!(*triggers_log.lock().unwrap(), vec![1, 1]);
    }
}
