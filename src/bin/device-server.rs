//! Runtime entry point: loads configuration, parses the
//! configured map files into register catalogues, assembles an
//! application wired with the built-in data-loss sampler, freezes it and
//! runs its module threads until interrupted.

use std::time::Duration;

use dataflow_core::config::Config;
use dataflow_core::dataflow::{Application, DataLossSamplerModule, RunnableModule, Sample, ShutdownHandle};
use dataflow_core::error::Result;
use dataflow_core::register::parser::parse_map_file;
use dataflow_core::version::VersionNumber;
use log::{debug, info, warn};

/// Publishes a trigger sample on a fixed cadence. Stands in for whatever
/// interrupt or timer source an embedding application would attach as
/// the sampler's trigger feeder.
struct HeartbeatModule {
    period: Duration,
    publish: crossbeam_channel::Sender<Sample>,
}

impl RunnableModule for HeartbeatModule {
    fn main_loop(&mut self, shutdown: &ShutdownHandle) -> Result<()> {
        while !shutdown.is_requested() {
            std::thread::sleep(self.period);
            if self.publish.send(Sample { version: VersionNumber::new(), values: vec![] }).is_err() {
                break;
            }
        }
        Ok(())
    }
}

fn main() {
    let config = Config::from_env();
    config.init_logging();

    for path in &config.map_files {
        match parse_map_file(path) {
            Ok(catalogue) => info!("loaded {} registers from {}", catalogue.len(), path.display()),
            Err(e) => warn!("failed to parse map file {}: {e}", path.display()),
        }
    }

    let mut app = Application::new("DeviceServer").with_queue_depth(config.queue_depth);
    let root = app.root();
    let sampler_group = app.add_module_group(root, "dataLossSampler");

    let (trigger_tx, trigger_rx) = crossbeam_channel::bounded::<Sample>(1);
    let sampler = DataLossSamplerModule::new(
        trigger_rx,
        app.data_loss_counter(),
        Box::new(|lost| {
                debug!("lost_in_last_trigger = {lost}");
                Ok(())
        }),
        Box::new(|count| {
                debug!("triggers_with_data_loss = {count}");
                Ok(())
        }),
    );
    app.add_application_module(sampler_group, "sampler", Box::new(sampler));
    app.add_application_module(
        sampler_group,
        "heartbeat",
        Box::new(HeartbeatModule { period: Duration::from_secs(1), publish: trigger_tx }),
    );

    if let Err(e) = app.freeze() {
        warn!("failed to freeze application: {e}");
        std::process::exit(1);
    }
    info!("running with {} networks", app.dump().lines().filter(|l| l.starts_with("network")).count());

    if let Err(e) = app.run() {
        warn!("application exited with error: {e}");
        std::process::exit(1);
    }
}
