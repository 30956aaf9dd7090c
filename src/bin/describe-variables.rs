//! Build-time entry point: assembles the same variable
//! network graph `device-server` would run, freezes it without spawning
//! any module threads, and prints every control-system-visible variable
//! as one JSON object per line.

use dataflow_core::config::Config;
use dataflow_core::dataflow::{Application, NodeData, RunnableModule, ShutdownHandle, UpdateMode};
use dataflow_core::error::Result;
use dataflow_core::register::parser::parse_map_file;
use dataflow_core::user_type::UserTypeTag;
use log::{info, warn};

/// Never actually run: this binary only freezes the graph to read off
/// variable descriptions, it never calls `Application::run`.
struct NoopModule;

impl RunnableModule for NoopModule {
    fn main_loop(&mut self, _shutdown: &ShutdownHandle) -> Result<()> {
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
    let sampler_group = app.add_application_module(root, "dataLossSampler", Box::new(NoopModule));

    for (accessor_key, public_name) in [
        ("lost_in_last_trigger", "dataLossSampler/lostInLastTrigger"),
        ("triggers_with_data_loss", "dataLossSampler/triggersWithDataLoss"),
    ] {
        let source = app.make_node(
            NodeData::application(sampler_group, accessor_key)
            .with_update_mode(UpdateMode::Push)
            .with_value_type(UserTypeTag::UInt64),
        );
        let sink = app.make_node(NodeData::control_system(public_name));
        if let Err(e) = source.connect(&sink) {
            warn!("failed to wire {public_name}: {e}");
            std::process::exit(1);
        }
    }

    if let Err(e) = app.freeze() {
        warn!("failed to freeze application: {e}");
        std::process::exit(1);
    }

    for variable in app.control_system_variables() {
        match serde_json::to_string(&variable) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("failed to serialise {}: {e}", variable.public_name),
        }
    }
}
