//! Ambient, typed configuration surface: no CLI
//! argument parsing, but map-file path(s), log level, and queue depth are
//! still read from the environment so the binaries in `src/bin` have
//! somewhere to get them from.

use std::env;
use std::path::PathBuf;

use log::LevelFilter;

use crate::dataflow::application::DEFAULT_QUEUE_DEPTH;

const ENV_MAP_FILES: &str = "DATAFLOW_MAP_FILES";
const ENV_QUEUE_DEPTH: &str = "DATAFLOW_QUEUE_DEPTH";
const ENV_LOG_LEVEL: &str = "RUST_LOG";

/// Everything an embedding binary needs before it can build a
/// [`crate::register::RegisterCatalogue`] and an
/// [`crate::dataflow::Application`]: where the map files live, how deep the
/// broadcast queues should be, and at what level to log.
#[derive(Debug, Clone)]
pub struct Config {
    pub map_files: Vec<PathBuf>,
    pub queue_depth: usize,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            map_files: Vec::new(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            log_level: LevelFilter::Info,
        }
    }
}

impl Config {
    /// Reads `DATAFLOW_MAP_FILES` (`:`-separated paths), `DATAFLOW_QUEUE_DEPTH`,
    /// and `RUST_LOG`, falling back to defaults for anything unset or
    /// unparsable.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(paths) = env::var(ENV_MAP_FILES) {
            config.map_files = paths
            .split(':')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();
        }

        if let Ok(depth) = env::var(ENV_QUEUE_DEPTH) {
            if let Ok(depth) = depth.parse::<usize>() {
                config.queue_depth = depth;
            }
        }

        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            if let Ok(level) = level.parse::<LevelFilter>() {
                config.log_level = level;
            }
        }

        config
    }

    /// Initialises `pretty_env_logger` at this config's level, still
    /// overridable by `RUST_LOG` at runtime.
    pub fn init_logging(&self) {
        pretty_env_logger::formatted_builder()
        .filter_level(self.log_level)
        .parse_default_env()
        .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_the_default_queue_depth() {
        let config = Config::default();
        assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert!(config.map_files.is_empty());
    }

    #[test]
    fn from_env_parses_colon_separated_map_files() {
        env::set_var(ENV_MAP_FILES, "/a/one.map:/b/two.jmap");
        env::set_var(ENV_QUEUE_DEPTH, "7");
        let config = Config::from_env();
        assert_eq!(config.map_files, vec![PathBuf::from("/a/one.map"), PathBuf::from("/b/two.jmap")]);
        assert_eq!(config.queue_depth, 7);
        env::remove_var(ENV_MAP_FILES);
        env::remove_var(ENV_QUEUE_DEPTH);
    }
}
