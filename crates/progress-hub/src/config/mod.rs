use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Configuration for the running-task aggregator
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AggregatorSettings {
    /// Category pattern the aggregator subscribes with (default: every category)
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Remove tasks not updated for this many seconds (default: never)
    #[serde(default)]
    pub stale_after_secs: Option<u64>,
    /// How often the stale-task sweep runs (default: 60)
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
}

fn default_pattern() -> String {
    "*".to_string()
}

fn default_reap_interval() -> u64 {
    60
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
            stale_after_secs: None,
            reap_interval_secs: default_reap_interval(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub aggregator: AggregatorSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with defaults
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific file
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (not tracked by git)
            .add_source(File::with_name("config/local").required(false))
            // e.g. PROGRESS_HUB__AGGREGATOR__STALE_AFTER_SECS=3600
            .add_source(
                Environment::with_prefix("PROGRESS_HUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
