use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

const DEFAULT_HOSTS: &[&str] = &["wjx.cn", "wjx.top", "sojump.com", "sojump.cn"];

/// Runtime settings: defaults, then `wjx_export.toml`, then `WJX_EXPORT_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub timeout_secs: u64,
    pub retries: u32,
    pub user_agent: String,
    pub allowed_hosts: Vec<String>,
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub parallel_export: bool,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name("wjx_export").required(false))
            .add_source(
                Environment::with_prefix("WJX_EXPORT")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_hosts"),
            )
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("timeout_secs", 20)?
            .set_default("retries", 2)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("allowed_hosts", DEFAULT_HOSTS.to_vec())?
            .set_default("output_dir", ".")?
            .set_default("concurrency", 4)?
            .set_default("parallel_export", true)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            retries: 2,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            allowed_hosts: DEFAULT_HOSTS.iter().map(|h| h.to_string()).collect(),
            output_dir: PathBuf::from("."),
            concurrency: 4,
            parallel_export: true,
        }
    }
}
