use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "firmware_crawler.toml";

/// Runtime settings: defaults, then an optional TOML file, then `FWC_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// SQLite file holding crawled records
    pub db_path: PathBuf,
    /// Site root that relative links are resolved against
    pub base_url: Option<String>,
    /// Where downloaded assets land
    pub download_dir: PathBuf,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("db_path", "data/firmware.sqlite")?
            .set_default("download_dir", "downloads")?
            .set_default(
                "user_agent",
                concat!("firmware_crawler/", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("timeout_secs", 300)?
            .set_default("connect_timeout_secs", 15)?;

        builder = match file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder
            .add_source(Environment::with_prefix("FWC"))
            .build()
            .context("Failed to load settings")?
            .try_deserialize()
            .context("Invalid settings")
    }
}
