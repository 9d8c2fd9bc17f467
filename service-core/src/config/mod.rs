use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every service binary.
///
/// Loaded from an optional `configuration` file and `APP__*` environment
/// variables, e.g. `APP__PORT=9000`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
