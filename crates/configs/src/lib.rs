//! # configs
//!
//! Layered runtime settings for Rusty-Chat.
//!
//! Precedence, lowest first:
//! 1. built-in defaults (seeded from the legacy `PORT` / `ADMIN_KEY` variables)
//! 2. optional `rusty-chat.toml` in the working directory
//! 3. `RUSTY_CHAT__<SECTION>__<KEY>` environment variables
//!
//! A `.env` file is loaded into the process environment first when present.

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Admin key used when nothing is configured. Fine for local runs only.
pub const DEFAULT_ADMIN_KEY: &str = "dev-admin";
pub const DEFAULT_PORT: u16 = 3001;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub admin: AdminSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
    pub proxy: ProxySettings,
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct AdminSettings {
    /// Expected `x-admin-key` header value. Redacted in `Debug` output.
    pub key: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct StorageSettings {
    /// JSON file holding reports and sanctions.
    pub snapshot_path: String,
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProxySettings {
    /// Take the client IP from the first `X-Forwarded-For` entry when present.
    pub trust_forwarded_for: bool,
}

impl Settings {
    /// Loads `.env`, then the layered sources from the process environment.
    pub fn load() -> Result<Self, SettingsError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "ignoring unreadable .env file");
            }
        }
        Self::build(
            std::env::var("PORT").ok(),
            std::env::var("ADMIN_KEY").ok(),
            true,
        )
    }

    fn build(
        legacy_port: Option<String>,
        legacy_admin_key: Option<String>,
        with_sources: bool,
    ) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default(
                "server.port",
                legacy_port.unwrap_or_else(|| DEFAULT_PORT.to_string()),
            )?
            .set_default(
                "admin.key",
                legacy_admin_key.unwrap_or_else(|| DEFAULT_ADMIN_KEY.to_string()),
            )?
            .set_default("storage.snapshot_path", "data.json")?
            .set_default("log.filter", "info")?
            .set_default("log.json", false)?
            .set_default("proxy.trust_forwarded_for", true)?;

        if with_sources {
            builder = builder
                .add_source(File::with_name("rusty-chat").required(false))
                .add_source(
                    Environment::with_prefix("RUSTY_CHAT")
                        .separator("__")
                        .try_parsing(true),
                );
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
