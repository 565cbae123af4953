//! Service settings
//!
//! Defaults, overridden by an optional `bookmarks.toml` in the working
//! directory, overridden by `BOOKMARKS__*` environment variables
//! (`BOOKMARKS__SERVER__PORT=8080`, `BOOKMARKS__BACKEND=memory`).
//! Database, Redis and OAuth credentials are read separately by the
//! infrastructure crates.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Which backend implementation serves the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Google sign-in, Postgres and Redis
    Hosted,
    /// Everything in process; data is lost on exit
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub backend: BackendKind,
    /// Used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Account signed in by the memory backend
    pub dev_user_email: String,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000_i64)?
            .set_default("backend", "hosted")?
            .set_default("log_filter", "info")?
            .set_default("dev_user_email", "dev@localhost")?
            .add_source(File::with_name("bookmarks").required(false))
            .add_source(
                Environment::with_prefix("BOOKMARKS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
