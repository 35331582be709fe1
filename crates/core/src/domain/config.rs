// Target database descriptor

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3306;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection descriptor for the downstream (target) database
///
/// `session` variables are applied with `SET SESSION` on every new
/// underlying connection, so a reset connection behaves like the original.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub user: String,

    #[serde(default, skip_serializing)]
    pub password: String,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub session: BTreeMap<String, String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl TargetConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: String::new(),
            database: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            session: BTreeMap::new(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Check the descriptor before any connection attempt
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("target host cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("target port cannot be 0".to_string());
        }
        if let Some(name) = self.session.keys().find(|k| !is_identifier(k)) {
            return Err(format!("invalid session variable name: {:?}", name));
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with('.')
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("session", &self.session)
            .finish()
    }
}
