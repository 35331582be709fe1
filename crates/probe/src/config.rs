//! Target descriptor loaded from the environment
//!
//! # Environment Variables
//!
//! - `MIGRA_TARGET_HOST` (required), `MIGRA_TARGET_PORT` (default: 3306)
//! - `MIGRA_TARGET_USER` (default: root), `MIGRA_TARGET_PASSWORD`
//! - `MIGRA_TARGET_DATABASE`
//! - `MIGRA_TARGET_CONNECT_TIMEOUT_SECS` (default: 10)
//! - `MIGRA_TARGET_SESSION`: session variables as `name=value;name=value`

use anyhow::{anyhow, bail, Context, Result};
use migra_core::domain::TargetConfig;
use std::collections::BTreeMap;

const DEFAULT_USER: &str = "root";

pub fn target_from_env() -> Result<TargetConfig> {
    target_from_lookup(|key| std::env::var(key).ok())
}

/// Build the descriptor from any key lookup
pub fn target_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<TargetConfig> {
    let host = lookup("MIGRA_TARGET_HOST")
        .filter(|h| !h.is_empty())
        .ok_or_else(|| anyhow!("MIGRA_TARGET_HOST is not set"))?;
    let user = lookup("MIGRA_TARGET_USER").unwrap_or_else(|| DEFAULT_USER.to_string());

    let mut target = TargetConfig::new(host, user);
    if let Some(port) = lookup("MIGRA_TARGET_PORT") {
        target.port = port
            .parse()
            .with_context(|| format!("invalid MIGRA_TARGET_PORT: {}", port))?;
    }
    if let Some(password) = lookup("MIGRA_TARGET_PASSWORD") {
        target.password = password;
    }
    target.database = lookup("MIGRA_TARGET_DATABASE").filter(|d| !d.is_empty());
    if let Some(secs) = lookup("MIGRA_TARGET_CONNECT_TIMEOUT_SECS") {
        target.connect_timeout_secs = secs
            .parse()
            .with_context(|| format!("invalid MIGRA_TARGET_CONNECT_TIMEOUT_SECS: {}", secs))?;
    }
    if let Some(session) = lookup("MIGRA_TARGET_SESSION") {
        target.session = parse_session(&session)?;
    }

    target.validate().map_err(|e| anyhow!(e))?;
    Ok(target)
}

/// Parse `name=value;name=value`; empty segments are ignored
pub fn parse_session(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("session variable without value: {}", pair);
        };
        vars.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(vars)
}
