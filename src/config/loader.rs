use super::Config;
use crate::errors::{Result, ToolError};
use std::fs;
use std::path::Path;

/// Load configuration from `path` (JSON), falling back to
/// `Config::default()` if the file does not exist. Applies `TOOLEXEC_*`
/// environment overrides for the operationally-hot knobs, then validates.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) if p.exists() => read_locked(p)?,
        _ => Config::default(),
    };

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn read_locked(path: &Path) -> Result<Config> {
    let file = fs::File::open(path)
        .map_err(|e| ToolError::Configuration(format!("failed to open {}: {e}", path.display())))?;
    file.lock_shared().map_err(|e| {
        ToolError::Configuration(format!("failed to lock {}: {e}", path.display()))
    })?;
    let content = fs::read_to_string(path)
        .map_err(|e| ToolError::Configuration(format!("failed to read {}: {e}", path.display())))?;
    // Lock released when `file` drops at end of scope.
    serde_json::from_str(&content)
        .map_err(|e| ToolError::Configuration(format!("failed to parse config JSON: {e}")))
}

/// Override the handful of operationally-hot knobs from environment
/// variables. Anything unset leaves the loaded/default value untouched.
fn apply_env_overrides(config: &mut Config) {
    if let Some(v) = env_u64("TOOLEXEC_RATE_LIMIT_GLOBAL") {
        config.rate_limit.global_limit = v;
    }
    if let Some(v) = env_usize("TOOLEXEC_BULKHEAD_GLOBAL_LIMIT") {
        config.bulkhead.global_limit = v;
    }
    if let Some(v) = env_u64("TOOLEXEC_DEFAULT_TIMEOUT_MS") {
        config.timeouts.default_ms = v;
    }
    if let Some(v) = env_bool("TOOLEXEC_CACHE_ENABLED") {
        config.cache.enabled = v;
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
