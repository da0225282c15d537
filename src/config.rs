//! Host configuration, read from the environment at startup
//! (`spec.md` §6's `REEVALUATION_RECORDS_DIR` convention generalized to the
//! rest of what a deployment needs to pick before it starts accepting
//! connections).

use std::env;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_IDLE_LAND_TIMEOUT_SECS: u64 = 300;

/// Everything a `statetree`-based host binary reads once, at process start.
/// Fields are public and the struct is cheap to construct by hand in tests
/// — `from_env` is a convenience, not the only way to build one.
pub struct HostConfig {
    pub bind_addr: String,
    /// Directory reevaluation logs are written under. `None` means
    /// recording is disabled — matches the recorder factory's own
    /// `|_| None` default in `StateTreeServer`.
    pub reevaluation_records_dir: Option<String>,
    /// How long a Land may sit with zero joined sessions before a reaper
    /// sweep is allowed to tear it down.
    pub idle_land_timeout: Duration,
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("STATETREE_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            reevaluation_records_dir: env::var("REEVALUATION_RECORDS_DIR").ok(),
            idle_land_timeout: env::var("STATETREE_IDLE_LAND_TIMEOUT_SECS")
                .ok()
                .and_then(|raw| raw.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(DEFAULT_IDLE_LAND_TIMEOUT_SECS)),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            reevaluation_records_dir: None,
            idle_land_timeout: Duration::from_secs(DEFAULT_IDLE_LAND_TIMEOUT_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_fallbacks() {
        let config = HostConfig::default();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert!(config.reevaluation_records_dir.is_none());
        assert_eq!(config.idle_land_timeout, Duration::from_secs(DEFAULT_IDLE_LAND_TIMEOUT_SECS));
    }
}
