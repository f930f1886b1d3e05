//! Store and validator configuration.
//!
//! # Invariants
//! - Usage checks never default to ALLOW when the deadline elapses; the
//!   timeout only bounds how long a check may run before failing.

use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_USAGE_CHECK_TIMEOUT_MS: u64 = 30_000;

/// Settings applied to opened connections and allocation write paths.
///
/// Deserializes from millisecond fields so hosts can embed it in their own
/// config files:
///
/// ```json
/// { "busy_timeout_ms": 5000, "usage_check_timeout_ms": 30000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a connection waits on a locked database before failing.
    #[serde(rename = "busy_timeout_ms", with = "duration_ms")]
    pub busy_timeout: Duration,
    /// Upper bound for one usage check; `None` disables the bound.
    #[serde(rename = "usage_check_timeout_ms", with = "optional_duration_ms")]
    pub usage_check_timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            usage_check_timeout: Some(Duration::from_millis(DEFAULT_USAGE_CHECK_TIMEOUT_MS)),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::StoreConfig;
    use std::time::Duration;

    #[test]
    fn deserializes_millisecond_fields_and_defaults_missing_ones() {
        let config: StoreConfig =
            serde_json::from_str(r#"{ "usage_check_timeout_ms": 250 }"#).unwrap();
        assert_eq!(config.usage_check_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.busy_timeout, StoreConfig::default().busy_timeout);
    }

    #[test]
    fn null_usage_timeout_disables_the_bound() {
        let config: StoreConfig =
            serde_json::from_str(r#"{ "usage_check_timeout_ms": null }"#).unwrap();
        assert_eq!(config.usage_check_timeout, None);
    }
}
