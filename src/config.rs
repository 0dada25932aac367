//! Operator configuration from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `WATCH_NAMESPACE` | unset (cluster-wide) | Restrict the controller to one namespace |
//! | `POD_NAME` | hostname | Leader election identity and event reporter instance |
//! | `POD_NAMESPACE` | `default` | Namespace holding the leader election lease |
//! | `RECONCILE_TIMEOUT_SECS` | 30 | Deadline of a single reconciliation pass |
//! | `STATUS_UPDATE_RETRIES` | 3 | Status write attempts per pass before requeueing |
//! | `MAX_CONCURRENT_RECONCILES` | 4 | Clusters reconciled in parallel |
//! | `RESYNC_INTERVAL_SECS` | 300 | Periodic requeue of settled clusters |
//! | `HEALTH_PORT` | 8080 | Port of the health and metrics server |

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STATUS_UPDATE_RETRIES: u32 = 3;
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 4;
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// `None` watches every namespace.
    pub watch_namespace: Option<String>,
    pub pod_name: Option<String>,
    pub pod_namespace: String,
    pub reconcile_timeout: Duration,
    pub status_update_retries: u32,
    pub max_concurrent_reconciles: u16,
    pub resync_interval: Duration,
    pub health_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            pod_name: None,
            pod_namespace: "default".to_string(),
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
            status_update_retries: DEFAULT_STATUS_UPDATE_RETRIES,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

impl OperatorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary lookup. Empty values count as unset; malformed
    /// numbers fall back to the default with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        // Zero retries would never write status; zero timeout would never finish.
        let status_update_retries =
            parse_or(&get, "STATUS_UPDATE_RETRIES", defaults.status_update_retries).max(1);
        let max_concurrent_reconciles = parse_or(
            &get,
            "MAX_CONCURRENT_RECONCILES",
            defaults.max_concurrent_reconciles,
        );
        let timeout_secs = parse_or(
            &get,
            "RECONCILE_TIMEOUT_SECS",
            DEFAULT_RECONCILE_TIMEOUT_SECS,
        )
        .max(1);
        let resync_secs = parse_or(&get, "RESYNC_INTERVAL_SECS", DEFAULT_RESYNC_INTERVAL_SECS).max(1);

        Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            pod_name: get("POD_NAME"),
            pod_namespace: get("POD_NAMESPACE").unwrap_or(defaults.pod_namespace),
            reconcile_timeout: Duration::from_secs(timeout_secs),
            status_update_retries,
            max_concurrent_reconciles,
            resync_interval: Duration::from_secs(resync_secs),
            health_port: parse_or(&get, "HEALTH_PORT", defaults.health_port),
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
    }
}
