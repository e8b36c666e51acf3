//! Operator configuration
//!
//! All settings come from environment variables so the operator can be
//! configured from its Deployment manifest.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

const DEFAULT_BACKOFF_BASE_SECS: u64 = 5;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Runtime configuration for the operator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Port for the metrics and health server
    pub metrics_port: u16,

    /// Restrict the controller to a single namespace
    pub watch_namespace: Option<String>,

    /// Requeue interval after a successful reconciliation
    pub resync_interval: Option<Duration>,

    /// Delay before the first retry of a failed reconciliation
    pub error_backoff_base: Duration,

    /// Upper bound for the retry delay
    pub error_backoff_max: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            watch_namespace: None,
            resync_interval: None,
            error_backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            error_backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let metrics_port = match non_empty(lookup("METRICS_PORT")) {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| Error::config(format!("Invalid METRICS_PORT '{}': {}", raw, e)))?,
            None => defaults.metrics_port,
        };

        let resync_interval = non_empty(lookup("RESYNC_INTERVAL_SECS"))
            .map(|raw| parse_secs("RESYNC_INTERVAL_SECS", &raw))
            .transpose()?;

        let error_backoff_base = non_empty(lookup("ERROR_BACKOFF_BASE_SECS"))
            .map(|raw| parse_secs("ERROR_BACKOFF_BASE_SECS", &raw))
            .transpose()?
            .unwrap_or(defaults.error_backoff_base);

        let error_backoff_max = non_empty(lookup("ERROR_BACKOFF_MAX_SECS"))
            .map(|raw| parse_secs("ERROR_BACKOFF_MAX_SECS", &raw))
            .transpose()?
            .unwrap_or(defaults.error_backoff_max);

        if error_backoff_base > error_backoff_max {
            return Err(Error::config(
                "ERROR_BACKOFF_BASE_SECS must not exceed ERROR_BACKOFF_MAX_SECS",
            ));
        }

        Ok(Self {
            metrics_port,
            watch_namespace: non_empty(lookup("WATCH_NAMESPACE")),
            resync_interval,
            error_backoff_base,
            error_backoff_max,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration> {
    let secs = raw
        .parse::<u64>()
        .map_err(|e| Error::config(format!("Invalid {} '{}': {}", key, raw, e)))?;
    if secs == 0 {
        return Err(Error::config(format!("{} must be greater than zero", key)));
    }
    Ok(Duration::from_secs(secs))
}
