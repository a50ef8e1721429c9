//! Operator configuration
//!
//! Values come from environment variables with defaults suitable for an
//! in-cluster deployment. Reading goes through [`EnvSource`] so tests never
//! touch the process environment.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::reconcilers::mirror::MirrorNaming;

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default controller name, reported on Events
pub const DEFAULT_CONTROLLER_NAME: &str = "volume-snapshot-mirror-operator";

/// Source of raw configuration values
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment
#[derive(Clone, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Operator configuration
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,

    /// How mirrored object names are derived
    pub naming: MirrorNaming,

    /// Reporting component on published Events
    pub controller_name: String,

    /// Requeue interval after a successful mirror
    pub requeue_success: Duration,

    /// Requeue interval after a transient failure
    pub requeue_error: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            naming: MirrorNaming::PerSource,
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            requeue_success: Duration::from_secs(300),
            requeue_error: Duration::from_secs(30),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_source(&OsEnv)
    }

    /// Load configuration from an arbitrary source
    pub fn from_source(env: &dyn EnvSource) -> Result<Self> {
        let defaults = Self::default();

        let metrics_port = parse_var(env, "METRICS_PORT")?.unwrap_or(defaults.metrics_port);
        let naming = parse_var(env, "MIRROR_NAMING")?.unwrap_or(defaults.naming);
        let controller_name = env
            .get("CONTROLLER_NAME")
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.controller_name);
        let requeue_success = parse_var::<u64>(env, "REQUEUE_SUCCESS_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.requeue_success);
        let requeue_error = parse_var::<u64>(env, "REQUEUE_ERROR_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.requeue_error);

        if requeue_success.is_zero() || requeue_error.is_zero() {
            return Err(Error::config("requeue intervals must be greater than zero"));
        }

        Ok(Self {
            metrics_port,
            naming,
            controller_name,
            requeue_success,
            requeue_error,
        })
    }
}

fn parse_var<T>(env: &dyn EnvSource, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::config(format!("invalid {} '{}': {}", key, raw, e))),
    }
}
