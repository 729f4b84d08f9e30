//! Pipeline tuning loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use datalabel_core::worker_pool::{
    DEFAULT_COOLDOWN_SECS, DEFAULT_PROBE_TIMEOUT_SECS, HEALTH_CHECK_INTERVAL_SECS,
};

/// Concurrency, retry and health settings for the generation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long a failed worker stays out of rotation before it may be
    /// picked again without an explicit test.
    pub cooldown: Duration,
    /// Render units of one task in flight at once.
    pub max_in_flight_per_task: usize,
    /// Render units on one worker at once.
    pub max_in_flight_per_worker: usize,
    /// Attempts per render unit, each on a different worker.
    pub retry_budget: usize,
    /// Wall-clock limit for one render attempt.
    pub render_timeout: Duration,
    pub probe_timeout: Duration,
    pub health_check_interval: Duration,
    /// Pause before re-checking for a worker when none is available.
    pub no_worker_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            max_in_flight_per_task: 4,
            max_in_flight_per_worker: 2,
            retry_budget: 3,
            render_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            health_check_interval: Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS),
            no_worker_backoff: Duration::from_millis(1000),
        }
    }
}

/// A configuration variable holds an unusable value.
#[derive(Debug, thiserror::Error)]
#[error("{var} has invalid value '{value}': {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `WORKER_COOLDOWN_SECS`       | `60`    |
    /// | `MAX_IN_FLIGHT_PER_TASK`     | `4`     |
    /// | `MAX_IN_FLIGHT_PER_WORKER`   | `2`     |
    /// | `DISPATCH_RETRY_BUDGET`      | `3`     |
    /// | `RENDER_TIMEOUT_SECS`        | `300`   |
    /// | `PROBE_TIMEOUT_SECS`         | `5`     |
    /// | `HEALTH_CHECK_INTERVAL_SECS` | `30`    |
    /// | `NO_WORKER_BACKOFF_MS`       | `1000`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            positive::<u64>(&lookup, var, default.as_secs()).map(Duration::from_secs)
        };

        Ok(Self {
            cooldown: Duration::from_secs(parse(
                &lookup,
                "WORKER_COOLDOWN_SECS",
                defaults.cooldown.as_secs(),
            )?),
            max_in_flight_per_task: positive(
                &lookup,
                "MAX_IN_FLIGHT_PER_TASK",
                defaults.max_in_flight_per_task,
            )?,
            max_in_flight_per_worker: positive(
                &lookup,
                "MAX_IN_FLIGHT_PER_WORKER",
                defaults.max_in_flight_per_worker,
            )?,
            retry_budget: positive(&lookup, "DISPATCH_RETRY_BUDGET", defaults.retry_budget)?,
            render_timeout: secs("RENDER_TIMEOUT_SECS", defaults.render_timeout)?,
            probe_timeout: secs("PROBE_TIMEOUT_SECS", defaults.probe_timeout)?,
            health_check_interval: secs(
                "HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval,
            )?,
            no_worker_backoff: Duration::from_millis(positive(
                &lookup,
                "NO_WORKER_BACKOFF_MS",
                defaults.no_worker_backoff.as_millis() as u64,
            )?),
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError {
            var,
            value: raw,
            reason: "not a non-negative integer",
        }),
    }
}

fn positive<T: FromStr + PartialOrd + Default>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = parse(lookup, var, default)?;
    if value <= T::default() {
        return Err(ConfigError {
            var,
            value: lookup(var).unwrap_or_default(),
            reason: "must be greater than zero",
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.cooldown, Duration::from_secs(60));
        assert_eq!(config.max_in_flight_per_task, 4);
        assert_eq!(config.max_in_flight_per_worker, 2);
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.no_worker_backoff, Duration::from_millis(1000));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("WORKER_COOLDOWN_SECS", "5"),
            ("MAX_IN_FLIGHT_PER_TASK", " 8 "),
            ("DISPATCH_RETRY_BUDGET", "1"),
        ])
        .unwrap();
        assert_eq!(config.cooldown, Duration::from_secs(5));
        assert_eq!(config.max_in_flight_per_task, 8);
        assert_eq!(config.retry_budget, 1);
    }

    #[test]
    fn zero_cooldown_is_allowed() {
        let config = load(&[("WORKER_COOLDOWN_SECS", "0")]).unwrap();
        assert_eq!(config.cooldown, Duration::ZERO);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = load(&[("MAX_IN_FLIGHT_PER_WORKER", "0")]).unwrap_err();
        assert_eq!(err.var, "MAX_IN_FLIGHT_PER_WORKER");
    }

    #[test]
    fn garbage_is_rejected() {
        let err = load(&[("DISPATCH_RETRY_BUDGET", "three")]).unwrap_err();
        assert_eq!(err.value, "three");
    }
}
