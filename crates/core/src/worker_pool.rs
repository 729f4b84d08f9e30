//! Render worker constants and validation.
//!
//! Pure functions and constants shared by the API handlers and the
//! dispatching worker pool. Lives in `core` to keep it free of I/O.

use std::time::Duration;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Seconds an UNHEALTHY worker (after a failed job) stays out of rotation
/// before `pick()` may try it again.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// How often the health monitor probes every enabled worker.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Timeout for a single health probe.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Maximum length of a worker name.
const MAX_NAME_LEN: usize = 128;

/// Maximum length of a worker base URL.
const MAX_URL_LEN: usize = 2_048;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a worker name.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_NAME_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_worker_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Worker name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Worker name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(
            "Worker name may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

/// Validate and normalise a worker base URL.
///
/// The URL must use `http://` or `https://` and name a host. A trailing
/// slash is stripped so endpoint paths can be appended directly.
pub fn normalize_base_url(base_url: &str) -> Result<String, CoreError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.len() > MAX_URL_LEN {
        return Err(CoreError::Validation(format!(
            "base_url must not exceed {MAX_URL_LEN} characters"
        )));
    }
    let host = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .ok_or_else(|| {
            CoreError::Validation("base_url must start with http:// or https://".to_string())
        })?;
    if host.is_empty() || host.starts_with('/') {
        return Err(CoreError::Validation(
            "base_url must include a host".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Cooldown
// ---------------------------------------------------------------------------

/// Whether a worker that failed `since_failure` ago is eligible again.
pub fn cooldown_elapsed(since_failure: Duration, cooldown: Duration) -> bool {
    since_failure >= cooldown
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- validate_worker_name -------------------------------------------------

    #[test]
    fn valid_worker_name() {
        assert!(validate_worker_name("gpu-box_01.local").is_ok());
    }

    #[test]
    fn empty_worker_name_rejected() {
        assert!(validate_worker_name("").is_err());
    }

    #[test]
    fn worker_name_with_space_rejected() {
        assert!(validate_worker_name("gpu box").is_err());
    }

    #[test]
    fn worker_name_too_long_rejected() {
        assert!(validate_worker_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    // -- normalize_base_url ---------------------------------------------------

    #[test]
    fn base_url_trailing_slash_stripped() {
        assert_eq!(
            normalize_base_url("http://10.0.0.5:8188/").unwrap(),
            "http://10.0.0.5:8188"
        );
    }

    #[test]
    fn base_url_https_accepted() {
        assert!(normalize_base_url("https://render.example.com").is_ok());
    }

    #[test]
    fn base_url_requires_http_scheme() {
        assert!(normalize_base_url("ftp://host").is_err());
        assert!(normalize_base_url("host:8188").is_err());
    }

    #[test]
    fn base_url_requires_host() {
        assert!(normalize_base_url("http://").is_err());
    }

    // -- cooldown_elapsed -----------------------------------------------------

    #[test]
    fn cooldown_boundaries() {
        let cooldown = Duration::from_secs(DEFAULT_COOLDOWN_SECS);
        assert!(!cooldown_elapsed(Duration::from_secs(59), cooldown));
        assert!(cooldown_elapsed(Duration::from_secs(60), cooldown));
    }
}
