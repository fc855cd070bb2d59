//! Environment-driven settings for the registry-side admission pieces.

use std::env;
use std::time::Duration;
use tracing::{error, info};

pub const PROJECT_CACHE_TTL_ENV: &str = "PROJECT_CACHE_TTL";
pub const MAX_IMAGES_BULK_IMPORTED_PER_REPOSITORY_ENV: &str =
    "MAX_IMAGES_BULK_IMPORTED_PER_REPOSITORY";

const DEFAULT_PROJECT_CACHE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_IMAGES_BULK_IMPORTED_PER_REPOSITORY: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How long limit range and resource quota snapshots stay cached per
    /// project. `None` disables the caches.
    pub project_cache_ttl: Option<Duration>,
    /// Worst-case number of tags a single repository import may fan out to.
    pub max_images_bulk_imported_per_repository: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_cache_ttl: Some(DEFAULT_PROJECT_CACHE_TTL),
            max_images_bulk_imported_per_repository:
                DEFAULT_MAX_IMAGES_BULK_IMPORTED_PER_REPOSITORY,
        }
    }
}

impl Config {
    /// Reads the configuration from the environment. Malformed values are
    /// logged and replaced by their defaults; a zero cache TTL disables the
    /// caches.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(raw) = env::var(PROJECT_CACHE_TTL_ENV) {
            // A non-positive TTL disables the caches. Negative durations do
            // not parse as a Duration, so the sign is checked up front.
            let (negated, magnitude) = match raw.trim().strip_prefix('-') {
                Some(magnitude) => (true, magnitude),
                None => (false, raw.trim()),
            };
            match humantime::parse_duration(magnitude) {
                Ok(ttl) if negated || ttl.is_zero() => {
                    info!("Project caches for quota objects are disabled");
                    config.project_cache_ttl = None;
                }
                Ok(ttl) => config.project_cache_ttl = Some(ttl),
                Err(err) => {
                    error!("Failed to parse {}={:?}: {}", PROJECT_CACHE_TTL_ENV, raw, err);
                }
            }
        }

        if let Ok(raw) = env::var(MAX_IMAGES_BULK_IMPORTED_PER_REPOSITORY_ENV) {
            match raw.parse::<u64>() {
                Ok(max) => config.max_images_bulk_imported_per_repository = max,
                Err(err) => {
                    error!(
                        "Failed to parse {}={:?}: {}",
                        MAX_IMAGES_BULK_IMPORTED_PER_REPOSITORY_ENV, raw, err
                    );
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // the cases run in one test because they share process environment
    #[test]
    fn test_config_from_env() {
        unsafe {
            env::remove_var(PROJECT_CACHE_TTL_ENV);
            env::remove_var(MAX_IMAGES_BULK_IMPORTED_PER_REPOSITORY_ENV);
        }
        assert_eq!(Config::from_env(), Config::default());

        unsafe {
            env::set_var(PROJECT_CACHE_TTL_ENV, "2m");
            env::set_var(MAX_IMAGES_BULK_IMPORTED_PER_REPOSITORY_ENV, "50");
        }
        let config = Config::from_env();
        assert_eq!(config.project_cache_ttl, Some(Duration::from_secs(120)));
        assert_eq!(config.max_images_bulk_imported_per_repository, 50);

        unsafe {
            env::set_var(PROJECT_CACHE_TTL_ENV, "0s");
        }
        assert_eq!(Config::from_env().project_cache_ttl, None);

        unsafe {
            env::set_var(PROJECT_CACHE_TTL_ENV, "-1s");
        }
        assert_eq!(Config::from_env().project_cache_ttl, None);

        unsafe {
            env::set_var(PROJECT_CACHE_TTL_ENV, "soon");
            env::set_var(MAX_IMAGES_BULK_IMPORTED_PER_REPOSITORY_ENV, "-1");
        }
        assert_eq!(Config::from_env(), Config::default());

        unsafe {
            env::remove_var(PROJECT_CACHE_TTL_ENV);
            env::remove_var(MAX_IMAGES_BULK_IMPORTED_PER_REPOSITORY_ENV);
        }
    }
}
