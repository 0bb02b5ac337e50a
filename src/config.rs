//! Store configuration.
//!
//! Can be embedded in a TOML file:
//!
//! ```toml
//! capacity = 10
//! stale_policy = "warn"
//! fallback_dir = "/home/user/.config/profiles"
//! ```

use std::num::NonZeroUsize;
use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_CAPACITY: usize = 10;
const FALLBACK_DIR_NAME: &str = "profiles";

/// What to do when a cached profile is older than its file on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Keep serving the cached copy silently.
    Ignore,
    /// Keep serving the cached copy and log a warning.
    #[default]
    Warn,
    /// Re-read the file, unless the cached copy has unsaved edits.
    Reload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Maximum number of profiles kept open.
    pub capacity: usize,
    pub stale_policy: StalePolicy,
    /// Where profiles go when their own path cannot be written.
    pub fallback_dir: Option<PathBuf>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            stale_policy: StalePolicy::default(),
            fallback_dir: dirs::config_dir().map(|dir| dir.join(FALLBACK_DIR_NAME)),
        }
    }
}

impl ProfileConfig {
    /// Returns the capacity as `NonZeroUsize`, clamping to 1 if zero.
    #[must_use]
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = ProfileConfig::default();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.stale_policy, StalePolicy::Warn);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = ProfileConfig {
            capacity: 0,
            ..ProfileConfig::default()
        };
        assert_eq!(config.capacity_non_zero().get(), 1);
    }

    #[test]
    fn deserialize_partial() {
        let config: ProfileConfig = toml::from_str(
            r#"
capacity = 2
stale_policy = "reload"
"#,
        )
        .expect("failed to parse hardcoded config");

        assert_eq!(config.capacity, 2);
        assert_eq!(config.stale_policy, StalePolicy::Reload);
    }

    #[test]
    fn deserialize_fallback_dir() {
        let config: ProfileConfig = toml::from_str(r#"fallback_dir = "/tmp/profiles""#)
            .expect("failed to parse hardcoded config");

        assert_eq!(config.capacity, 10);
        assert_eq!(config.fallback_dir, Some(PathBuf::from("/tmp/profiles")));
    }
}
