//! Paging configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HFS_SEARCH_DEFAULT_PAGE_SIZE` | 20 | Page size when `_count` is absent |
//! | `HFS_SEARCH_MAX_PAGE_SIZE` | 1000 | Upper bound for `_count` |
//! | `HFS_SEARCH_LINK_VALIDITY` | 10m | How long a next link stays usable |
//! | `HFS_SEARCH_SWEEP_INTERVAL` | 1m | How often expired paging state is removed |
//! | `HFS_SEARCH_CURSOR_KEY` | (random) | 32-byte cursor key, hex or base64 |

use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Settings for paged searches and their continuation cursors.
///
/// Built from environment variables with [`PagingConfig::from_env`], from
/// configuration files through serde, or programmatically.
#[derive(Clone, Parser, Serialize, Deserialize)]
#[command(name = "helios-search")]
#[command(about = "Paging settings for the Helios search engine")]
pub struct PagingConfig {
    /// Page size used when the request does not ask for one.
    #[arg(long, env = "HFS_SEARCH_DEFAULT_PAGE_SIZE", default_value = "20")]
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Largest page size a request may ask for.
    #[arg(long, env = "HFS_SEARCH_MAX_PAGE_SIZE", default_value = "1000")]
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Age after which paging state is expired.
    #[arg(
        long,
        env = "HFS_SEARCH_LINK_VALIDITY",
        default_value = "10m",
        value_parser = humantime::parse_duration
    )]
    #[serde(with = "humantime_serde", default = "default_link_validity")]
    pub link_validity: Duration,

    /// Interval of the background expiry sweep.
    #[arg(
        long,
        env = "HFS_SEARCH_SWEEP_INTERVAL",
        default_value = "1m",
        value_parser = humantime::parse_duration
    )]
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    /// Cursor encryption key (hex or base64 of 32 bytes).
    ///
    /// When unset a random key is generated, so cursors do not survive a restart.
    #[arg(long, env = "HFS_SEARCH_CURSOR_KEY", hide_env_values = true)]
    #[serde(default, skip_serializing)]
    pub cursor_key: Option<String>,
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    1000
}

fn default_link_validity() -> Duration {
    Duration::from_secs(600)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            link_validity: default_link_validity(),
            sweep_interval: default_sweep_interval(),
            cursor_key: None,
        }
    }
}

impl std::fmt::Debug for PagingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagingConfig")
            .field("default_page_size", &self.default_page_size)
            .field("max_page_size", &self.max_page_size)
            .field("link_validity", &self.link_validity)
            .field("sweep_interval", &self.sweep_interval)
            .field("cursor_key", &self.cursor_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl PagingConfig {
    /// Creates a configuration from environment variables.
    ///
    /// Command line arguments are ignored. If any variable fails to parse the
    /// error is logged and the defaults are used.
    pub fn from_env() -> Self {
        Self::from_args([crate::NAME])
    }

    fn from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        match Self::try_parse_from(args) {
            Ok(config) => config.without_blank_key(),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid paging settings, using defaults");
                Self::default()
            }
        }
    }

    fn without_blank_key(mut self) -> Self {
        self.cursor_key = self.cursor_key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.default_page_size == 0 {
            errors.push("Default page size cannot be 0".to_string());
        }

        if self.default_page_size > self.max_page_size {
            errors.push("Default page size cannot exceed max page size".to_string());
        }

        if self.link_validity.is_zero() {
            errors.push("Link validity cannot be 0".to_string());
        }

        if self.sweep_interval.is_zero() {
            errors.push("Sweep interval cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Serde module for Duration with humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PagingConfig::default();
        assert_eq!(config.default_page_size, 20);
        assert_eq!(config.max_page_size, 1000);
        assert_eq!(config.link_validity, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_humantime() {
        let config: PagingConfig = serde_json::from_value(serde_json::json!({
            "max_page_size": 50,
            "link_validity": "90s",
            "sweep_interval": "5m"
        }))
        .unwrap();
        assert_eq!(config.default_page_size, 20);
        assert_eq!(config.max_page_size, 50);
        assert_eq!(config.link_validity, Duration::from_secs(90));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_parse_matches_defaults() {
        let parsed = PagingConfig::from_args([crate::NAME]);
        let defaults = PagingConfig::default();
        assert_eq!(parsed.default_page_size, defaults.default_page_size);
        assert_eq!(parsed.max_page_size, defaults.max_page_size);
        assert_eq!(parsed.link_validity, defaults.link_validity);
        assert_eq!(parsed.sweep_interval, defaults.sweep_interval);
    }

    #[test]
    fn test_parse_settings() {
        let config = PagingConfig::from_args([
            crate::NAME,
            "--default-page-size",
            "50",
            "--link-validity",
            "2m 30s",
            "--cursor-key",
            "  ",
        ]);
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.max_page_size, 1000);
        assert_eq!(config.link_validity, Duration::from_secs(150));
        assert!(config.cursor_key.is_none());
    }

    #[test]
    fn test_unparseable_settings_fall_back_to_defaults() {
        let config = PagingConfig::from_args([crate::NAME, "--max-page-size", "not-a-number"]);
        assert_eq!(config.max_page_size, 1000);

        let config = PagingConfig::from_args([crate::NAME, "--sweep-interval", "soon"]);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_validate() {
        let config = PagingConfig {
            default_page_size: 0,
            max_page_size: 10,
            link_validity: Duration::ZERO,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);

        let config: PagingConfig =
            serde_json::from_value(serde_json::json!({ "sweep_interval": "0s" })).unwrap();
        assert_eq!(
            config.validate().unwrap_err(),
            vec!["Sweep interval cannot be 0".to_string()]
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = PagingConfig {
            cursor_key: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
