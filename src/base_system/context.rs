//! Application settings resolved from a [`LayeredConfig`].

use crate::hash::HashMethod;

use super::config::{ConfigError, LayeredConfig};

pub const PACKAGE_NAME: &str = "elib";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    // download
    pub download_retries: u32,
    pub block_size: usize,
    pub hash_method: HashMethod,

    // logging
    pub log_debug: bool,
    pub log_to_file: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_retries: default_download_retries(),
            block_size: default_block_size(),
            hash_method: HashMethod::default(),
            log_debug: false,
            log_to_file: false,
        }
    }
}

impl Settings {
    pub fn from_config(cfg: &LayeredConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            download_retries: cfg
                .get_parsed("DOWNLOAD_RETRIES")?
                .unwrap_or(defaults.download_retries),
            block_size: cfg
                .get_parsed::<usize>("DOWNLOAD_BLOCK_SIZE")?
                .map(|n| n.max(1))
                .unwrap_or(defaults.block_size),
            hash_method: cfg
                .get_parsed("DOWNLOAD_HASH_METHOD")?
                .unwrap_or(defaults.hash_method),
            log_debug: cfg.get_bool("LOG_DEBUG")?.unwrap_or(defaults.log_debug),
            log_to_file: cfg.get_bool("LOG_TO_FILE")?.unwrap_or(defaults.log_to_file),
        })
    }

    /// Defaults in the form accepted by [`LayeredConfig::new`].
    pub fn default_pairs() -> Vec<(&'static str, String)> {
        let d = Self::default();
        vec![
            ("DOWNLOAD_RETRIES", d.download_retries.to_string()),
            ("DOWNLOAD_BLOCK_SIZE", d.block_size.to_string()),
            ("DOWNLOAD_HASH_METHOD", d.hash_method.to_string()),
            ("LOG_DEBUG", d.log_debug.to_string()),
            ("LOG_TO_FILE", d.log_to_file.to_string()),
        ]
    }
}

fn default_download_retries() -> u32 {
    3
}

fn default_block_size() -> usize {
    4096 * 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(env: &[(&str, &str)]) -> LayeredConfig {
        LayeredConfig::builder(PACKAGE_NAME)
            .env_map(
                env.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<HashMap<_, _>>(),
            )
            .defaults(Settings::default_pairs())
            .build()
            .unwrap()
    }

    #[test]
    fn defaults_round_trip_through_config() {
        let settings = Settings::from_config(&config_with(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.download_retries, 3);
        assert_eq!(settings.block_size, 16384);
        assert_eq!(settings.hash_method, HashMethod::Md5);
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = Settings::from_config(&config_with(&[
            ("DOWNLOAD_RETRIES", "5"),
            ("download_block_size", "0"),
            ("DOWNLOAD_HASH_METHOD", "SHA-256"),
            ("LOG_DEBUG", "on"),
        ]))
        .unwrap();
        assert_eq!(settings.download_retries, 5);
        assert_eq!(settings.block_size, 1);
        assert_eq!(settings.hash_method, HashMethod::Sha256);
        assert!(settings.log_debug);
        assert!(!settings.log_to_file);
    }

    #[test]
    fn unknown_hash_method_is_a_config_error() {
        let err = Settings::from_config(&config_with(&[("DOWNLOAD_HASH_METHOD", "crc32")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
