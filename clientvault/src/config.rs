use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resilience::{ConnectivityConfig, RetryPolicy};

const DEFAULT_PROBE_SECS: u64 = 20;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_UNSTABLE_SECS: u64 = 30;
const DEFAULT_OFFLINE_SECS: u64 = 60;
const DEFAULT_RETRY_ATTEMPTS: u64 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_RETRY_JITTER_MS: u64 = 250;
const DEFAULT_MARKER_DEPTH: u64 = 2;
const DEFAULT_PAGE_SIZE: u64 = 500;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "CLIENTVAULT_OFFLINE_SECS ({offline}s) must not be shorter than CLIENTVAULT_UNSTABLE_SECS ({unstable}s)"
    )]
    Thresholds { unstable: u64, offline: u64 },
    #[error("CLIENTVAULT_API_URL is set but CLIENTVAULT_API_KEY is missing")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub org: Option<String>,
    pub storage_dir: PathBuf,
    pub trash_dir: PathBuf,
    pub snapshot_db: PathBuf,
    pub connectivity: ConnectivityConfig,
    pub retry: RetryPolicy,
    pub marker_depth: usize,
    pub page_size: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self::from_lookup(|name| std::env::var(name).ok(), &home)
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        home: &Path,
    ) -> Result<Self, ConfigError> {
        let text = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |name: &str, default: u64| {
            text(name)
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default)
        };

        let storage_dir = text("CLIENTVAULT_STORAGE_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| home.join("ClientVault"));
        let trash_dir = text("CLIENTVAULT_TRASH_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| storage_dir.join(".trash"));
        let snapshot_db = text("CLIENTVAULT_SNAPSHOT_DB")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| default_data_root(home).join("snapshots.db"));

        let unstable = number("CLIENTVAULT_UNSTABLE_SECS", DEFAULT_UNSTABLE_SECS);
        let offline = number("CLIENTVAULT_OFFLINE_SECS", DEFAULT_OFFLINE_SECS);
        if offline < unstable {
            return Err(ConfigError::Thresholds { unstable, offline });
        }
        let connectivity = ConnectivityConfig {
            probe_interval: Duration::from_secs(number("CLIENTVAULT_PROBE_SECS", DEFAULT_PROBE_SECS)),
            probe_timeout: Duration::from_millis(number(
                "CLIENTVAULT_PROBE_TIMEOUT_MS",
                DEFAULT_PROBE_TIMEOUT_MS,
            )),
            unstable_after: Duration::from_secs(unstable),
            offline_after: Duration::from_secs(offline),
            ..ConnectivityConfig::default()
        };

        let attempts = number("CLIENTVAULT_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS);
        let retry = RetryPolicy::new(
            u32::try_from(attempts).unwrap_or(u32::MAX),
            Duration::from_millis(number("CLIENTVAULT_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS)),
        )
        .with_jitter(Duration::from_millis(number(
            "CLIENTVAULT_RETRY_JITTER_MS",
            DEFAULT_RETRY_JITTER_MS,
        )));

        let api_url = text("CLIENTVAULT_API_URL");
        let api_key = text("CLIENTVAULT_API_KEY");
        if api_url.is_some() && api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }

        Ok(Self {
            api_url,
            api_key,
            org: text("CLIENTVAULT_ORG"),
            storage_dir,
            trash_dir,
            snapshot_db,
            connectivity,
            retry,
            marker_depth: number("CLIENTVAULT_MARKER_DEPTH", DEFAULT_MARKER_DEPTH) as usize,
            page_size: u32::try_from(number("CLIENTVAULT_PAGE_SIZE", DEFAULT_PAGE_SIZE))
                .unwrap_or(u32::MAX),
        })
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_data_root(home: &Path) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| home.join(".local/share"))
        .join("clientvault")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned(), Path::new("/home/ana"))
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.api_url, None);
        assert_eq!(config.storage_dir, PathBuf::from("/home/ana/ClientVault"));
        assert_eq!(config.trash_dir, PathBuf::from("/home/ana/ClientVault/.trash"));
        assert!(config.snapshot_db.ends_with("clientvault/snapshots.db"));
        assert_eq!(config.connectivity, ConnectivityConfig::default());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.marker_depth, 2);
        assert_eq!(config.page_size, 500);
    }

    #[test]
    fn tilde_paths_expand_against_home() {
        let config = config_from(&[
            ("CLIENTVAULT_STORAGE_DIR", "~/clients"),
            ("CLIENTVAULT_TRASH_DIR", "/var/trash"),
        ])
        .unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/home/ana/clients"));
        assert_eq!(config.trash_dir, PathBuf::from("/var/trash"));
    }

    #[test]
    fn zero_or_garbage_numbers_fall_back() {
        let config = config_from(&[
            ("CLIENTVAULT_PROBE_SECS", "0"),
            ("CLIENTVAULT_RETRY_ATTEMPTS", "many"),
            ("CLIENTVAULT_MARKER_DEPTH", "4"),
        ])
        .unwrap();
        assert_eq!(config.connectivity.probe_interval, Duration::from_secs(20));
        assert_eq!(config.retry.max_attempts(), 3);
        assert_eq!(config.marker_depth, 4);
    }

    #[test]
    fn offline_threshold_below_unstable_is_rejected() {
        let err = config_from(&[
            ("CLIENTVAULT_UNSTABLE_SECS", "90"),
            ("CLIENTVAULT_OFFLINE_SECS", "60"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Thresholds {
                unstable: 90,
                offline: 60
            }
        );
    }

    #[test]
    fn api_url_requires_key() {
        let err = config_from(&[("CLIENTVAULT_API_URL", "https://db.example")]).unwrap_err();
        assert_eq!(err, ConfigError::MissingApiKey);
    }
}
