//! Configuration data types and structures for the client.
//!
//! Every section and every field is optional; omitted values fall back to the
//! defaults the polling engine was tuned with.

use core::time::Duration;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use streamhost_common::{DEFAULT_DISCOVERY_PORT, DEFAULT_HTTPS_PORT};

/// Root config structure for the client.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub polling: PollingConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub discovery: DiscoveryConfig,
}

/// Timing and threshold settings of the per-host pollers.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    /// Period of the server-info poll while polling is active.
    pub status_period_ms: u64,
    /// Consecutive failed status polls before a host is reported offline.
    pub offline_threshold: u32,
    /// Period of the app-list poll after a catalog was accepted.
    pub applist_period_ms: u64,
    /// Retry delay of the app-list poll after a failed or rejected fetch.
    pub applist_retry_ms: u64,
    /// Consecutive empty catalogs before an empty catalog is believed.
    pub empty_list_threshold: u32,
    /// Interval at which `wait_for_polling_stopped` re-checks for in-flight polls.
    pub stop_wait_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            status_period_ms: 1500,
            offline_threshold: 5,
            applist_period_ms: 30_000,
            applist_retry_ms: 2000,
            empty_list_threshold: 3,
            stop_wait_interval_ms: 250,
        }
    }
}

impl PollingConfig {
    #[must_use]
    pub const fn status_period(&self) -> Duration {
        Duration::from_millis(self.status_period_ms)
    }

    #[must_use]
    pub const fn applist_period(&self) -> Duration {
        Duration::from_millis(self.applist_period_ms)
    }

    #[must_use]
    pub const fn applist_retry(&self) -> Duration {
        Duration::from_millis(self.applist_retry_ms)
    }

    #[must_use]
    pub const fn stop_wait_interval(&self) -> Duration {
        Duration::from_millis(self.stop_wait_interval_ms)
    }
}

/// How hosts are contacted.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port of the server-info and app-list endpoints, also used by the connectivity probe.
    pub https_port: u16,
    /// Timeout of the bare connect used to pick a network path.
    pub fast_poll_timeout_ms: u64,
    /// Timeout of a whole server-info or app-list request.
    pub request_timeout_ms: u64,
    /// Talk TLS to hosts. Only test fixtures turn this off.
    pub tls: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            https_port: DEFAULT_HTTPS_PORT,
            fast_poll_timeout_ms: 500,
            request_timeout_ms: 5000,
            tls: true,
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub const fn fast_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_poll_timeout_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Where the registry and the app-list cache live.
///
/// Relative paths are interpreted relative to the config file, see [`ClientConfig::resolve_paths`].
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the `SQLite` host registry, or `:memory:`.
    pub db_path: String,
    /// Root directory of the app-list cache.
    pub cache_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "./streamhost.db".to_owned(),
            cache_dir: "./cache".to_owned(),
        }
    }
}

/// Local-network discovery of hosts.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enable: bool,
    /// UDP port hosts broadcast their announcements to.
    pub broadcast_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enable: true,
            broadcast_port: DEFAULT_DISCOVERY_PORT,
        }
    }
}

impl ClientConfig {
    /// Rewrites the storage paths so they no longer depend on the working directory.
    pub fn resolve_paths(&mut self, config_path: &Path) {
        self.storage.db_path = resolve_config_relative_paths(config_path, &self.storage.db_path)
            .to_string_lossy()
            .into_owned();
        self.storage.cache_dir =
            resolve_config_relative_paths(config_path, &self.storage.cache_dir)
                .to_string_lossy()
                .into_owned();
    }
}

/// Resolves a path to an absolute one.
///
/// If the path is absolute, returns it as-is. If relative, joins it with the
/// config file's parent directory and normalizes the result to remove redundant
/// components like `./`.
///
/// # Arguments
///
/// * `config_path` - Path to the config file
/// * `relative_path` - Path to resolve (may be absolute or relative)
///
/// # Returns
///
/// A normalized absolute path
pub fn resolve_config_relative_paths(config_path: &Path, relative_path: &str) -> PathBuf {
    let path = Path::new(relative_path);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else if relative_path == ":memory:" {
        // Special case: SQLite in-memory database path
        path.to_path_buf()
    } else {
        config_path
            .parent()
            .map_or_else(|| path.to_path_buf(), |d| d.join(path))
    };

    // We can't use canonicalize() because the file might not exist yet
    normalize_path(&resolved)
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        use Component as C;
        match component {
            C::Normal(c) => {
                result.push(c);
            }
            C::ParentDir => {
                result.pop();
            }
            C::CurDir => {}
            C::RootDir | C::Prefix(_) => {
                result.push(component);
            }
        }
    }
    result
}
