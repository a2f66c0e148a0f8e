//! # Global runtime configuration.
//!
//! [`Config`] carries the supervisor's numeric budgets (method timeout,
//! restart cool-down and re-entry delays, failure limit), the notification
//! socket path, the path of the unit that represents the service repository
//! itself, and the event-bus capacity.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use unitvisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.method_timeout = Duration::from_secs(3);
//! cfg.failure_limit = 3;
//!
//! assert_eq!(cfg.restart_cooldown, Duration::from_millis(5000));
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::path::ServicePath;

/// Well-known filesystem path of the readiness notification socket.
pub const NOTIFY_SOCKET_PATH: &str = "/var/run/s16_sd_notify.sock";

/// Global configuration for the manager, restarter, and graph engine.
#[derive(Clone, Debug)]
pub struct Config {
    /// Budget for one method execution before the method timer fires.
    pub method_timeout: Duration,
    /// Cool-down after a transient method failure before a restart is begun.
    pub restart_cooldown: Duration,
    /// Delay between the end of the cool-down and re-entering `PreStart`.
    pub restart_entry: Duration,
    /// Consecutive failures tolerated per method; one more lands the unit in
    /// `Maintenance`.
    pub failure_limit: u32,
    /// Filesystem path the notification receiver binds, exported to children
    /// as `NOTIFY_SOCKET`.
    pub notify_socket: PathBuf,
    /// Path of the unit representing the service repository. When that unit
    /// reaches `Online` the manager reconnects dependent subsystems.
    pub repository_path: Option<ServicePath>,
    /// First retry delay after a repository disconnect.
    pub repo_retry_first: Duration,
    /// Cap for the repository retry delay.
    pub repo_retry_max: Duration,
    /// Capacity of the observability event bus.
    pub bus_capacity: usize,
}

impl Default for Config {
    /// Provides the documented defaults:
    /// - `method_timeout = 2000ms`
    /// - `restart_cooldown = 5000ms`
    /// - `restart_entry = 500ms`
    /// - `failure_limit = 5`
    /// - `notify_socket = /var/run/s16_sd_notify.sock`
    /// - `repo_retry_first = 1s`, `repo_retry_max = 30s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            method_timeout: Duration::from_millis(2000),
            restart_cooldown: Duration::from_millis(5000),
            restart_entry: Duration::from_millis(500),
            failure_limit: 5,
            notify_socket: PathBuf::from(NOTIFY_SOCKET_PATH),
            repository_path: None,
            repo_retry_first: Duration::from_secs(1),
            repo_retry_max: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }
}

impl Config {
    /// True if `path` names the unit that represents the repository.
    pub fn is_repository_path(&self, path: &ServicePath) -> bool {
        self.repository_path.as_ref() == Some(path)
    }
}
