use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Converts seconds to a duration, saturating: negative and NaN values become
/// zero, values too large to represent become `Duration::MAX`.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "kebab-case")]
pub struct InvokerConfig {
    /// Root for sandboxes, FIFO, feedback and output directories
    #[serde(default = "InvokerConfig::default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Backing directory of file storage.
    /// By default `invoker-storage` inside `temp-dir`
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    /// If enabled, nothing is removed after evaluation
    #[serde(default)]
    pub keep_sandbox: bool,
    /// Lower bound for manager wall-clock limit
    #[serde(default = "InvokerConfig::default_trusted_time")]
    pub trusted_sandbox_max_time_s: f64,
    #[serde(default = "InvokerConfig::default_trusted_memory")]
    pub trusted_sandbox_max_memory_kib: u64,
    #[serde(default = "InvokerConfig::default_compilation_time")]
    pub compilation_sandbox_max_time_s: f64,
    #[serde(default = "InvokerConfig::default_compilation_memory")]
    pub compilation_sandbox_max_memory_kib: u64,
}

impl InvokerConfig {
    fn default_temp_dir() -> PathBuf {
        std::env::temp_dir()
    }

    fn default_trusted_time() -> f64 {
        10.0
    }

    fn default_trusted_memory() -> u64 {
        4 * 1024 * 1024
    }

    fn default_compilation_time() -> f64 {
        10.0
    }

    fn default_compilation_memory() -> u64 {
        512 * 1024
    }

    pub fn storage_dir(&self) -> PathBuf {
        match &self.storage_dir {
            Some(dir) => dir.clone(),
            None => self.temp_dir.join("invoker-storage"),
        }
    }

    pub fn trusted_time_limit(&self) -> Duration {
        secs_to_duration(self.trusted_sandbox_max_time_s)
    }

    pub fn trusted_memory_limit(&self) -> u64 {
        self.trusted_sandbox_max_memory_kib * 1024
    }

    pub fn compilation_time_limit(&self) -> Duration {
        secs_to_duration(self.compilation_sandbox_max_time_s)
    }

    pub fn compilation_memory_limit(&self) -> u64 {
        self.compilation_sandbox_max_memory_kib * 1024
    }

    /// Wall-clock limit for the manager of a task with `user_time_limit`.
    ///
    /// Total time of user processes can only be checked after all of them
    /// finished, so the manager must outlive the slowest compliant user.
    pub fn manager_time_limit(&self, user_time_limit: f64) -> Duration {
        let secs = (user_time_limit + 1.0).max(self.trusted_sandbox_max_time_s);
        secs_to_duration(secs)
    }
}

impl Default for InvokerConfig {
    fn default() -> Self {
        InvokerConfig {
            temp_dir: InvokerConfig::default_temp_dir(),
            storage_dir: None,
            keep_sandbox: false,
            trusted_sandbox_max_time_s: InvokerConfig::default_trusted_time(),
            trusted_sandbox_max_memory_kib: InvokerConfig::default_trusted_memory(),
            compilation_sandbox_max_time_s: InvokerConfig::default_compilation_time(),
            compilation_sandbox_max_memory_kib: InvokerConfig::default_compilation_memory(),
        }
    }
}
