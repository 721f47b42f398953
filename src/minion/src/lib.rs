/*!
 * This crate provides ability to spawn processes in sandboxes and to wait for them
 *
 * Sandbox implementations live behind the [Backend] trait. The only one shipped
 * here is [LocalBackend], which runs processes directly on the host with
 * resource limits, a wall-clock watchdog and directory "mounts" realized as
 * symlinks. It performs no filesystem or syscall containment.
 *
 * # Platform support
 * _warning_: [LocalBackend] is only available on Linux.
 */
mod command;
mod errors;
#[cfg(target_os = "linux")]
mod local;

pub use command::Command;
pub use errors::{Error, ErrorKind};
#[cfg(target_os = "linux")]
pub use local::LocalBackend;

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    ffi::OsString,
    fmt::Debug,
    path::{Path, PathBuf},
    time::Duration,
};

pub type Result<T> = std::result::Result<T, Error>;

/// Represents way of isolation
pub trait Backend: Debug + Send + Sync {
    /// Creates new empty sandbox. `name` is only used for diagnostics and
    /// directory naming.
    fn new_sandbox(&self, name: &str) -> Result<Box<dyn Sandbox>>;
}

/// One isolated execution context.
///
/// Sandbox can run several processes one after another, but statistics are
/// only kept for the last one.
pub trait Sandbox: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Host path of the sandbox working directory.
    /// All relative paths in [ProcessOptions] are resolved against it.
    fn root(&self) -> &Path;

    fn create_file(&self, name: &Path, data: &[u8], executable: bool) -> Result<()>;

    fn read_file(&self, name: &Path) -> Result<Vec<u8>>;

    /// Starts process. This function must not block until the process performs
    /// any I/O: in particular, opening a FIFO redirection happens in the child.
    fn start(&self, options: ProcessOptions) -> Result<Box<dyn ChildProcess>>;

    /// Statistics of the last process which was waited for.
    fn last_stats(&self) -> Option<ExecutionStats>;

    /// Releases sandbox. If `delete` is false, sandbox directory is left on
    /// disk for inspection.
    fn cleanup(self: Box<Self>, delete: bool) -> Result<()>;
}

/// Represents in-flight sandboxed process.
///
/// `wait` consumes the handle, so every process is waited for exactly once.
pub trait ChildProcess: Debug + Send {
    /// Name of sandbox this process runs in
    fn sandbox_name(&self) -> &str;

    /// Blocks until process exits or is killed
    fn wait(self: Box<Self>) -> Result<ExecutionStats>;
}

/// Waits for all `children`, never touching their stdio.
///
/// Every child is waited for even if some waits fail; first error is returned.
pub fn wait_all(children: Vec<Box<dyn ChildProcess>>) -> Result<Vec<ExecutionStats>> {
    let mut stats = Vec::with_capacity(children.len());
    let mut first_error = None;
    for child in children {
        let name = child.sandbox_name().to_string();
        match child.wait() {
            Ok(st) => stats.push(st),
            Err(err) => {
                tracing::warn!(sandbox = %name, "wait failed: {}", err);
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(stats),
    }
}

/// Host directory exposed to sandbox, always read-write
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Path on system
    pub src: PathBuf,
    /// Path for child, relative to sandbox root
    pub dest: PathBuf,
}

/// Everything needed to start one process.
///
/// Redirection paths are relative to sandbox root (or to a mount inside it).
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub argv: Vec<OsString>,
    pub environment: HashMap<OsString, OsString>,
    /// Wall-clock limit; `None` means unlimited
    pub wall_time_limit: Option<Duration>,
    /// CPU time limit, rounded up to whole seconds; `None` means unlimited
    pub cpu_time_limit: Option<Duration>,
    /// Address space limit in bytes; `None` means unlimited
    pub memory_limit: Option<u64>,
    pub mounts: Vec<Mount>,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// Open stdout redirection before stdin redirection.
    /// Two processes connected by a pair of FIFOs must use opposite orders,
    /// otherwise both block in `open` forever.
    pub open_stdout_first: bool,
    /// Whether process is allowed to create other processes
    pub multiprocess: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExitStatus {
    /// Process exited with zero code
    Ok,
    NonzeroReturn,
    /// Process was killed by a signal it did not ask for
    Signal,
    /// Process exceeded CPU time limit
    Timeout,
    /// Process was killed after exceeding wall-clock limit
    TimeoutWall,
    MemoryLimit,
    /// Sandbox failed to run the process at all
    SandboxError,
}

/// Telemetry of one finished process
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionStats {
    pub exit_status: ExitStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// CPU time (user + system), seconds
    pub execution_time: f64,
    /// Seconds
    pub wall_clock_time: f64,
    /// Peak resident set size, bytes
    pub memory_used: u64,
}

impl ExecutionStats {
    pub fn sandbox_error() -> ExecutionStats {
        ExecutionStats {
            exit_status: ExitStatus::SandboxError,
            exit_code: None,
            signal: None,
            execution_time: 0.0,
            wall_clock_time: 0.0,
            memory_used: 0,
        }
    }
}
