//! Backend which runs processes directly on the host.
//!
//! Each process is driven by a supervisor thread: the thread performs
//! `fork`+`exec` (which may block while the child opens FIFO redirections),
//! then waits for the child while a watchdog enforces the wall-clock limit.
//! This is why [Sandbox::start] returns immediately.
use crate::{
    Backend, ChildProcess, Error, ExecutionStats, ExitStatus, Mount,
    ProcessOptions, Sandbox,
};
use crossbeam_channel::RecvTimeoutError;
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    convert::TryFrom,
    ffi::{CStr, CString, OsString},
    fs, io,
    os::unix::{ffi::OsStrExt, fs::PermissionsExt, process::CommandExt},
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Sandboxes will be created as subdirectories of `root`
    pub fn new(root: impl Into<PathBuf>) -> LocalBackend {
        LocalBackend { root: root.into() }
    }
}

impl Backend for LocalBackend {
    fn new_sandbox(&self, name: &str) -> crate::Result<Box<dyn Sandbox>> {
        fs::create_dir_all(&self.root)
            .map_err(|err| Error::io("failed to create sandboxes root", err))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", name))
            .tempdir_in(&self.root)
            .map_err(|err| Error::io("failed to create sandbox directory", err))?
            .into_path();
        debug!(sandbox = name, "created sandbox at {}", dir.display());
        Ok(Box::new(LocalSandbox {
            name: name.to_string(),
            dir,
            stats: Arc::new(Mutex::new(None)),
        }))
    }
}

type StatsSlot = Arc<Mutex<Option<ExecutionStats>>>;

#[derive(Debug)]
struct LocalSandbox {
    name: String,
    dir: PathBuf,
    stats: StatsSlot,
}

impl LocalSandbox {
    fn apply_mount(&self, mount: &Mount) -> crate::Result<()> {
        let dest = self.dir.join(relative(&mount.dest));
        if let Ok(existing) = fs::read_link(&dest) {
            if existing == mount.src {
                return Ok(());
            }
            return Err(Error::InvalidOptions(format!(
                "mount point {} is already used for {}",
                mount.dest.display(),
                existing.display()
            )));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| Error::io("failed to create mount point parent", err))?;
        }
        std::os::unix::fs::symlink(&mount.src, &dest)
            .map_err(|err| Error::io(format!("failed to mount {}", mount.src.display()), err))
    }
}

fn relative(p: &Path) -> &Path {
    p.strip_prefix("/").unwrap_or(p)
}

impl Sandbox for LocalSandbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> &Path {
        &self.dir
    }

    fn create_file(&self, name: &Path, data: &[u8], executable: bool) -> crate::Result<()> {
        let path = self.dir.join(relative(name));
        fs::write(&path, data)
            .map_err(|err| Error::io(format!("failed to write {}", path.display()), err))?;
        let mode = if executable { 0o755 } else { 0o644 };
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
            .map_err(|err| Error::io("failed to set file mode", err))
    }

    fn read_file(&self, name: &Path) -> crate::Result<Vec<u8>> {
        let path = self.dir.join(relative(name));
        fs::read(&path).map_err(|err| Error::io(format!("failed to read {}", path.display()), err))
    }

    fn start(&self, options: ProcessOptions) -> crate::Result<Box<dyn ChildProcess>> {
        for mount in &options.mounts {
            self.apply_mount(mount)?;
        }
        let plan = LaunchPlan::new(&self.dir, options)?;
        *lock(&self.stats) = None;
        let sandbox_name = self.name.clone();
        let thread = thread::Builder::new()
            .name(format!("minion-{}", self.name))
            .spawn(move || plan.supervise())
            .map_err(|err| Error::io("failed to start supervisor thread", err))?;
        Ok(Box::new(LocalChildProcess {
            sandbox_name,
            thread,
            slot: self.stats.clone(),
        }))
    }

    fn last_stats(&self) -> Option<ExecutionStats> {
        lock(&self.stats).clone()
    }

    fn cleanup(self: Box<Self>, delete: bool) -> crate::Result<()> {
        if !delete {
            debug!(sandbox = %self.name, "keeping sandbox at {}", self.dir.display());
            return Ok(());
        }
        // symlinks are removed without following, so mounted directories survive
        fs::remove_dir_all(&self.dir)
            .map_err(|err| Error::io(format!("failed to remove {}", self.dir.display()), err))
    }
}

fn lock(slot: &StatsSlot) -> std::sync::MutexGuard<'_, Option<ExecutionStats>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct LocalChildProcess {
    sandbox_name: String,
    thread: thread::JoinHandle<ExecutionStats>,
    slot: StatsSlot,
}

impl ChildProcess for LocalChildProcess {
    fn sandbox_name(&self) -> &str {
        &self.sandbox_name
    }

    fn wait(self: Box<Self>) -> crate::Result<ExecutionStats> {
        let stats = self
            .thread
            .join()
            .map_err(|_| Error::SupervisorPanicked)?;
        *lock(&self.slot) = Some(stats.clone());
        Ok(stats)
    }
}

/// Stdio redirections, prepared before fork so that the child does not allocate
#[derive(Debug, Clone)]
struct Redirections {
    stdin: Option<CString>,
    stdout: Option<CString>,
    stderr: Option<CString>,
    stdout_first: bool,
}

impl Redirections {
    /// Runs in the forked child: only async-signal-safe calls are allowed here.
    fn apply(&self) -> io::Result<()> {
        let write_flags = libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC;
        if self.stdout_first {
            redirect(self.stdout.as_deref(), write_flags, libc::STDOUT_FILENO)?;
            redirect(self.stdin.as_deref(), libc::O_RDONLY, libc::STDIN_FILENO)?;
        } else {
            redirect(self.stdin.as_deref(), libc::O_RDONLY, libc::STDIN_FILENO)?;
            redirect(self.stdout.as_deref(), write_flags, libc::STDOUT_FILENO)?;
        }
        redirect(self.stderr.as_deref(), write_flags, libc::STDERR_FILENO)
    }
}

fn redirect(path: Option<&CStr>, flags: libc::c_int, target: libc::c_int) -> io::Result<()> {
    let path = match path {
        Some(p) => p,
        None => return Ok(()),
    };
    let fd = unsafe { libc::open(path.as_ptr(), flags, 0o666 as libc::c_uint) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    if fd != target {
        if unsafe { libc::dup2(fd, target) } < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { libc::close(fd) };
    }
    Ok(())
}

fn host_path(root: &Path, p: &Path) -> crate::Result<CString> {
    let full = root.join(relative(p));
    CString::new(full.as_os_str().as_bytes())
        .map_err(|_| Error::InvalidOptions(format!("path {} contains NUL", full.display())))
}

struct LaunchPlan {
    cwd: PathBuf,
    argv: Vec<OsString>,
    environment: Vec<(OsString, OsString)>,
    wall_time_limit: Option<Duration>,
    cpu_time_limit: Option<Duration>,
    memory_limit: Option<u64>,
    multiprocess: bool,
    redirections: Redirections,
}

impl LaunchPlan {
    fn new(root: &Path, options: ProcessOptions) -> crate::Result<LaunchPlan> {
        if options.argv.is_empty() {
            return Err(Error::InvalidOptions("argv is empty".to_string()));
        }
        let redirect_path = |p: &Option<PathBuf>| -> crate::Result<Option<CString>> {
            p.as_deref().map(|p| host_path(root, p)).transpose()
        };
        let redirections = Redirections {
            stdin: redirect_path(&options.stdin)?,
            stdout: redirect_path(&options.stdout)?,
            stderr: redirect_path(&options.stderr)?,
            stdout_first: options.open_stdout_first,
        };
        let mut environment: Vec<_> = options.environment.into_iter().collect();
        if !environment.iter().any(|(k, _)| k == "PATH") {
            environment.push(("PATH".into(), DEFAULT_PATH.into()));
        }
        Ok(LaunchPlan {
            cwd: root.to_path_buf(),
            argv: options.argv,
            environment,
            wall_time_limit: options.wall_time_limit,
            cpu_time_limit: options.cpu_time_limit,
            memory_limit: options.memory_limit,
            multiprocess: options.multiprocess,
            redirections,
        })
    }

    /// Seconds for `alarm(2)`: kills a child which is blocked in `open` on a
    /// FIFO whose peer never appeared, before the supervisor knows its pid.
    /// The alarm is cancelled right before `exec`.
    fn alarm_seconds(&self) -> libc::c_uint {
        match self.wall_time_limit {
            Some(limit) => {
                let secs = limit.as_secs().saturating_add(2);
                libc::c_uint::try_from(secs).unwrap_or(libc::c_uint::MAX)
            }
            None => 0,
        }
    }

    fn cpu_seconds(&self) -> Option<libc::rlim_t> {
        self.cpu_time_limit.map(|limit| {
            let secs = limit.as_secs() + u64::from(limit.subsec_nanos() > 0);
            secs.max(1) as libc::rlim_t
        })
    }

    /// Watchdog may fire after the child exited on its own just in time,
    /// so its verdict is only trusted if exit happened past the limit.
    fn wall_timed_out(&self, killed_by_watchdog: bool, exited_after: Duration) -> bool {
        killed_by_watchdog
            && self
                .wall_time_limit
                .map_or(false, |limit| exited_after >= limit)
    }

    /// Whether abnormal termination should be blamed on the address space
    /// limit. Allocations fail long before peak RSS reaches the limit, and a
    /// growing buffer which doubles dies once it passes half of it.
    fn near_memory_limit(&self, memory_used: u64) -> bool {
        self.memory_limit
            .map_or(false, |limit| memory_used.saturating_mul(2) >= limit)
    }

    fn supervise(self) -> ExecutionStats {
        let started = Instant::now();
        let mut cmd = std::process::Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .env_clear()
            .envs(self.environment.iter().map(|(k, v)| (k, v)))
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let redirections = self.redirections.clone();
        let memory_limit = self.memory_limit;
        let cpu_seconds = self.cpu_seconds();
        let alarm_seconds = self.alarm_seconds();
        let single_process = !self.multiprocess;
        // Safety: closure only calls async-signal-safe functions and does not allocate
        unsafe {
            cmd.pre_exec(move || {
                if libc::setpgid(0, 0) != 0 {
                    return Err(io::Error::last_os_error());
                }
                if let Some(limit) = memory_limit {
                    let rlim = libc::rlimit {
                        rlim_cur: limit as libc::rlim_t,
                        rlim_max: limit as libc::rlim_t,
                    };
                    if libc::setrlimit(libc::RLIMIT_AS, &rlim) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                if let Some(secs) = cpu_seconds {
                    // hard limit one second later, so SIGXCPU comes before SIGKILL
                    let rlim = libc::rlimit {
                        rlim_cur: secs,
                        rlim_max: secs + 1,
                    };
                    if libc::setrlimit(libc::RLIMIT_CPU, &rlim) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                if single_process {
                    // not enforced for root
                    let rlim = libc::rlimit {
                        rlim_cur: 1,
                        rlim_max: 1,
                    };
                    if libc::setrlimit(libc::RLIMIT_NPROC, &rlim) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                libc::alarm(alarm_seconds);
                redirections.apply()?;
                libc::alarm(0);
                Ok(())
            });
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!("failed to spawn {:?}: {}", self.argv[0], err);
                return ExecutionStats::sandbox_error();
            }
        };
        let pid = child.id() as libc::pid_t;
        // the supervisor reaps the child itself to get resource usage
        drop(child);

        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let watchdog = self.wall_time_limit.map(|limit| {
            let remaining = limit.checked_sub(started.elapsed()).unwrap_or_default();
            thread::spawn(move || match done_rx.recv_timeout(remaining) {
                Err(RecvTimeoutError::Timeout) => {
                    kill(Pid::from_raw(-pid), Signal::SIGKILL).ok();
                    true
                }
                _ => false,
            })
        });

        if let Err(err) = wait_exited(pid) {
            warn!(pid, "waitid failed: {}", err);
        }
        let exited_after = started.elapsed();
        drop(done_tx);
        let killed_by_watchdog = match watchdog {
            Some(w) => w.join().unwrap_or(false),
            None => false,
        };
        let timed_out = self.wall_timed_out(killed_by_watchdog, exited_after);
        // leader is still a zombie, so the group id can not be reused yet
        kill(Pid::from_raw(-pid), Signal::SIGKILL).ok();
        let (status, usage) = match reap(pid) {
            Ok(r) => r,
            Err(err) => {
                warn!(pid, "wait4 failed: {}", err);
                return ExecutionStats::sandbox_error();
            }
        };
        let wall_clock_time = exited_after.as_secs_f64();
        self.make_stats(status, &usage, timed_out, wall_clock_time)
    }

    fn make_stats(
        &self,
        status: libc::c_int,
        usage: &libc::rusage,
        timed_out: bool,
        wall_clock_time: f64,
    ) -> ExecutionStats {
        let exit_code = if libc::WIFEXITED(status) {
            Some(libc::WEXITSTATUS(status))
        } else {
            None
        };
        let signal = if libc::WIFSIGNALED(status) {
            Some(libc::WTERMSIG(status))
        } else {
            None
        };
        let memory_used = (usage.ru_maxrss.max(0) as u64) * 1024;
        let execution_time = timeval_secs(&usage.ru_utime) + timeval_secs(&usage.ru_stime);
        let over_wall_limit = self
            .wall_time_limit
            .map_or(false, |limit| wall_clock_time >= limit.as_secs_f64());

        let over_cpu_limit = self
            .cpu_time_limit
            .map_or(false, |limit| execution_time >= limit.as_secs_f64());

        let exit_status = if timed_out || (signal == Some(libc::SIGALRM) && over_wall_limit) {
            ExitStatus::TimeoutWall
        } else if signal == Some(libc::SIGXCPU) || (signal.is_some() && over_cpu_limit) {
            ExitStatus::Timeout
        } else if exit_code == Some(0) {
            ExitStatus::Ok
        } else if self.near_memory_limit(memory_used) {
            ExitStatus::MemoryLimit
        } else if signal.is_some() {
            ExitStatus::Signal
        } else {
            ExitStatus::NonzeroReturn
        };
        ExecutionStats {
            exit_status,
            exit_code,
            signal,
            execution_time,
            wall_clock_time,
            memory_used,
        }
    }
}

fn timeval_secs(tv: &libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 / 1e6
}

/// Blocks until child exits, leaving it unreaped
fn wait_exited(pid: libc::pid_t) -> io::Result<()> {
    loop {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn reap(pid: libc::pid_t) -> io::Result<(libc::c_int, libc::rusage)> {
    loop {
        let mut status = 0;
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if ret == pid {
            return Ok((status, usage));
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
