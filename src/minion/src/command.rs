use crate::{ChildProcess, Mount, ProcessOptions, Sandbox};
use std::{ffi::OsStr, path::Path, time::Duration};

/// Builder for [ProcessOptions]
#[derive(Default, Debug, Clone)]
pub struct Command {
    inner: ProcessOptions,
}

impl Command {
    pub fn new() -> Command {
        Default::default()
    }

    pub fn path<S: AsRef<OsStr>>(&mut self, path: S) -> &mut Self {
        let path = path.as_ref().to_os_string();
        if self.inner.argv.is_empty() {
            self.inner.argv.push(path);
        } else {
            self.inner.argv[0] = path;
        }
        self
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.inner.argv.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(&mut self, key: K, value: V) -> &mut Self {
        self.inner
            .environment
            .insert(key.as_ref().to_os_string(), value.as_ref().to_os_string());
        self
    }

    pub fn wall_time_limit(&mut self, limit: Duration) -> &mut Self {
        self.inner.wall_time_limit = Some(limit);
        self
    }

    pub fn cpu_time_limit(&mut self, limit: Duration) -> &mut Self {
        self.inner.cpu_time_limit = Some(limit);
        self
    }

    pub fn memory_limit(&mut self, bytes: u64) -> &mut Self {
        self.inner.memory_limit = Some(bytes);
        self
    }

    pub fn mount(&mut self, mount: Mount) -> &mut Self {
        self.inner.mounts.push(mount);
        self
    }

    pub fn stdin<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.inner.stdin = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn stdout<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.inner.stdout = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn stderr<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.inner.stderr = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn open_stdout_first(&mut self, flag: bool) -> &mut Self {
        self.inner.open_stdout_first = flag;
        self
    }

    pub fn multiprocess(&mut self, flag: bool) -> &mut Self {
        self.inner.multiprocess = flag;
        self
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.inner
    }

    pub fn spawn(&self, sandbox: &dyn Sandbox) -> crate::Result<Box<dyn ChildProcess>> {
        if self.inner.argv.is_empty() {
            return Err(crate::Error::InvalidOptions("argv is empty".to_string()));
        }
        sandbox.start(self.inner.clone())
    }
}
