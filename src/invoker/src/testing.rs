//! Scripted sandbox backend and fixtures for orchestrator tests.
//!
//! [FakeBackend] never runs anything and never opens redirection targets:
//! a process "finishes" with the stats scripted for its sandbox name. Every
//! call is recorded, so tests can check call order and arguments.
use crate::{
    config::InvokerConfig,
    context::InvokeContext,
    language::{CommandLine, Language, Languages},
    storage::{digest_of, Storage},
};
use anyhow::Context;
use invoker_api::{
    CompilationJob, Digest, EvaluationJob, Executable, Interactivity, Manager, TaskTypeParams,
};
use minion::{ChildProcess, ExecutionStats, ExitStatus, ProcessOptions, Sandbox};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

pub const SOLUTION: &[u8] = b"#!/bin/sh\nexec cat\n";
pub const MANAGER: &[u8] = b"#!/bin/sh\nexit 42\n";
pub const INPUT: &[u8] = b"1 2\n";
pub const ANSWER: &[u8] = b"3\n";
pub const SHELL: &str = "Shell";
pub const SHELL_WITH_SETUP: &str = "Shell with setup";

#[derive(Debug, Clone, PartialEq)]
pub struct Start {
    pub sandbox: String,
    pub argv: Vec<String>,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub open_stdout_first: bool,
    pub wall_time_limit: Option<Duration>,
    pub memory_limit: Option<u64>,
    pub mounts: Vec<PathBuf>,
    /// Redirections which resolved to existing FIFOs
    pub fifo_redirects: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NewSandbox(String),
    Start(Start),
    Wait(String),
    Cleanup { sandbox: String, delete: bool },
}

/// What happens when a process starts in a sandbox with given name
#[derive(Debug, Clone)]
pub struct Script {
    pub stats: ExecutionStats,
    /// Files written into the mount named `feedback`
    pub feedback: Vec<(String, String)>,
    /// Files created in sandbox root
    pub files: Vec<(String, Vec<u8>)>,
    /// Data written to stdout redirection, unless it is a FIFO
    pub stdout: Option<Vec<u8>>,
    pub fail_start: bool,
}

impl Script {
    pub fn exit(exit_status: ExitStatus, exit_code: Option<i32>) -> Script {
        Script {
            stats: ExecutionStats {
                exit_status,
                exit_code,
                signal: None,
                execution_time: 0.05,
                wall_clock_time: 0.1,
                memory_used: 1 << 20,
            },
            feedback: Vec::new(),
            files: Vec::new(),
            stdout: None,
            fail_start: false,
        }
    }

    pub fn ok() -> Script {
        Script::exit(ExitStatus::Ok, Some(0))
    }

    pub fn code(code: i32) -> Script {
        Script::exit(ExitStatus::NonzeroReturn, Some(code))
    }

    pub fn feedback(mut self, name: &str, content: &str) -> Script {
        self.feedback.push((name.to_string(), content.to_string()));
        self
    }

    pub fn file(mut self, name: &str, content: &[u8]) -> Script {
        self.files.push((name.to_string(), content.to_vec()));
        self
    }

    pub fn stdout(mut self, data: &[u8]) -> Script {
        self.stdout = Some(data.to_vec());
        self
    }

    pub fn failing_start() -> Script {
        Script {
            fail_start: true,
            ..Script::ok()
        }
    }
}

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    scripts: HashMap<String, Script>,
}

#[derive(Debug, Clone)]
pub struct FakeBackend {
    root: PathBuf,
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeBackend {
    pub fn new(root: impl Into<PathBuf>) -> FakeBackend {
        FakeBackend {
            root: root.into(),
            state: Arc::default(),
        }
    }

    pub fn script(&self, sandbox: &str, script: Script) {
        lock(&self.state).scripts.insert(sandbox.to_string(), script);
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.state).events.clone()
    }

    pub fn starts(&self) -> Vec<Start> {
        self.events()
            .into_iter()
            .filter_map(|ev| match ev {
                Event::Start(start) => Some(start),
                _ => None,
            })
            .collect()
    }

    pub fn start_of(&self, sandbox: &str) -> Start {
        match self.starts().into_iter().find(|s| s.sandbox == sandbox) {
            Some(start) => start,
            None => panic!("nothing was started in {}", sandbox),
        }
    }

    fn record(&self, event: Event) {
        lock(&self.state).events.push(event);
    }
}

impl minion::Backend for FakeBackend {
    fn new_sandbox(&self, name: &str) -> minion::Result<Box<dyn Sandbox>> {
        fs::create_dir_all(&self.root).ok();
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", name))
            .tempdir_in(&self.root)
            .map_err(|err| minion::Error::Sandbox(err.to_string()))?
            .into_path();
        self.record(Event::NewSandbox(name.to_string()));
        Ok(Box::new(FakeSandbox {
            name: name.to_string(),
            dir,
            backend: self.clone(),
            stats: Arc::default(),
        }))
    }
}

#[derive(Debug)]
struct FakeSandbox {
    name: String,
    dir: PathBuf,
    backend: FakeBackend,
    stats: Arc<Mutex<Option<ExecutionStats>>>,
}

impl FakeSandbox {
    /// Host path of `p`, going through mounts like a real sandbox would
    fn resolve(&self, options: &ProcessOptions, p: &Path) -> PathBuf {
        let p = p.strip_prefix("/").unwrap_or(p);
        for mount in &options.mounts {
            let dest = mount.dest.strip_prefix("/").unwrap_or(&mount.dest);
            if let Ok(rest) = p.strip_prefix(dest) {
                return mount.src.join(rest);
            }
        }
        self.dir.join(p)
    }

    fn is_fifo(path: &Path) -> bool {
        fs::metadata(path)
            .map(|m| m.file_type().is_fifo())
            .unwrap_or(false)
    }

    fn run_script(&self, options: &ProcessOptions, script: &Script) -> anyhow::Result<()> {
        for (path, data) in &script.files {
            fs::write(self.dir.join(path), data).context("script file")?;
        }
        if let Some(feedback) = options
            .mounts
            .iter()
            .find(|m| m.dest == Path::new("feedback"))
        {
            for (name, content) in &script.feedback {
                fs::write(feedback.src.join(name), content).context("script feedback")?;
            }
        }
        if let (Some(data), Some(stdout)) = (&script.stdout, &options.stdout) {
            let target = self.resolve(options, stdout);
            if !FakeSandbox::is_fifo(&target) {
                fs::write(target, data).context("script stdout")?;
            }
        }
        Ok(())
    }
}

impl Sandbox for FakeSandbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> &Path {
        &self.dir
    }

    fn create_file(&self, name: &Path, data: &[u8], _executable: bool) -> minion::Result<()> {
        fs::write(self.dir.join(name), data).map_err(|err| minion::Error::Sandbox(err.to_string()))
    }

    fn read_file(&self, name: &Path) -> minion::Result<Vec<u8>> {
        fs::read(self.dir.join(name)).map_err(|err| minion::Error::Sandbox(err.to_string()))
    }

    fn start(&self, options: ProcessOptions) -> minion::Result<Box<dyn ChildProcess>> {
        let script = lock(&self.backend.state)
            .scripts
            .get(&self.name)
            .cloned()
            .unwrap_or_else(Script::ok);
        let mut fifo_redirects = 0;
        for redirect in [&options.stdin, &options.stdout, &options.stderr].iter() {
            if let Some(path) = redirect {
                if FakeSandbox::is_fifo(&self.resolve(&options, path)) {
                    fifo_redirects += 1;
                }
            }
        }
        self.backend.record(Event::Start(Start {
            sandbox: self.name.clone(),
            argv: options
                .argv
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect(),
            stdin: options.stdin.clone(),
            stdout: options.stdout.clone(),
            open_stdout_first: options.open_stdout_first,
            wall_time_limit: options.wall_time_limit,
            memory_limit: options.memory_limit,
            mounts: options.mounts.iter().map(|m| m.dest.clone()).collect(),
            fifo_redirects,
        }));
        if script.fail_start {
            return Err(minion::Error::InvalidOptions("scripted start failure".to_string()));
        }
        self.run_script(&options, &script)
            .map_err(|err| minion::Error::Sandbox(format!("{:#}", err)))?;
        *self.stats.lock().unwrap() = None;
        Ok(Box::new(FakeChild {
            sandbox_name: self.name.clone(),
            stats: script.stats,
            slot: self.stats.clone(),
            backend: self.backend.clone(),
        }))
    }

    fn last_stats(&self) -> Option<ExecutionStats> {
        self.stats.lock().unwrap().clone()
    }

    fn cleanup(self: Box<Self>, delete: bool) -> minion::Result<()> {
        self.backend.record(Event::Cleanup {
            sandbox: self.name.clone(),
            delete,
        });
        if delete {
            fs::remove_dir_all(&self.dir).map_err(|err| minion::Error::Sandbox(err.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct FakeChild {
    sandbox_name: String,
    stats: ExecutionStats,
    slot: Arc<Mutex<Option<ExecutionStats>>>,
    backend: FakeBackend,
}

impl ChildProcess for FakeChild {
    fn sandbox_name(&self) -> &str {
        &self.sandbox_name
    }

    fn wait(self: Box<Self>) -> minion::Result<ExecutionStats> {
        self.backend.record(Event::Wait(self.sandbox_name.clone()));
        *self.slot.lock().unwrap() = Some(self.stats.clone());
        Ok(self.stats)
    }
}

#[derive(Debug, Default)]
pub struct MemStorage {
    files: Mutex<HashMap<Digest, Vec<u8>>>,
}

impl MemStorage {
    pub fn with_job_files() -> MemStorage {
        let storage = MemStorage::default();
        for data in &[SOLUTION, MANAGER, INPUT, ANSWER] {
            storage.put(data, "fixture").unwrap();
        }
        storage
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.files.lock().unwrap().contains_key(digest)
    }
}

impl Storage for MemStorage {
    fn get(&self, digest: &str) -> anyhow::Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(digest)
            .cloned()
            .with_context(|| format!("no file {}", digest))
    }

    fn put(&self, data: &[u8], _description: &str) -> anyhow::Result<Digest> {
        let digest = digest_of(data);
        self.files.lock().unwrap().insert(digest.clone(), data.to_vec());
        Ok(digest)
    }
}

/// Scripts are "compiled" by copying; `with_setup` adds a chmod setup command
#[derive(Debug)]
pub struct ShellLanguage {
    pub with_setup: bool,
}

impl Language for ShellLanguage {
    fn name(&self) -> &str {
        if self.with_setup {
            SHELL_WITH_SETUP
        } else {
            SHELL
        }
    }

    fn source_extension(&self) -> &str {
        ".sh"
    }

    fn compilation_commands(&self, sources: &[String], executable: &str) -> Vec<CommandLine> {
        let mut cmd = vec!["/bin/cat".to_string()];
        cmd.extend(sources.iter().cloned());
        vec![cmd, vec!["/bin/touch".to_string(), executable.to_string()]]
    }

    fn evaluation_commands(&self, executable: &str) -> Vec<CommandLine> {
        let run = vec![format!("./{}", executable)];
        if self.with_setup {
            vec![vec!["/bin/chmod".to_string(), "+x".to_string(), executable.to_string()], run]
        } else {
            vec![run]
        }
    }
}

pub fn evaluation_job(interactive: bool) -> EvaluationJob {
    let mut executables = BTreeMap::new();
    executables.insert(
        "solution".to_string(),
        Executable {
            filename: "solution".to_string(),
            digest: digest_of(SOLUTION),
        },
    );
    let mut managers = BTreeMap::new();
    managers.insert(
        "manager".to_string(),
        Manager {
            filename: "manager".to_string(),
            digest: digest_of(MANAGER),
        },
    );
    EvaluationJob {
        info: "test job".to_string(),
        task_type: TaskTypeParams {
            interactive: if interactive {
                Interactivity::Interactive
            } else {
                Interactivity::NonInteractive
            },
            stub: false,
        },
        language: SHELL.to_string(),
        time_limit: 1.0,
        memory_limit: 256 << 20,
        input: digest_of(INPUT),
        output: digest_of(ANSWER),
        executables,
        managers,
        only_execution: false,
        keep_sandbox: false,
        multithreaded_sandbox: false,
    }
}

pub fn compilation_job(stub: bool) -> CompilationJob {
    let mut files = BTreeMap::new();
    files.insert("solution.%l".to_string(), digest_of(SOLUTION));
    CompilationJob {
        info: "test compilation".to_string(),
        task_type: TaskTypeParams {
            interactive: Interactivity::Interactive,
            stub,
        },
        language: SHELL.to_string(),
        files,
        managers: BTreeMap::new(),
        keep_sandbox: false,
        multithreaded_sandbox: false,
    }
}

/// Everything needed to build an [InvokeContext]
#[derive(Debug)]
pub struct Fixture {
    pub temp: tempfile::TempDir,
    pub config: InvokerConfig,
    pub backend: FakeBackend,
    pub storage: MemStorage,
    pub languages: Languages,
}

impl Fixture {
    pub fn new() -> Fixture {
        let temp = tempfile::TempDir::new().unwrap();
        let config = InvokerConfig {
            temp_dir: temp.path().join("tmp"),
            ..InvokerConfig::default()
        };
        let mut languages = Languages::builtin();
        languages.register(Box::new(ShellLanguage { with_setup: false }));
        languages.register(Box::new(ShellLanguage { with_setup: true }));
        Fixture {
            backend: FakeBackend::new(temp.path().join("sandboxes")),
            temp,
            config,
            storage: MemStorage::with_job_files(),
            languages,
        }
    }

    pub fn ctx(&self) -> InvokeContext<'_> {
        InvokeContext {
            config: &self.config,
            backend: &self.backend,
            storage: &self.storage,
            languages: &self.languages,
        }
    }

    /// Entries left in the temp root (channels, feedback and output dirs)
    pub fn temp_entries(&self) -> Vec<String> {
        let mut names: Vec<_> = match fs::read_dir(&self.config.temp_dir) {
            Ok(dir) => dir
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    /// Sandbox directories left on disk
    pub fn sandbox_entries(&self) -> usize {
        fs::read_dir(self.temp.path().join("sandboxes"))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }
}
