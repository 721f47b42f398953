//! End-to-end runs of real shell managers and solutions
use invoker::{
    language::CommandLine, FsStorage, InvokeContext, InvokerConfig, Language, Languages, Storage,
    TaskType,
};
use invoker_api::{
    CompilationJob, EvaluationJob, Executable, Interactivity, Manager, TaskTypeParams,
};
use pretty_assertions::assert_eq;
use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{Mutex, MutexGuard},
};

// Writing an executable while another thread forks can make exec fail with ETXTBSY
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct Shell {
    broken_compiler: bool,
}

impl Language for Shell {
    fn name(&self) -> &str {
        if self.broken_compiler {
            "Broken shell"
        } else {
            "Shell"
        }
    }

    fn source_extension(&self) -> &str {
        ".sh"
    }

    fn compilation_commands(&self, sources: &[String], executable: &str) -> Vec<CommandLine> {
        if self.broken_compiler {
            let script = "echo 'syntax error' >&2; exit 1";
            return vec![vec!["/bin/sh".into(), "-c".into(), script.into()]];
        }
        vec![vec!["/bin/cp".into(), sources[0].clone(), executable.into()]]
    }

    fn evaluation_commands(&self, executable: &str) -> Vec<CommandLine> {
        vec![vec![format!("./{}", executable)]]
    }
}

const ECHO: &[u8] = b"#!/bin/sh\nexec cat\n";
const SUM: &[u8] = b"#!/bin/sh\nread a b\necho $((a + b))\n";
const SLEEPER: &[u8] = b"#!/bin/sh\nexec sleep 5\n";

/// Floods the user with more than a pipe buffer, then drains the echo
const FLOOD_MANAGER: &[u8] = b"#!/bin/sh
head -c 70000 /dev/zero | tr '\\0' 'a'
exec 1>&-
cat > /dev/null
exit 42
";
const CMP_MANAGER: &[u8] = b"#!/bin/sh
if cmp -s - \"$2\"; then exit 42; else exit 43; fi
";
const HALF_MANAGER: &[u8] = b"#!/bin/sh
cat > /dev/null
echo 0.5 > \"$3/score_multiplier.txt\"
exit 42
";
const ACCEPT_MANAGER: &[u8] = b"#!/bin/sh\nexit 42\n";
const BROKEN_MANAGER: &[u8] = b"#!/bin/sh\nexit 1\n";

struct Env {
    temp: tempfile::TempDir,
    config: InvokerConfig,
    backend: minion::LocalBackend,
    storage: FsStorage,
    languages: Languages,
}

impl Env {
    fn new() -> Env {
        let temp = tempfile::TempDir::new().unwrap();
        let config = InvokerConfig {
            temp_dir: temp.path().join("tmp"),
            trusted_sandbox_max_time_s: 5.0,
            ..InvokerConfig::default()
        };
        let storage = FsStorage::new(temp.path().join("storage")).unwrap();
        let mut languages = Languages::builtin();
        languages.register(Box::new(Shell {
            broken_compiler: false,
        }));
        languages.register(Box::new(Shell {
            broken_compiler: true,
        }));
        Env {
            backend: minion::LocalBackend::new(temp.path().join("sandboxes")),
            temp,
            config,
            storage,
            languages,
        }
    }

    fn ctx(&self) -> InvokeContext<'_> {
        InvokeContext {
            config: &self.config,
            backend: &self.backend,
            storage: &self.storage,
            languages: &self.languages,
        }
    }

    fn job(
        &self,
        interactive: Interactivity,
        solution: &[u8],
        manager: &[u8],
        answer: &[u8],
    ) -> EvaluationJob {
        let mut executables = BTreeMap::new();
        executables.insert(
            "solution".to_string(),
            Executable {
                filename: "solution".to_string(),
                digest: self.storage.put(solution, "solution").unwrap(),
            },
        );
        let mut managers = BTreeMap::new();
        managers.insert(
            "manager".to_string(),
            Manager {
                filename: "manager".to_string(),
                digest: self.storage.put(manager, "manager").unwrap(),
            },
        );
        EvaluationJob {
            info: "e2e".to_string(),
            task_type: TaskTypeParams {
                interactive,
                stub: false,
            },
            language: "Shell".to_string(),
            time_limit: 3.0,
            memory_limit: 256 << 20,
            input: self.storage.put(b"1 2\n", "input").unwrap(),
            output: self.storage.put(answer, "answer").unwrap(),
            executables,
            managers,
            only_execution: false,
            keep_sandbox: false,
            // managers below fork helpers like cmp and cat
            multithreaded_sandbox: true,
        }
    }

    fn evaluate(&self, job: &EvaluationJob) -> invoker_api::OutcomeRecord {
        TaskType::new(job.task_type.clone()).evaluate(&self.ctx(), job)
    }

    fn count(dir: &Path) -> usize {
        fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    fn scratch_dirs(&self) -> usize {
        Env::count(&self.config.temp_dir)
    }

    fn sandboxes(&self) -> usize {
        Env::count(&self.temp.path().join("sandboxes"))
    }
}

#[test]
fn flooding_manager_does_not_deadlock() {
    let _guard = serial();
    let env = Env::new();
    let job = env.job(Interactivity::Interactive, ECHO, FLOOD_MANAGER, b"");
    let rec = env.evaluate(&job);
    assert!(rec.success, "{:?}", rec);
    assert_eq!(rec.outcome, Some(1.0));
    assert_eq!(rec.text, Some(vec!["success".to_string()]));
    assert_eq!(rec.stats.unwrap().exit_status, "ok");
    assert_eq!(env.scratch_dirs(), 0);
    assert_eq!(env.sandboxes(), 0);
}

#[test]
fn non_interactive_accept_and_reject() {
    let _guard = serial();
    let env = Env::new();
    let accepted = env.evaluate(&env.job(Interactivity::NonInteractive, SUM, CMP_MANAGER, b"3\n"));
    assert_eq!(accepted.outcome, Some(1.0));
    assert_eq!(accepted.text, Some(vec!["success".to_string()]));

    let rejected = env.evaluate(&env.job(Interactivity::NonInteractive, SUM, CMP_MANAGER, b"4\n"));
    assert!(rejected.success);
    assert_eq!(rejected.outcome, Some(0.0));
    assert_eq!(rejected.text, Some(vec!["wrong".to_string()]));
}

#[test]
fn multiplier_gives_partial_score() {
    let _guard = serial();
    let env = Env::new();
    let rec = env.evaluate(&env.job(Interactivity::NonInteractive, SUM, HALF_MANAGER, b"3\n"));
    assert_eq!(rec.outcome, Some(0.5));
    assert_eq!(rec.text, Some(vec!["partial".to_string()]));
}

#[test]
fn user_timeout_is_zero_even_if_manager_accepts() {
    let _guard = serial();
    let env = Env::new();
    let mut job = env.job(Interactivity::Interactive, SLEEPER, ACCEPT_MANAGER, b"");
    job.time_limit = 0.5;
    let rec = env.evaluate(&job);
    assert!(rec.success, "{:?}", rec);
    assert_eq!(rec.outcome, Some(0.0));
    assert_eq!(
        rec.text,
        Some(vec!["Execution timed out (wall clock limit exceeded)".to_string()])
    );
    assert_eq!(rec.stats.unwrap().exit_status, "timeout-wall");
}

#[test]
fn broken_manager_keeps_everything_on_disk() {
    let _guard = serial();
    let env = Env::new();
    let rec = env.evaluate(&env.job(Interactivity::NonInteractive, SUM, BROKEN_MANAGER, b"3\n"));
    assert!(!rec.success);
    assert_eq!(rec.outcome, None);
    assert_eq!(rec.text, None);
    // feedback and output dirs
    assert_eq!(env.scratch_dirs(), 2);
    assert_eq!(env.sandboxes(), 2);
}

#[test]
fn retention_on_request() {
    let _guard = serial();
    let env = Env::new();
    let mut job = env.job(Interactivity::Interactive, ECHO, FLOOD_MANAGER, b"");
    job.keep_sandbox = true;
    let rec = env.evaluate(&job);
    assert!(rec.success);
    // channel and feedback dirs
    assert_eq!(env.scratch_dirs(), 2);
    assert_eq!(env.sandboxes(), 2);
}

#[test]
fn compile_then_evaluate() {
    let _guard = serial();
    let env = Env::new();
    let mut files = BTreeMap::new();
    files.insert("solution.%l".to_string(), env.storage.put(SUM, "source").unwrap());
    let compilation = CompilationJob {
        info: "e2e compile".to_string(),
        task_type: TaskTypeParams {
            interactive: Interactivity::NonInteractive,
            stub: false,
        },
        language: "Shell".to_string(),
        files,
        managers: BTreeMap::new(),
        keep_sandbox: false,
        multithreaded_sandbox: false,
    };
    let task = TaskType::new(compilation.task_type.clone());
    let out = task.compile(&env.ctx(), &compilation);
    assert!(out.success);
    assert_eq!(out.compilation_success, Some(true));
    let exe = out.executable.unwrap();
    assert_eq!(exe.filename, "solution");
    assert_eq!(env.storage.get(&exe.digest).unwrap(), SUM);

    let mut job = env.job(Interactivity::NonInteractive, SUM, CMP_MANAGER, b"3\n");
    job.executables.insert("solution".to_string(), exe);
    let rec = task.evaluate(&env.ctx(), &job);
    assert_eq!(rec.outcome, Some(1.0));
}

#[test]
fn compiler_errors_are_reported() {
    let _guard = serial();
    let env = Env::new();
    let mut files = BTreeMap::new();
    files.insert("solution.%l".to_string(), env.storage.put(SUM, "source").unwrap());
    let compilation = CompilationJob {
        info: "e2e broken compile".to_string(),
        task_type: TaskTypeParams {
            interactive: Interactivity::Interactive,
            stub: false,
        },
        language: "Broken shell".to_string(),
        files,
        managers: BTreeMap::new(),
        keep_sandbox: false,
        multithreaded_sandbox: false,
    };
    let out = TaskType::new(compilation.task_type.clone()).compile(&env.ctx(), &compilation);
    assert!(out.success);
    assert_eq!(out.compilation_success, Some(false));
    assert_eq!(out.text, ["Compilation failed"]);
    assert_eq!(out.stderr, "syntax error\n");
    assert!(out.executable.is_none());
}
