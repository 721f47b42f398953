//! Running commands in sandboxes and interpreting their telemetry
use crate::{config::InvokerConfig, language::CommandLine, messages};
use anyhow::{bail, Context};
use invoker_api::EvaluationStats;
use minion::{ExecutionStats, ExitStatus, Sandbox};
use std::path::Path;
use tracing::{debug, warn};

pub const COMPILER_STDOUT: &str = "compiler_stdout.txt";
pub const COMPILER_STDERR: &str = "compiler_stderr.txt";

/// Result of one sandboxed process, as seen by the orchestrators
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Sandbox worked correctly, so `stats` can be trusted
    pub box_success: bool,
    /// Process terminated normally within its limits
    pub evaluation_success: bool,
    pub stats: ExecutionStats,
}

impl StepResult {
    pub fn from_stats(stats: ExecutionStats) -> StepResult {
        StepResult {
            box_success: stats.exit_status != ExitStatus::SandboxError,
            evaluation_success: stats.exit_status == ExitStatus::Ok,
            stats,
        }
    }
}

/// Inspects the last process waited for in `sandbox`
pub fn collect_result(sandbox: &dyn Sandbox) -> StepResult {
    match sandbox.last_stats() {
        Some(stats) => StepResult::from_stats(stats),
        None => {
            warn!(sandbox = sandbox.name(), "no process was waited for in sandbox");
            StepResult::from_stats(ExecutionStats::sandbox_error())
        }
    }
}

pub fn stats_to_wire(stats: &ExecutionStats) -> EvaluationStats {
    let exit_status = match stats.exit_status {
        ExitStatus::Ok => "ok",
        ExitStatus::NonzeroReturn => "nonzero-return",
        ExitStatus::Signal => "signal",
        ExitStatus::Timeout => "timeout",
        ExitStatus::TimeoutWall => "timeout-wall",
        ExitStatus::MemoryLimit => "memory-limit",
        ExitStatus::SandboxError => "sandbox-error",
    };
    EvaluationStats {
        exit_status: exit_status.to_string(),
        exit_code: stats.exit_code,
        signal: stats.signal,
        execution_time: stats.execution_time,
        wall_clock_time: stats.wall_clock_time,
        memory_used: stats.memory_used,
    }
}

/// Stats of several consecutive processes: times are summed, memory is
/// maxed, exit status comes from `later`
pub fn merge_execution_stats(
    earlier: Option<&ExecutionStats>,
    later: &ExecutionStats,
) -> ExecutionStats {
    match earlier {
        None => later.clone(),
        Some(prev) => ExecutionStats {
            execution_time: prev.execution_time + later.execution_time,
            wall_clock_time: prev.wall_clock_time + later.wall_clock_time,
            memory_used: prev.memory_used.max(later.memory_used),
            ..later.clone()
        },
    }
}

/// Starts `cmd` and waits for it.
///
/// A launch failure blamed on the process becomes a sandbox-error stats;
/// a system failure is returned as error.
pub fn run_to_completion(
    sandbox: &dyn Sandbox,
    cmd: &minion::Command,
) -> anyhow::Result<ExecutionStats> {
    debug!(sandbox = sandbox.name(), argv = ?cmd.options().argv, "running command");
    let child = match cmd.spawn(sandbox) {
        Ok(child) => child,
        Err(err) if err.is_sandbox() => {
            warn!(sandbox = sandbox.name(), "launch failed: {}", err);
            return Ok(ExecutionStats::sandbox_error());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to start in {}", sandbox.name()))
        }
    };
    child
        .wait()
        .with_context(|| format!("failed to wait in {}", sandbox.name()))
}

/// Runs admin-controlled commands one by one with trusted limits.
/// Any of them failing is an infrastructure problem.
pub fn trusted_step(
    sandbox: &dyn Sandbox,
    commands: &[CommandLine],
    config: &InvokerConfig,
) -> anyhow::Result<()> {
    for argv in commands {
        let mut cmd = minion::Command::new();
        cmd.args(argv)
            .wall_time_limit(config.trusted_time_limit())
            .memory_limit(config.trusted_memory_limit())
            .multiprocess(true);
        let stats = run_to_completion(sandbox, &cmd)?;
        if stats.exit_status != ExitStatus::Ok {
            bail!(
                "trusted command {:?} failed in {}: {:?}",
                argv,
                sandbox.name(),
                stats.exit_status
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CompilationStepResult {
    pub box_success: bool,
    /// `None` unless `box_success`
    pub compilation_success: Option<bool>,
    pub text: Vec<String>,
    pub stats: Option<ExecutionStats>,
    pub stdout: String,
    pub stderr: String,
}

fn read_lossy(sandbox: &dyn Sandbox, name: &str) -> String {
    match sandbox.read_file(Path::new(name)) {
        Ok(data) => String::from_utf8_lossy(&data).into_owned(),
        Err(_) => String::new(),
    }
}

/// Runs compilation commands in order, stopping at the first failure
pub fn compilation_step(
    sandbox: &dyn Sandbox,
    commands: &[CommandLine],
    config: &InvokerConfig,
) -> anyhow::Result<CompilationStepResult> {
    let mut merged: Option<ExecutionStats> = None;
    let mut stdout = String::new();
    let mut stderr = String::new();
    for argv in commands {
        let mut cmd = minion::Command::new();
        cmd.args(argv)
            .wall_time_limit(config.compilation_time_limit())
            .memory_limit(config.compilation_memory_limit())
            .stdout(COMPILER_STDOUT)
            .stderr(COMPILER_STDERR)
            .multiprocess(true);
        let stats = run_to_completion(sandbox, &cmd)?;
        stdout.push_str(&read_lossy(sandbox, COMPILER_STDOUT));
        stderr.push_str(&read_lossy(sandbox, COMPILER_STDERR));
        let status = stats.exit_status;
        merged = Some(merge_execution_stats(merged.as_ref(), &stats));
        if status != ExitStatus::Ok {
            break;
        }
    }

    let stats = match merged {
        Some(stats) => stats,
        None => bail!("no compilation commands"),
    };
    let (box_success, compilation_success, text) = match stats.exit_status {
        ExitStatus::Ok => (true, Some(true), messages::COMPILATION_SUCCEEDED.to_string()),
        ExitStatus::NonzeroReturn | ExitStatus::MemoryLimit => {
            (true, Some(false), messages::COMPILATION_FAILED.to_string())
        }
        ExitStatus::Timeout | ExitStatus::TimeoutWall => {
            (true, Some(false), messages::COMPILATION_TIMED_OUT.to_string())
        }
        ExitStatus::Signal => (
            true,
            Some(false),
            messages::compilation_killed_by_signal(stats.signal),
        ),
        ExitStatus::SandboxError => (false, None, String::new()),
    };
    let text = if box_success { vec![text] } else { Vec::new() };
    Ok(CompilationStepResult {
        box_success,
        compilation_success,
        text,
        stats: Some(stats),
        stdout,
        stderr,
    })
}
