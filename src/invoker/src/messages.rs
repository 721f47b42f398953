//! Texts shown to contestants
use minion::{ExecutionStats, ExitStatus};

pub const SUCCESS: &str = "success";
pub const PARTIAL: &str = "partial";
pub const WRONG: &str = "wrong";

pub const EXECUTION_COMPLETED: &str = "Execution completed successfully";
pub const EXECUTION_TIMED_OUT: &str = "Execution timed out";
pub const EXECUTION_WALL_TIMED_OUT: &str = "Execution timed out (wall clock limit exceeded)";
pub const MEMORY_LIMIT_EXCEEDED: &str = "Memory limit exceeded";
pub const NONZERO_RETURN: &str = "Execution failed because the return code was nonzero";

pub const COMPILATION_SUCCEEDED: &str = "Compilation succeeded";
pub const COMPILATION_FAILED: &str = "Compilation failed";
pub const COMPILATION_TIMED_OUT: &str = "Compilation timed out";

pub fn killed_by_signal(signal: Option<i32>) -> String {
    match signal {
        Some(sig) => format!("Execution killed by signal {}", sig),
        None => "Execution killed by signal".to_string(),
    }
}

pub fn compilation_killed_by_signal(signal: Option<i32>) -> String {
    match signal {
        Some(sig) => format!("Compilation killed with signal {}", sig),
        None => "Compilation killed with signal".to_string(),
    }
}

/// Explains why the user process did not finish normally.
/// Empty for a normal exit and for sandbox errors.
pub fn human_evaluation_message(stats: &ExecutionStats) -> Vec<String> {
    let text = match stats.exit_status {
        ExitStatus::Timeout => EXECUTION_TIMED_OUT.to_string(),
        ExitStatus::TimeoutWall => EXECUTION_WALL_TIMED_OUT.to_string(),
        ExitStatus::MemoryLimit => MEMORY_LIMIT_EXCEEDED.to_string(),
        ExitStatus::Signal => killed_by_signal(stats.signal),
        ExitStatus::NonzeroReturn => NONZERO_RETURN.to_string(),
        ExitStatus::Ok | ExitStatus::SandboxError => return Vec::new(),
    };
    vec![text]
}
