pub mod job;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub use job::{
    CompilationJob, Digest, EvaluationJob, Executable, Interactivity, Manager, TaskTypeParams,
};

#[derive(
    Clone, Copy, Debug, Display, EnumString, PartialEq, Eq, Serialize, Deserialize, Hash,
)]
pub enum StatusKind {
    /// WA, TLE, compilation error etc
    Rejected,
    Accepted,
    /// Run was not judged: sandbox or manager failed
    InternalError,
}

pub mod status_codes {
    macro_rules! declare_code {
        ($code: ident) => {
            pub const $code: &str = stringify!($code);
        };

        ($code: ident, $($codes: ident),+) => {
             declare_code!($code);
             declare_code!($($codes),+);
        };
    }

    declare_code!(
        TIME_LIMIT_EXCEEDED,
        MEMORY_LIMIT_EXCEEDED,
        RUNTIME_ERROR,
        TEST_PASSED,
        PARTIAL_SOLUTION,
        WRONG_ANSWER,
        EXECUTED,
        JUDGE_FAULT
    );
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Status {
    pub kind: StatusKind,
    pub code: String,
}

impl Status {
    pub fn new(kind: StatusKind, code: &str) -> Status {
        Status {
            kind,
            code: code.to_string(),
        }
    }

    pub fn judge_fault() -> Status {
        Status::new(StatusKind::InternalError, status_codes::JUDGE_FAULT)
    }
}

/// Resource usage of a sandboxed process, as reported to the outside world
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct EvaluationStats {
    /// One of `ok`, `nonzero-return`, `signal`, `timeout`, `timeout-wall`,
    /// `memory-limit`, `sandbox-error`
    pub exit_status: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// CPU seconds
    pub execution_time: f64,
    pub wall_clock_time: f64,
    /// Bytes
    pub memory_used: u64,
}

/// Final result of one evaluation.
///
/// `outcome` is `None` unless both manager and user side completed without
/// sandbox malfunction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct OutcomeRecord {
    pub success: bool,
    /// Normalized score in `[0, 1]`
    pub outcome: Option<f64>,
    pub text: Option<Vec<String>>,
    /// Statistics of the user process
    pub stats: Option<EvaluationStats>,
    pub status: Status,
}

impl OutcomeRecord {
    /// Record for an evaluation which could not be completed
    pub fn failure() -> OutcomeRecord {
        OutcomeRecord {
            success: false,
            outcome: None,
            text: None,
            stats: None,
            status: Status::judge_fault(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CompilationOutcome {
    /// False if sandbox failed, i.e. result is unusable
    pub success: bool,
    /// Meaningful only if `success` is true
    pub compilation_success: Option<bool>,
    pub text: Vec<String>,
    pub stats: Option<EvaluationStats>,
    pub stdout: String,
    pub stderr: String,
    pub executable: Option<Executable>,
}

impl CompilationOutcome {
    pub fn failure() -> CompilationOutcome {
        CompilationOutcome {
            success: false,
            compilation_success: None,
            text: Vec::new(),
            stats: None,
            stdout: String::new(),
            stderr: String::new(),
            executable: None,
        }
    }
}
