//! Job descriptors accepted by invoker
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hex-encoded content digest of a file in storage
pub type Digest = String;

/// Compiled submission
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Executable {
    pub filename: String,
    pub digest: Digest,
}

/// Admin-provided file of a task: manager program, stub source, etc
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manager {
    pub filename: String,
    pub digest: Digest,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Interactivity {
    /// Manager and solution talk through a pair of FIFOs
    Interactive,
    /// Solution runs to completion, then manager checks its output
    NonInteractive,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "kebab-case")]
pub struct TaskTypeParams {
    pub interactive: Interactivity,
    /// Compile submission together with admin-provided `stub.<ext>`
    #[serde(default)]
    pub stub: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "kebab-case")]
pub struct EvaluationJob {
    /// Human-readable description, used in logs
    pub info: String,
    pub task_type: TaskTypeParams,
    pub language: String,
    /// Wall-clock limit of the user process, seconds
    pub time_limit: f64,
    /// Memory limit of the user process, bytes
    pub memory_limit: u64,
    /// Digest of test input
    pub input: Digest,
    /// Digest of official answer
    pub output: Digest,
    /// Keyed by filename
    pub executables: BTreeMap<String, Executable>,
    /// Keyed by filename
    pub managers: BTreeMap<String, Manager>,
    /// Only report whether the solution ran, not a verdict
    #[serde(default)]
    pub only_execution: bool,
    #[serde(default)]
    pub keep_sandbox: bool,
    #[serde(default)]
    pub multithreaded_sandbox: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "kebab-case")]
pub struct CompilationJob {
    pub info: String,
    pub task_type: TaskTypeParams,
    pub language: String,
    /// Submitted sources keyed by codename, e.g. `solution.%l`
    pub files: BTreeMap<String, Digest>,
    #[serde(default)]
    pub managers: BTreeMap<String, Manager>,
    #[serde(default)]
    pub keep_sandbox: bool,
    #[serde(default)]
    pub multithreaded_sandbox: bool,
}
