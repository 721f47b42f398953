//! Invoker runs untrusted solutions together with trusted manager programs
//! in sandboxes and turns what happened into a scored verdict.
pub mod channel;
pub mod checks;
pub mod compiler;
pub mod config;
pub mod context;
mod errors;
pub mod evaluation;
pub mod interactive;
pub mod language;
pub mod messages;
pub mod non_interactive;
pub mod outcome;
pub mod reducer;
pub mod steps;
pub mod storage;
pub mod task_type;
#[cfg(test)]
pub(crate) mod testing;

pub use config::InvokerConfig;
pub use context::InvokeContext;
pub use errors::EvaluationError;
pub use language::{Language, Languages};
pub use storage::{FsStorage, Storage};
pub use task_type::{Orchestrator, TaskType};
