use crate::{compiler, context::InvokeContext, interactive, non_interactive};
use invoker_api::{
    CompilationJob, CompilationOutcome, EvaluationJob, Interactivity, OutcomeRecord,
    TaskTypeParams,
};
use tracing::{info, warn};

/// Evaluation strategy, chosen once per task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orchestrator {
    Interactive,
    NonInteractive,
}

impl Orchestrator {
    /// Never fails: problems are logged and reported as a failure record
    pub fn evaluate(self, ctx: &InvokeContext, job: &EvaluationJob) -> OutcomeRecord {
        let result = match self {
            Orchestrator::Interactive => interactive::evaluate(ctx, job),
            Orchestrator::NonInteractive => non_interactive::evaluate(ctx, job),
        };
        match result {
            Ok(record) => {
                info!(job = %job.info, outcome = ?record.outcome, status = %record.status.code, "evaluated");
                record
            }
            Err(err) => {
                err.log(&job.info);
                warn!(
                    job = %job.info,
                    "leaving sandboxes and scratch directories under {} for inspection",
                    ctx.config.temp_dir.display()
                );
                OutcomeRecord::failure()
            }
        }
    }
}

/// Task whose solutions are judged by a manager program
#[derive(Debug, Clone)]
pub struct TaskType {
    params: TaskTypeParams,
    orchestrator: Orchestrator,
}

impl TaskType {
    pub fn new(params: TaskTypeParams) -> TaskType {
        let orchestrator = match params.interactive {
            Interactivity::Interactive => Orchestrator::Interactive,
            Interactivity::NonInteractive => Orchestrator::NonInteractive,
        };
        TaskType {
            params,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator
    }

    pub fn uses_stub(&self) -> bool {
        self.params.stub
    }

    pub fn compile(&self, ctx: &InvokeContext, job: &CompilationJob) -> CompilationOutcome {
        if job.task_type.stub != self.uses_stub() {
            warn!(job = %job.info, "job stub flag disagrees with task type, using task type");
        }
        let mut job = job.clone();
        job.task_type = self.params.clone();
        match compiler::compile(ctx, &job) {
            Ok(outcome) => outcome,
            Err(err) => {
                err.log(&job.info);
                CompilationOutcome::failure()
            }
        }
    }

    pub fn evaluate(&self, ctx: &InvokeContext, job: &EvaluationJob) -> OutcomeRecord {
        self.orchestrator.evaluate(ctx, job)
    }
}
