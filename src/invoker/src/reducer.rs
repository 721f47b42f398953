//! Merging results of both sides into the final record
use crate::{
    errors::EvaluationError,
    messages,
    outcome::{self, extract_outcome},
    steps::{stats_to_wire, StepResult},
};
use anyhow::anyhow;
use invoker_api::{status_codes, OutcomeRecord, Status, StatusKind};
use minion::ExitStatus;
use std::path::Path;

/// Whether the manager completed and reported a verdict.
///
/// Exit codes 42 and 43 are nonzero, but they are the only healthy ones.
pub fn manager_evaluation_success(manager: &StepResult) -> bool {
    manager.box_success && outcome::is_verdict(&manager.stats)
}

fn violation_status(user: &StepResult) -> Status {
    let code = match user.stats.exit_status {
        ExitStatus::Timeout | ExitStatus::TimeoutWall => status_codes::TIME_LIMIT_EXCEEDED,
        ExitStatus::MemoryLimit => status_codes::MEMORY_LIMIT_EXCEEDED,
        _ => status_codes::RUNTIME_ERROR,
    };
    Status::new(StatusKind::Rejected, code)
}

fn verdict_status(outcome: f64) -> Status {
    if outcome >= 1.0 {
        Status::new(StatusKind::Accepted, status_codes::TEST_PASSED)
    } else if outcome > 0.0 {
        Status::new(StatusKind::Rejected, status_codes::PARTIAL_SOLUTION)
    } else {
        Status::new(StatusKind::Rejected, status_codes::WRONG_ANSWER)
    }
}

/// Produces the final record of one evaluation.
///
/// Every case where no verdict can be given is returned as an error, so the
/// caller can log it by category before reporting a failure record.
pub fn reduce(
    user: &StepResult,
    manager: &StepResult,
    only_execution: bool,
    feedback_dir: &Path,
) -> Result<OutcomeRecord, EvaluationError> {
    if !user.box_success {
        return Err(anyhow!("user sandbox failed: {:?}", user.stats).into());
    }
    if !manager.box_success {
        return Err(anyhow!("manager sandbox failed: {:?}", manager.stats).into());
    }
    if !manager_evaluation_success(manager) {
        return Err(EvaluationError::manager(format!(
            "manager finished with {:?}, exit code {:?}, signal {:?}",
            manager.stats.exit_status, manager.stats.exit_code, manager.stats.signal
        )));
    }
    let stats = Some(stats_to_wire(&user.stats));

    if only_execution {
        return Ok(OutcomeRecord {
            success: true,
            outcome: Some(0.0),
            text: Some(vec![messages::EXECUTION_COMPLETED.to_string()]),
            stats,
            status: Status::new(StatusKind::Accepted, status_codes::EXECUTED),
        });
    }

    if !user.evaluation_success {
        return Ok(OutcomeRecord {
            success: true,
            outcome: Some(0.0),
            text: Some(messages::human_evaluation_message(&user.stats)),
            stats,
            status: violation_status(user),
        });
    }

    outcome::check_feedback_dir(feedback_dir)?;
    let (value, text) = extract_outcome(&manager.stats, feedback_dir)?;
    Ok(OutcomeRecord {
        success: true,
        outcome: Some(value),
        text: Some(text),
        stats,
        status: verdict_status(value),
    })
}
