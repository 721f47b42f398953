use tracing::{error, warn};

/// Reasons an evaluation produced no verdict
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// Could not create pipes, directories or sandboxes, or sandbox misbehaved
    #[error("infrastructure failure: {0:#}")]
    Infrastructure(#[from] anyhow::Error),
    /// Admin-provided manager broke its contract
    #[error("manager malfunction: {reason}")]
    ManagerMalfunction { reason: String },
    #[error("invalid job: {reason}")]
    InvalidJob { reason: String },
}

impl EvaluationError {
    pub fn manager(reason: impl Into<String>) -> EvaluationError {
        EvaluationError::ManagerMalfunction {
            reason: reason.into(),
        }
    }

    pub fn invalid_job(reason: impl Into<String>) -> EvaluationError {
        EvaluationError::InvalidJob {
            reason: reason.into(),
        }
    }

    pub fn is_manager_fault(&self) -> bool {
        matches!(self, EvaluationError::ManagerMalfunction { .. })
    }

    /// Logs error under a category telling who is to blame
    pub fn log(&self, job: &str) {
        match self {
            EvaluationError::Infrastructure(err) => {
                error!(fault = "infrastructure", job, "evaluation aborted: {:#}", err)
            }
            EvaluationError::ManagerMalfunction { reason } => {
                error!(fault = "manager", job, "manager malfunction: {}", reason)
            }
            EvaluationError::InvalidJob { reason } => {
                warn!(fault = "job", job, "job rejected: {}", reason)
            }
        }
    }
}

impl From<minion::Error> for EvaluationError {
    fn from(err: minion::Error) -> Self {
        EvaluationError::Infrastructure(err.into())
    }
}
