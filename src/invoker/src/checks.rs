//! Job sanity checks, done before any sandbox exists
use crate::errors::EvaluationError;
use invoker_api::{CompilationJob, EvaluationJob, Executable, Manager};
use std::time::Duration;

pub const MANAGER_FILENAME: &str = "manager";
pub const STUB_BASENAME: &str = "stub";

pub fn check_executables_number(job: &EvaluationJob, expected: usize) -> Result<(), EvaluationError> {
    if job.executables.len() != expected {
        return Err(EvaluationError::invalid_job(format!(
            "expected {} executable(s), got {}",
            expected,
            job.executables.len()
        )));
    }
    Ok(())
}

pub fn check_files_number(job: &CompilationJob) -> Result<(), EvaluationError> {
    if job.files.is_empty() {
        return Err(EvaluationError::invalid_job("no files to compile"));
    }
    Ok(())
}

pub fn check_manager_present<'a>(
    job: &'a EvaluationJob,
    filename: &str,
) -> Result<&'a Manager, EvaluationError> {
    job.managers.get(filename).ok_or_else(|| {
        EvaluationError::invalid_job(format!("manager {:?} not provided", filename))
    })
}

pub fn check_limits(job: &EvaluationJob) -> Result<(), EvaluationError> {
    if !(job.time_limit.is_finite() && job.time_limit > 0.0) {
        return Err(EvaluationError::invalid_job(format!(
            "time limit {} is not positive",
            job.time_limit
        )));
    }
    // manager gets one more second
    if Duration::try_from_secs_f64(job.time_limit + 1.0).is_err() {
        return Err(EvaluationError::invalid_job(format!(
            "time limit {} is too large",
            job.time_limit
        )));
    }
    if job.memory_limit == 0 {
        return Err(EvaluationError::invalid_job("memory limit is zero"));
    }
    Ok(())
}

/// Full check of an evaluation job, returning its only executable and manager
pub fn check_evaluation_job(
    job: &EvaluationJob,
) -> Result<(&Executable, &Manager), EvaluationError> {
    check_executables_number(job, 1)?;
    check_limits(job)?;
    let manager = check_manager_present(job, MANAGER_FILENAME)?;
    let executable = job
        .executables
        .values()
        .next()
        .ok_or_else(|| EvaluationError::invalid_job("no executable"))?;
    Ok((executable, manager))
}
