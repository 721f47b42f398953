//! Manager verdict interpretation
use crate::{errors::EvaluationError, messages};
use anyhow::Context;
use minion::ExecutionStats;
use std::{fs, io, path::Path};

pub const SCORE_MULTIPLIER_FILENAME: &str = "score_multiplier.txt";

/// Manager exit code meaning "accepted"
pub const ACCEPT: i32 = 42;
/// Manager exit code meaning "rejected"
pub const REJECT: i32 = 43;

/// Whether `stats` describe a manager which honoured the exit code contract
pub fn is_verdict(stats: &ExecutionStats) -> bool {
    matches!(stats.exit_code, Some(ACCEPT) | Some(REJECT))
}

fn read_multiplier(feedback_dir: &Path) -> Result<Option<f64>, EvaluationError> {
    let path = feedback_dir.join(SCORE_MULTIPLIER_FILENAME);
    let data = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(EvaluationError::Infrastructure(
                anyhow::Error::new(err).context(format!("failed to read {}", path.display())),
            ))
        }
    };
    let value: f64 = data
        .trim()
        .parse()
        .map_err(|_| EvaluationError::manager(format!("unparsable score multiplier {:?}", data)))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(EvaluationError::manager(format!(
            "score multiplier {} is outside [0, 1]",
            value
        )));
    }
    Ok(Some(value))
}

/// Turns the manager's exit code and feedback directory into `(outcome, text)`
pub fn extract_outcome(
    stats: &ExecutionStats,
    feedback_dir: &Path,
) -> Result<(f64, Vec<String>), EvaluationError> {
    match stats.exit_code {
        Some(REJECT) => Ok((0.0, vec![messages::WRONG.to_string()])),
        Some(ACCEPT) => {
            let outcome = read_multiplier(feedback_dir)?.unwrap_or(1.0);
            let text = if outcome > 0.0 && outcome < 1.0 {
                messages::PARTIAL
            } else {
                messages::SUCCESS
            };
            Ok((outcome, vec![text.to_string()]))
        }
        other => Err(EvaluationError::manager(format!(
            "manager exited with {:?} ({:?}), expected {} or {}",
            other, stats.exit_status, ACCEPT, REJECT
        ))),
    }
}

/// Checks the feedback directory is still a directory, so that a vanished
/// directory is not mistaken for "no multiplier"
pub fn check_feedback_dir(feedback_dir: &Path) -> anyhow::Result<()> {
    let meta = fs::metadata(feedback_dir)
        .with_context(|| format!("feedback directory {} is gone", feedback_dir.display()))?;
    anyhow::ensure!(meta.is_dir(), "{} is not a directory", feedback_dir.display());
    Ok(())
}
