//! Pieces shared by both orchestrators
use crate::{
    channel::ScratchDir,
    checks::{self, MANAGER_FILENAME},
    config::{secs_to_duration, InvokerConfig},
    context::InvokeContext,
    errors::EvaluationError,
    language::CommandLine,
    steps,
};
use anyhow::Context;
use invoker_api::EvaluationJob;
use minion::Sandbox;
use std::path::Path;
use tracing::debug;

pub const INPUT_FILENAME: &str = "input.txt";
pub const ANSWER_FILENAME: &str = "answer.txt";
pub const OUTPUT_FILENAME: &str = "output.txt";
pub const FEEDBACK_MOUNT: &str = "feedback";
pub const OUTPUT_MOUNT: &str = "output";

/// Job contents fetched from storage, ready to be put into sandboxes
#[derive(Debug)]
pub struct Prepared {
    executable_name: String,
    executable: Vec<u8>,
    manager: Vec<u8>,
    input: Vec<u8>,
    answer: Vec<u8>,
    setup: Vec<CommandLine>,
    user_argv: CommandLine,
}

impl Prepared {
    /// Validates `job` and fetches everything it refers to
    pub fn fetch(ctx: &InvokeContext, job: &EvaluationJob) -> Result<Prepared, EvaluationError> {
        let (executable, manager) = checks::check_evaluation_job(job)?;
        let language = ctx.languages.get(&job.language).ok_or_else(|| {
            EvaluationError::invalid_job(format!("unknown language {:?}", job.language))
        })?;
        let mut commands = language.evaluation_commands(&executable.filename);
        let user_argv = match commands.pop() {
            Some(argv) if !argv.is_empty() => argv,
            _ => {
                return Err(EvaluationError::invalid_job(format!(
                    "language {} has no evaluation command",
                    language.name()
                )))
            }
        };
        Ok(Prepared {
            executable_name: executable.filename.clone(),
            executable: ctx.fetch(&executable.digest, "executable")?,
            manager: ctx.fetch(&manager.digest, "manager")?,
            input: ctx.fetch(&job.input, "input")?,
            answer: ctx.fetch(&job.output, "answer")?,
            setup: commands,
            user_argv,
        })
    }

    pub fn populate_manager(&self, sandbox: &dyn Sandbox) -> anyhow::Result<()> {
        sandbox.create_file(Path::new(MANAGER_FILENAME), &self.manager, true)?;
        sandbox.create_file(Path::new(INPUT_FILENAME), &self.input, false)?;
        sandbox.create_file(Path::new(ANSWER_FILENAME), &self.answer, false)?;
        Ok(())
    }

    /// Puts executable (and input, if `with_input`) into the sandbox
    pub fn populate_user(&self, sandbox: &dyn Sandbox, with_input: bool) -> anyhow::Result<()> {
        sandbox.create_file(Path::new(&self.executable_name), &self.executable, true)?;
        if with_input {
            sandbox.create_file(Path::new(INPUT_FILENAME), &self.input, false)?;
        }
        Ok(())
    }

    /// Setup commands run in the user sandbox, before the measured process
    pub fn run_setup(&self, sandbox: &dyn Sandbox, config: &InvokerConfig) -> anyhow::Result<()> {
        if !self.setup.is_empty() {
            debug!(count = self.setup.len(), "running setup commands");
            steps::trusted_step(sandbox, &self.setup, config).context("setup command failed")?;
        }
        Ok(())
    }

    pub fn user_command(&self, job: &EvaluationJob) -> minion::Command {
        let limit = secs_to_duration(job.time_limit);
        let mut cmd = minion::Command::new();
        cmd.args(&self.user_argv)
            .wall_time_limit(limit)
            .cpu_time_limit(limit)
            .memory_limit(job.memory_limit)
            .multiprocess(job.multithreaded_sandbox);
        cmd
    }
}

/// `manager <input> <answer> <feedback dir>` with trusted limits
pub fn manager_command(
    config: &InvokerConfig,
    job: &EvaluationJob,
    feedback: &ScratchDir,
) -> minion::Command {
    let mut cmd = minion::Command::new();
    cmd.path(format!("./{}", MANAGER_FILENAME))
        .arg(INPUT_FILENAME)
        .arg(ANSWER_FILENAME)
        .arg(feedback.sandbox_dir())
        .mount(feedback.mount())
        .wall_time_limit(config.manager_time_limit(job.time_limit))
        .memory_limit(config.trusted_memory_limit())
        .multiprocess(job.multithreaded_sandbox);
    cmd
}
