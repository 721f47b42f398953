//! User process runs to completion first, then manager checks its output
use crate::{
    channel::ScratchDir,
    context::{release_logged, release_sandboxes, InvokeContext},
    errors::EvaluationError,
    evaluation::{self, Prepared, FEEDBACK_MOUNT, INPUT_FILENAME, OUTPUT_FILENAME, OUTPUT_MOUNT},
    reducer,
    steps::collect_result,
};
use anyhow::{anyhow, Context};
use invoker_api::{EvaluationJob, OutcomeRecord};
use tracing::{debug, instrument};

#[instrument(skip(ctx, job), fields(job = %job.info))]
pub fn evaluate(
    ctx: &InvokeContext,
    job: &EvaluationJob,
) -> Result<OutcomeRecord, EvaluationError> {
    let prepared = Prepared::fetch(ctx, job)?;
    let temp_dir = &ctx.config.temp_dir;

    let feedback =
        ScratchDir::create(temp_dir, FEEDBACK_MOUNT).context("failed to create feedback dir")?;
    let output =
        ScratchDir::create(temp_dir, OUTPUT_MOUNT).context("failed to create output dir")?;
    let user_sandbox = ctx.create_sandbox("user")?;
    let manager_sandbox = ctx.create_sandbox("manager")?;
    prepared.populate_manager(&*manager_sandbox)?;
    prepared.populate_user(&*user_sandbox, true)?;
    prepared.run_setup(&*user_sandbox, ctx.config)?;

    let mut user_cmd = prepared.user_command(job);
    user_cmd
        .mount(output.mount())
        .stdin(INPUT_FILENAME)
        .stdout(output.sandbox_path(OUTPUT_FILENAME));
    let user = user_cmd
        .spawn(&*user_sandbox)
        .context("failed to start user process")?;
    minion::wait_all(vec![user]).context("failed to wait for user process")?;
    let user_result = collect_result(&*user_sandbox);
    debug!(stats = ?user_result.stats, "user process finished");
    if !user_result.box_success {
        return Err(anyhow!("user sandbox failed: {:?}", user_result.stats).into());
    }

    // user process is gone, so its output is complete
    let mut manager_cmd = evaluation::manager_command(ctx.config, job, &feedback);
    manager_cmd
        .mount(output.mount())
        .stdin(output.sandbox_path(OUTPUT_FILENAME));
    let manager = manager_cmd
        .spawn(&*manager_sandbox)
        .context("failed to start manager")?;
    minion::wait_all(vec![manager]).context("failed to wait for manager")?;
    let manager_result = collect_result(&*manager_sandbox);
    debug!(stats = ?manager_result.stats, "manager finished");

    let record = reducer::reduce(&user_result, &manager_result, job.only_execution, feedback.path())?;

    let delete = ctx.should_delete(record.success, job.keep_sandbox);
    release_sandboxes(vec![user_sandbox, manager_sandbox], delete);
    release_logged("output dir", output.release(delete));
    release_logged("feedback dir", feedback.release(delete));
    Ok(record)
}
