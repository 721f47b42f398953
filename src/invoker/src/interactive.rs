//! Manager and user process talking through a pair of FIFOs.
//!
//! Both processes are started before the single joint wait, and the
//! invoker never opens the FIFOs itself: data only flows between the peers.
use crate::{
    channel::{ChannelPair, ScratchDir},
    context::{release_logged, release_sandboxes, InvokeContext},
    errors::EvaluationError,
    evaluation::{self, Prepared, FEEDBACK_MOUNT},
    reducer,
    steps::collect_result,
};
use anyhow::Context;
use invoker_api::{EvaluationJob, OutcomeRecord};
use tracing::{debug, instrument, warn};

/// Progress of one interactive evaluation. Stages are strictly sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    ChannelsReady,
    ManagerStarted,
    UserStarted,
    BothRunning,
    Collected,
    CleanedUp,
}

#[derive(Debug)]
struct Progress {
    stage: Stage,
}

impl Progress {
    fn new() -> Progress {
        Progress { stage: Stage::Init }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "{:?} -> {:?}", self.stage, next);
        debug!(from = ?self.stage, to = ?next, "stage changed");
        self.stage = next;
    }
}

#[instrument(skip(ctx, job), fields(job = %job.info))]
pub fn evaluate(
    ctx: &InvokeContext,
    job: &EvaluationJob,
) -> Result<OutcomeRecord, EvaluationError> {
    let prepared = Prepared::fetch(ctx, job)?;
    let mut progress = Progress::new();
    let temp_dir = &ctx.config.temp_dir;

    let channels = ChannelPair::create(temp_dir).context("failed to create channels")?;
    let feedback =
        ScratchDir::create(temp_dir, FEEDBACK_MOUNT).context("failed to create feedback dir")?;
    let manager_sandbox = ctx.create_sandbox("manager")?;
    let user_sandbox = ctx.create_sandbox("user")?;
    prepared.populate_manager(&*manager_sandbox)?;
    prepared.populate_user(&*user_sandbox, false)?;
    prepared.run_setup(&*user_sandbox, ctx.config)?;
    progress.advance(Stage::ChannelsReady);

    // opposite open orders: manager reads first, user writes first
    let mut manager_cmd = evaluation::manager_command(ctx.config, job, &feedback);
    manager_cmd
        .mount(channels.mount())
        .stdin(channels.sandbox_user_to_manager())
        .stdout(channels.sandbox_manager_to_user());
    let manager = manager_cmd
        .spawn(&*manager_sandbox)
        .context("failed to start manager")?;
    progress.advance(Stage::ManagerStarted);

    let mut user_cmd = prepared.user_command(job);
    user_cmd
        .mount(channels.mount())
        .stdin(channels.sandbox_manager_to_user())
        .stdout(channels.sandbox_user_to_manager())
        .open_stdout_first(true);
    let user = match user_cmd.spawn(&*user_sandbox) {
        Ok(user) => user,
        Err(err) => {
            // manager stays blocked on the channel until its own limit
            if let Err(wait_err) = manager.wait() {
                warn!("failed to wait for orphaned manager: {}", wait_err);
            }
            return Err(anyhow::Error::new(err)
                .context("failed to start user process")
                .into());
        }
    };
    progress.advance(Stage::UserStarted);

    progress.advance(Stage::BothRunning);
    minion::wait_all(vec![manager, user]).context("failed to wait for processes")?;

    let manager_result = collect_result(&*manager_sandbox);
    let user_result = collect_result(&*user_sandbox);
    progress.advance(Stage::Collected);
    debug!(manager = ?manager_result.stats, user = ?user_result.stats, "both sides finished");

    let record = reducer::reduce(&user_result, &manager_result, job.only_execution, feedback.path())?;

    let delete = ctx.should_delete(record.success, job.keep_sandbox);
    release_sandboxes(vec![manager_sandbox, user_sandbox], delete);
    release_logged("channels", channels.release(delete));
    release_logged("feedback dir", feedback.release(delete));
    progress.advance(Stage::CleanedUp);
    Ok(record)
}
