use anyhow::Context;
use clap::{Parser, Subcommand};
use invoker::{FsStorage, InvokeContext, InvokerConfig, Languages, Storage, TaskType};
use invoker_api::{CompilationJob, EvaluationJob};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "invoker", about = "Compiles and evaluates submissions")]
struct Cli {
    /// Path to invoker config. Defaults to $INVOKER_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Puts a file into storage and prints its digest
    Store { file: PathBuf },
    /// Compiles submission described by a YAML job file
    Compile { job: PathBuf },
    /// Evaluates executable described by a YAML job file
    Evaluate { job: PathBuf },
}

fn real_main(cli: Cli) -> anyhow::Result<()> {
    let config: InvokerConfig =
        util::cfg::load_cfg_data(cli.config.as_deref()).context("failed to load config")?;
    debug!(config = ?config, "loaded config");
    let storage = FsStorage::new(config.storage_dir())?;
    let backend = minion::LocalBackend::new(config.temp_dir.join("sandboxes"));
    let languages = Languages::builtin();
    let ctx = InvokeContext {
        config: &config,
        backend: &backend,
        storage: &storage,
        languages: &languages,
    };

    match cli.command {
        Command::Store { file } => {
            let data =
                std::fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let digest = storage.put(&data, &file.display().to_string())?;
            println!("{}", digest);
        }
        Command::Compile { job } => {
            let job: CompilationJob = util::cfg::load_yaml(&job)?;
            let outcome = TaskType::new(job.task_type.clone()).compile(&ctx, &job);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Evaluate { job } => {
            let job: EvaluationJob = util::cfg::load_yaml(&job)?;
            let record = TaskType::new(job.task_type.clone()).evaluate(&ctx, &job);
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}

fn main() {
    dotenv::dotenv().ok();
    util::log::setup();
    let cli = Cli::parse();
    if let Err(err) = real_main(cli) {
        util::print_error(&*err);
        std::process::exit(1);
    }
}
