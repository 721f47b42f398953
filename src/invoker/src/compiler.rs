//! Building submission into a single executable
use crate::{
    checks::{self, STUB_BASENAME},
    context::{release_sandboxes, InvokeContext},
    errors::EvaluationError,
    language::Language,
    steps::{self, stats_to_wire},
};
use anyhow::{anyhow, Context};
use invoker_api::{CompilationJob, CompilationOutcome, Executable};
use std::path::Path;
use tracing::{debug, info, instrument};

const LANGUAGE_PLACEHOLDER: &str = ".%l";

/// Name of the executable built from files with given codenames: codenames
/// without the language placeholder, sorted and joined by underscores.
pub fn executable_filename<'a>(
    codenames: impl IntoIterator<Item = &'a str>,
    language: &dyn Language,
) -> String {
    let mut names: Vec<_> = codenames
        .into_iter()
        .map(|c| c.replace(LANGUAGE_PLACEHOLDER, ""))
        .collect();
    names.sort();
    format!("{}{}", names.join("_"), language.executable_extension())
}

fn source_filename(codename: &str, language: &dyn Language) -> String {
    codename.replace(LANGUAGE_PLACEHOLDER, language.source_extension())
}

#[instrument(skip(ctx, job), fields(job = %job.info))]
pub fn compile(
    ctx: &InvokeContext,
    job: &CompilationJob,
) -> Result<CompilationOutcome, EvaluationError> {
    checks::check_files_number(job)?;
    let language = ctx.languages.get(&job.language).ok_or_else(|| {
        EvaluationError::invalid_job(format!("unknown language {:?}", job.language))
    })?;

    let mut sources = Vec::new();
    if job.task_type.stub {
        let stub_name = format!("{}{}", STUB_BASENAME, language.source_extension());
        let stub = job.managers.get(&stub_name).ok_or_else(|| {
            EvaluationError::invalid_job(format!("stub {} not provided", stub_name))
        })?;
        sources.push((stub_name, ctx.fetch(&stub.digest, "stub")?));
    }
    for (codename, digest) in &job.files {
        let data = ctx.fetch(digest, codename)?;
        sources.push((source_filename(codename, language), data));
    }
    let executable_name = executable_filename(job.files.keys().map(String::as_str), language);
    let source_names: Vec<String> = sources.iter().map(|(name, _)| name.clone()).collect();
    let commands = language.compilation_commands(&source_names, &executable_name);

    let sandbox = ctx.create_sandbox("compile")?;
    for (name, data) in &sources {
        sandbox.create_file(Path::new(name), data, false)?;
    }
    debug!(sources = ?source_names, executable = %executable_name, "compiling");
    let result = steps::compilation_step(&*sandbox, &commands, ctx.config)?;
    if !result.box_success {
        return Err(anyhow!("compilation sandbox failed: {:?}", result.stats).into());
    }

    let executable = if result.compilation_success == Some(true) {
        let data = sandbox
            .read_file(Path::new(&executable_name))
            .context("compiler reported success, but produced no executable")?;
        let digest = ctx
            .storage
            .put(&data, &format!("executable {} for {}", executable_name, job.info))?;
        info!(digest = %digest, "compilation succeeded");
        Some(Executable {
            filename: executable_name,
            digest,
        })
    } else {
        info!(text = ?result.text, "compilation failed");
        None
    };

    let delete = ctx.should_delete(true, job.keep_sandbox);
    release_sandboxes(vec![sandbox], delete);
    Ok(CompilationOutcome {
        success: true,
        compilation_success: result.compilation_success,
        text: result.text,
        stats: result.stats.as_ref().map(stats_to_wire),
        stdout: result.stdout,
        stderr: result.stderr,
        executable,
    })
}
