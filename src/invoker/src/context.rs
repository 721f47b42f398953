use crate::{config::InvokerConfig, language::Languages, storage::Storage};
use anyhow::Context;
use minion::Sandbox;
use std::fmt;

/// Collaborators shared by all jobs handled by one invoker
#[derive(Clone, Copy)]
pub struct InvokeContext<'a> {
    pub config: &'a InvokerConfig,
    pub backend: &'a dyn minion::Backend,
    pub storage: &'a dyn Storage,
    pub languages: &'a Languages,
}

impl fmt::Debug for InvokeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeContext")
            .field("config", self.config)
            .field("backend", &self.backend)
            .finish()
    }
}

impl<'a> InvokeContext<'a> {
    pub fn create_sandbox(&self, name: &str) -> anyhow::Result<Box<dyn Sandbox>> {
        self.backend
            .new_sandbox(name)
            .with_context(|| format!("failed to create {} sandbox", name))
    }

    pub fn fetch(&self, digest: &str, what: &str) -> anyhow::Result<Vec<u8>> {
        self.storage
            .get(digest)
            .with_context(|| format!("failed to fetch {}", what))
    }

    /// Whether sandboxes and scratch directories of a finished job are removed
    pub fn should_delete(&self, success: bool, job_keep_sandbox: bool) -> bool {
        success && !job_keep_sandbox && !self.config.keep_sandbox
    }
}

/// Releases sandboxes, logging instead of failing: the record is already known
pub fn release_sandboxes(sandboxes: Vec<Box<dyn Sandbox>>, delete: bool) {
    for sandbox in sandboxes {
        let name = sandbox.name().to_string();
        if let Err(err) = sandbox.cleanup(delete) {
            tracing::warn!(sandbox = %name, "failed to clean up sandbox: {}", err);
        }
    }
}

/// Same as [release_sandboxes], for scratch directories
pub fn release_logged(what: &str, result: anyhow::Result<()>) {
    if let Err(err) = result {
        tracing::warn!("failed to release {}: {:#}", what, err);
    }
}
