//! Notification worker process wiring.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use ticketing_infra::jobs::{
    FileTemplateRenderer, JobQueue, LogTransport, WorkerPool, WorkerPoolHandle,
};
use ticketing_infra::{NotifierConfig, SharedStore};

/// Check the store, then start the worker pool on it.
///
/// Messages are rendered from `config.template_dir` and handed to the log
/// transport.
pub fn start<S>(store: S, config: &NotifierConfig) -> anyhow::Result<WorkerPoolHandle>
where
    S: SharedStore + 'static,
{
    store.ping().context("shared store is not reachable")?;

    let queue = Arc::new(JobQueue::new(store).with_dead_letter_limit(config.dead_letter_limit));
    let renderer = FileTemplateRenderer::new(&config.template_dir);
    let pool = WorkerPool::new(queue, renderer, LogTransport);

    let handle = pool
        .spawn(config.pool_config())
        .context("failed to spawn worker threads")?;

    info!(
        workers = config.workers,
        template_dir = %config.template_dir.display(),
        "notifier started"
    );
    Ok(handle)
}
