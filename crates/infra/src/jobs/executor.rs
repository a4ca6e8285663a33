//! Worker pool: N threads draining the queue plus one maintenance thread.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Datelike;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::store::SharedStore;

use super::delivery::{DeliveryError, MessageTransport, OutboundMessage, TemplateRenderer};
use super::queue::{ClaimedJob, JobQueue, QueueError};
use super::types::{Job, Settlement};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Upper bound of one blocking pop; also bounds shutdown latency.
    pub poll_timeout: Duration,
    /// How often deferred jobs are promoted.
    pub maintenance_interval: Duration,
    /// How often expired claims are swept.
    pub reconcile_interval: Duration,
    /// Max members handled per promote/reconcile pass.
    pub batch_size: usize,
    /// Name for logging and thread names.
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            poll_timeout: Duration::from_secs(5),
            maintenance_interval: Duration::from_millis(500),
            reconcile_interval: Duration::from_secs(30),
            batch_size: 100,
            name: "notifier".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    pub jobs_processed: u64,
    pub jobs_sent: u64,
    pub jobs_retried: u64,
    pub jobs_dropped: u64,
    pub jobs_released: u64,
    pub jobs_promoted: u64,
    pub claims_reconciled: u64,
    pub errors: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

fn lock(stats: &Mutex<PoolStats>) -> MutexGuard<'_, PoolStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: Arc<AtomicBool>,
    maintenance: mpsc::Sender<()>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<PoolStats>>,
    started: Instant,
}

impl WorkerPoolHandle {
    /// Signal shutdown and wait for every thread to finish its current job.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Ask workers to stop after their current poll without waiting for them.
    /// A job popped after this is released, not processed.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = lock(&self.stats).clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.maintenance.send(());
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
    }
}

/// Renders and delivers queued notifications.
pub struct WorkerPool<S, R, T> {
    queue: Arc<JobQueue<S>>,
    renderer: R,
    transport: T,
}

impl<S, R, T> WorkerPool<S, R, T>
where
    S: SharedStore + 'static,
    R: TemplateRenderer + 'static,
    T: MessageTransport + 'static,
{
    pub fn new(queue: Arc<JobQueue<S>>, renderer: R, transport: T) -> Self {
        Self {
            queue,
            renderer,
            transport,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue<S>> {
        &self.queue
    }

    /// Render a job and hand it to the transport.
    pub fn process(&self, job: &Job) -> Result<(), DeliveryError> {
        if job.template.trim().is_empty() {
            return Err(DeliveryError::Template("template file not specified".into()));
        }

        let mut data = job.template_data.clone();
        data.entry("CurrentYear")
            .or_insert_with(|| Value::from(self.queue.now().year()));

        let body = self.renderer.render(&job.template, &data)?;
        self.transport.send(&OutboundMessage {
            to: job.destination.clone(),
            subject: job.subject.clone(),
            body,
        })
    }

    /// Process a claimed job and settle the attempt.
    pub fn handle(&self, claimed: &ClaimedJob) -> Result<Settlement, QueueError> {
        let outcome = self.process(&claimed.job).map_err(|e| e.to_string());
        self.queue.complete(claimed, outcome)
    }

    /// Poll once and handle whatever was claimed. `Ok(None)` when nothing was.
    pub fn run_once(&self, timeout: Duration) -> Result<Option<Settlement>, QueueError> {
        match self.queue.poll(timeout)? {
            Some(claimed) => self.handle(&claimed).map(Some),
            None => Ok(None),
        }
    }

    /// Spawn the worker threads and the maintenance thread.
    pub fn spawn(self, config: WorkerPoolConfig) -> io::Result<WorkerPoolHandle> {
        let pool = Arc::new(self);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(PoolStats::default()));
        let (maintenance_tx, maintenance_rx) = mpsc::channel::<()>();

        let mut handle = WorkerPoolHandle {
            shutdown: shutdown.clone(),
            maintenance: maintenance_tx,
            joins: Vec::with_capacity(config.workers + 1),
            stats: stats.clone(),
            started: Instant::now(),
        };

        let spawned = thread::Builder::new()
            .name(format!("{}-maintenance", config.name))
            .spawn({
                let pool = pool.clone();
                let stats = stats.clone();
                let config = config.clone();
                move || maintenance_loop(&*pool.queue, &config, maintenance_rx, &stats)
            });
        match spawned {
            Ok(join) => handle.joins.push(join),
            Err(e) => {
                handle.stop();
                return Err(e);
            }
        }

        for index in 0..config.workers.max(1) {
            let worker = format!("{}-worker-{index}", config.name);
            let spawned = thread::Builder::new().name(worker.clone()).spawn({
                let pool = pool.clone();
                let shutdown = shutdown.clone();
                let stats = stats.clone();
                let poll_timeout = config.poll_timeout;
                move || worker_loop(&*pool, &worker, poll_timeout, &shutdown, &stats)
            });
            match spawned {
                Ok(join) => handle.joins.push(join),
                Err(e) => {
                    handle.stop();
                    return Err(e);
                }
            }
        }

        info!(pool = %config.name, workers = config.workers, "worker pool started");
        Ok(handle)
    }
}

fn worker_loop<S, R, T>(
    pool: &WorkerPool<S, R, T>,
    worker: &str,
    poll_timeout: Duration,
    shutdown: &AtomicBool,
    stats: &Mutex<PoolStats>,
) where
    S: SharedStore + 'static,
    R: TemplateRenderer + 'static,
    T: MessageTransport + 'static,
{
    debug!(worker, "worker started");

    while !shutdown.load(Ordering::SeqCst) {
        let claimed = match pool.queue.poll(poll_timeout) {
            Ok(Some(claimed)) => claimed,
            Ok(None) => continue,
            Err(e) => {
                error!(worker, error = %e, "failed to poll queue");
                lock(stats).errors += 1;
                thread::sleep(poll_timeout.min(Duration::from_secs(1)));
                continue;
            }
        };

        if shutdown.load(Ordering::SeqCst) {
            match pool.queue.release(&claimed) {
                Ok(()) => lock(stats).jobs_released += 1,
                Err(e) => {
                    error!(worker, job_id = %claimed.job.id, error = %e, "failed to release job")
                }
            }
            break;
        }

        lock(stats).current_running += 1;
        let settled = pool.handle(&claimed);

        let mut s = lock(stats);
        s.current_running = s.current_running.saturating_sub(1);
        s.jobs_processed += 1;
        match settled {
            Ok(Settlement::Sent) => s.jobs_sent += 1,
            Ok(Settlement::RetryScheduled { .. }) => s.jobs_retried += 1,
            Ok(Settlement::Dropped { .. }) => s.jobs_dropped += 1,
            Err(e) => {
                s.errors += 1;
                drop(s);
                // The claim stays indexed; the reconcile sweep settles it.
                error!(worker, job_id = %claimed.job.id, error = %e, "failed to settle job");
            }
        }
    }

    debug!(worker, "worker stopped");
}

fn maintenance_loop<S: SharedStore>(
    queue: &JobQueue<S>,
    config: &WorkerPoolConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: &Mutex<PoolStats>,
) {
    let mut last_reconcile = Instant::now();

    loop {
        match shutdown_rx.recv_timeout(config.maintenance_interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        match queue.promote_due(config.batch_size) {
            Ok(n) => lock(stats).jobs_promoted += n as u64,
            Err(e) => {
                warn!(pool = %config.name, error = %e, "failed to promote deferred jobs");
                lock(stats).errors += 1;
            }
        }

        if last_reconcile.elapsed() >= config.reconcile_interval {
            last_reconcile = Instant::now();
            match queue.reconcile_stale(config.batch_size) {
                Ok(0) => {}
                Ok(n) => {
                    warn!(pool = %config.name, reconciled = n, "settled expired claims");
                    lock(stats).claims_reconciled += n as u64;
                }
                Err(e) => {
                    warn!(pool = %config.name, error = %e, "failed to reconcile claims");
                    lock(stats).errors += 1;
                }
            }
        }
    }

    debug!(pool = %config.name, "maintenance stopped");
}
