//! Priority job queue on top of a [`SharedStore`].
//!
//! ## Layout
//!
//! - `queue:email:{urgent,high,normal,low}`: due jobs, FIFO per tier
//! - `queue:email:delayed`: deferred jobs scored by due time (ms)
//! - `queue:email:claims`: in-flight claims scored by marker deadline (ms)
//! - `processing:email:<id>`: processing marker holding the claim, 5 minute TTL
//!
//! Sorted-set members wrap the job with a fresh token, so two byte-identical
//! jobs never collapse into one member.
//!
//! Results and dead letters are handled in the `outcome` module.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use ticketing_core::{Clock, JobId, SystemClock};

use super::outcome::DEFAULT_DEAD_LETTER_LIMIT;
use super::types::{Job, PRIORITY_QUEUES, Priority};
use crate::store::{SharedStore, StoreError};

pub const DELAYED_SET: &str = "queue:email:delayed";
pub const CLAIMS_SET: &str = "queue:email:claims";

const PROCESSING_PREFIX: &str = "processing:email:";

/// How long a processing marker (and the claim behind it) stays valid.
pub const PROCESSING_TTL: Duration = Duration::from_secs(5 * 60);

pub fn processing_key(id: &JobId) -> String {
    format!("{PROCESSING_PREFIX}{id}")
}

/// Queue error.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to serialize job: {0}")]
    Serialization(String),
    #[error("failed to deserialize job: {0}")]
    Deserialization(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("job not found: {0}")]
    NotFound(JobId),
}

/// A job taken off a priority list by one worker.
///
/// `payload` is the exact serialized form that was popped and goes back on
/// release. `claim` is this attempt's member of the claim index.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub job: Job,
    pub queue: String,
    pub payload: String,
    pub claim: String,
}

/// Point-in-time view of queue depths.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub delayed: usize,
    pub in_flight: usize,
    pub dead_letters: usize,
}

impl QueueStats {
    /// Jobs waiting on the four priority lists.
    pub fn ready(&self) -> usize {
        self.urgent + self.high + self.normal + self.low
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<String, QueueError> {
    serde_json::to_string(value).map_err(|e| QueueError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(payload: &str) -> Result<T, QueueError> {
    serde_json::from_str(payload).map_err(|e| QueueError::Deserialization(e.to_string()))
}

/// Member of the delayed set or the claim index.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Scheduled<J> {
    pub(crate) token: JobId,
    pub(crate) job: J,
}

pub(crate) fn scheduled_member(job: &Job) -> Result<String, QueueError> {
    encode(&Scheduled {
        token: JobId::generate(),
        job,
    })
}

/// The notification job queue.
///
/// Cheap to share behind an `Arc`; every method is a short sequence of atomic
/// store calls and holds no in-process lock.
#[derive(Debug)]
pub struct JobQueue<S> {
    pub(super) store: S,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) dead_letter_limit: usize,
}

impl<S: SharedStore> JobQueue<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            dead_letter_limit: DEFAULT_DEAD_LETTER_LIMIT,
        }
    }

    /// Keep at most `limit` dead letters; the oldest are trimmed first.
    pub fn with_dead_letter_limit(mut self, limit: usize) -> Self {
        self.dead_letter_limit = limit.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Accept a job for delivery.
    ///
    /// Assigns an id and `created_at` when missing. A due job goes onto its
    /// priority list; a deferred one into the delayed set.
    #[instrument(skip(self, job), fields(kind = %job.kind, priority = job.priority.level()), err)]
    pub fn enqueue(&self, mut job: Job) -> Result<JobId, QueueError> {
        let now = self.now();
        if job.id.is_empty() {
            job.id = JobId::generate();
        }
        if job.created_at.is_none() {
            job.created_at = Some(now);
        }

        match job.process_after {
            Some(at) if !job.is_due(now) => {
                self.store.schedule(DELAYED_SET, &scheduled_member(&job)?, to_millis(at))?;
                debug!(job_id = %job.id, process_after = %at, "job deferred");
            }
            _ => {
                self.store.push(job.priority.queue_name(), &encode(&job)?)?;
                debug!(job_id = %job.id, queue = job.priority.queue_name(), "job queued");
            }
        }
        Ok(job.id)
    }

    /// Take the next eligible job, checking tiers urgent to low.
    ///
    /// Blocks up to `timeout`. Returns `Ok(None)` on timeout, and also when the
    /// popped job turned out not to be due yet (it goes back to the delayed
    /// set).
    pub fn poll(&self, timeout: Duration) -> Result<Option<ClaimedJob>, QueueError> {
        let Some((queue, payload)) = self.store.blocking_pop(&PRIORITY_QUEUES, timeout)? else {
            return Ok(None);
        };

        let job: Job = match decode(&payload) {
            Ok(job) => job,
            Err(e) => {
                error!(queue = %queue, error = %e, "dropping undecodable payload");
                return Err(e);
            }
        };

        let now = self.now();
        if let Some(at) = job.process_after.filter(|_| !job.is_due(now)) {
            self.store.schedule(DELAYED_SET, &scheduled_member(&job)?, to_millis(at))?;
            debug!(job_id = %job.id, process_after = %at, "job not due; deferred");
            return Ok(None);
        }

        let deadline = now
            + chrono::Duration::from_std(PROCESSING_TTL).unwrap_or(chrono::Duration::minutes(5));
        let claim = scheduled_member(&job)?;
        self.store
            .set_with_ttl(&processing_key(&job.id), &claim, PROCESSING_TTL)?;
        self.store.schedule(CLAIMS_SET, &claim, to_millis(deadline))?;

        debug!(job_id = %job.id, queue = %queue, retry_count = job.retry_count, "job claimed");
        Ok(Some(ClaimedJob {
            job,
            queue,
            payload,
            claim,
        }))
    }

    /// Give a claimed job back unprocessed. It is the next one popped from its list.
    pub fn release(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        self.store.push_head(&claimed.queue, &claimed.payload)?;
        self.clear_claim(claimed)?;
        debug!(job_id = %claimed.job.id, queue = %claimed.queue, "claim released");
        Ok(())
    }

    /// Move deferred jobs whose time has come onto their priority lists.
    ///
    /// Safe to call from several processes: each due member is taken by exactly
    /// one caller.
    pub fn promote_due(&self, limit: usize) -> Result<usize, QueueError> {
        let due = self
            .store
            .take_due(DELAYED_SET, to_millis(self.now()), limit)?;

        let mut promoted = 0;
        for member in due {
            match decode::<Scheduled<Job>>(&member) {
                Ok(Scheduled { job, .. }) => {
                    self.store.push(job.priority.queue_name(), &encode(&job)?)?;
                    promoted += 1;
                }
                Err(e) => error!(error = %e, "discarding undecodable delayed job"),
            }
        }

        if promoted > 0 {
            debug!(promoted, "promoted deferred jobs");
        }
        Ok(promoted)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            urgent: self.store.list_len(Priority::Urgent.queue_name())?,
            high: self.store.list_len(Priority::High.queue_name())?,
            normal: self.store.list_len(Priority::Normal.queue_name())?,
            low: self.store.list_len(Priority::Low.queue_name())?,
            delayed: self.store.scheduled_len(DELAYED_SET)?,
            in_flight: self.store.scheduled_len(CLAIMS_SET)?,
            dead_letters: self.store.list_len(super::outcome::DEAD_LETTER_QUEUE)?,
        })
    }

    pub(super) fn clear_claim(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        self.store.delete_if_eq(&processing_key(&claimed.job.id), &claimed.claim)?;
        self.store.unschedule(CLAIMS_SET, &claimed.claim)?;
        Ok(())
    }
}
