//! Settling attempts: results, retries with backoff, dead letters and the
//! stale-claim sweep.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use ticketing_core::JobId;

use super::queue::{
    CLAIMS_SET, ClaimedJob, JobQueue, QueueError, Scheduled, decode, encode, processing_key,
    to_millis,
};
use super::types::{DeadLetterEntry, DeliveryStatus, Job, JobResult, Settlement};
use crate::store::SharedStore;

pub const DEAD_LETTER_QUEUE: &str = "queue:email:dead";

/// Dead letters retained unless configured otherwise.
pub const DEFAULT_DEAD_LETTER_LIMIT: usize = 10_000;

const RESULT_PREFIX: &str = "results:email:";

/// Retention of job results.
pub const RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Failure recorded when a claim outlives its processing marker.
pub const MARKER_EXPIRED: &str = "processing marker expired";

pub fn result_key(id: &JobId) -> String {
    format!("{RESULT_PREFIX}{id}")
}

impl<S: SharedStore> JobQueue<S> {
    /// Finalize a claimed attempt.
    ///
    /// Writes the result, clears the processing marker and claim, then on
    /// failure either re-enqueues with backoff or dead-letters the job.
    pub fn complete(
        &self,
        claimed: &ClaimedJob,
        outcome: Result<(), String>,
    ) -> Result<Settlement, QueueError> {
        let now = self.now();
        match outcome {
            Ok(()) => {
                self.write_result(&JobResult::sent(&claimed.job, now))?;
                self.clear_claim(claimed)?;
                debug!(job_id = %claimed.job.id, "job sent");
                Ok(Settlement::Sent)
            }
            Err(error) => {
                let job = claimed.job.clone();
                let result = JobResult::failed(&job, &error, failure_status(&job), now);
                self.write_result(&result)?;
                self.clear_claim(claimed)?;
                self.settle_failure(job, error, now)
            }
        }
    }

    /// Latest recorded outcome of a job, if still retained.
    pub fn result(&self, id: &JobId) -> Result<Option<JobResult>, QueueError> {
        self.store
            .get(&result_key(id))?
            .map(|raw| decode(&raw))
            .transpose()
    }

    /// Dropped jobs, most recent first.
    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        self.store
            .list_range(DEAD_LETTER_QUEUE, limit)?
            .iter()
            .map(|raw| decode(raw))
            .collect()
    }

    /// Put a dead-lettered job back on its priority list with a fresh retry budget.
    pub fn retry_dead_letter(&self, id: &JobId) -> Result<Job, QueueError> {
        let len = self.store.list_len(DEAD_LETTER_QUEUE)?;
        let raw_entries = self.store.list_range(DEAD_LETTER_QUEUE, len)?;

        for raw in raw_entries {
            let entry: DeadLetterEntry = decode(&raw)?;
            if &entry.job.id != id {
                continue;
            }
            // Another operator may have taken it between the read and here.
            if !self.store.list_remove(DEAD_LETTER_QUEUE, &raw)? {
                break;
            }

            let mut job = entry.job;
            job.retry_count = 0;
            job.process_after = None;
            self.enqueue(job.clone())?;
            info!(job_id = %id, "dead-lettered job re-queued");
            return Ok(job);
        }

        Err(QueueError::NotFound(id.clone()))
    }

    /// Treat claims whose processing marker lapsed without a result as failed
    /// attempts. Returns how many were settled.
    pub fn reconcile_stale(&self, limit: usize) -> Result<usize, QueueError> {
        let now = self.now();
        let expired = self.store.take_due(CLAIMS_SET, to_millis(now), limit)?;

        let mut settled = 0;
        for member in expired {
            let job = match decode::<Scheduled<Job>>(&member) {
                Ok(Scheduled { job, .. }) => job,
                Err(e) => {
                    warn!(error = %e, "discarding undecodable claim");
                    continue;
                }
            };

            // Finalized, but the claim outlived it.
            let finished = self
                .result(&job.id)?
                .is_some_and(|r| r.attempt == job.retry_count);
            self.store.delete_if_eq(&processing_key(&job.id), &member)?;
            if finished {
                continue;
            }

            warn!(job_id = %job.id, retry_count = job.retry_count, "{MARKER_EXPIRED}");
            let result = JobResult::failed(&job, MARKER_EXPIRED, failure_status(&job), now);
            self.write_result(&result)?;
            self.settle_failure(job, MARKER_EXPIRED.to_string(), now)?;
            settled += 1;
        }
        Ok(settled)
    }

    fn write_result(&self, result: &JobResult) -> Result<(), QueueError> {
        self.store
            .set_with_ttl(&result_key(&result.job_id), &encode(result)?, RESULT_TTL)?;
        Ok(())
    }

    fn settle_failure(
        &self,
        mut job: Job,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<Settlement, QueueError> {
        if job.can_retry() {
            let process_after = job.schedule_retry(error.as_str(), now);
            let retry_count = job.retry_count;
            let id = job.id.clone();
            self.enqueue(job)?;
            info!(
                job_id = %id,
                retry_count,
                process_after = %process_after,
                error = %error,
                "delivery failed; retry scheduled"
            );
            return Ok(Settlement::RetryScheduled {
                retry_count,
                process_after,
            });
        }

        job.last_error = Some(error.clone());
        job.last_attempted_at = Some(now);
        let entry = DeadLetterEntry::new(job, error.as_str(), now);
        self.store.push(DEAD_LETTER_QUEUE, &encode(&entry)?)?;
        self.store.list_trim(DEAD_LETTER_QUEUE, self.dead_letter_limit)?;
        warn!(
            job_id = %entry.job.id,
            retry_count = entry.job.retry_count,
            error = %error,
            "delivery failed; retries exhausted, job dead-lettered"
        );
        Ok(Settlement::Dropped { reason: error })
    }
}

fn failure_status(job: &Job) -> DeliveryStatus {
    if job.can_retry() {
        DeliveryStatus::Retrying
    } else {
        DeliveryStatus::Dropped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::jobs::types::{JobKind, Priority};
    use crate::store::InMemoryStore;
    use ticketing_core::{Clock, ManualClock};

    const NO_WAIT: Duration = Duration::from_millis(10);

    fn queue() -> (JobQueue<Arc<InMemoryStore>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        (JobQueue::with_clock(store, clock.clone()), clock)
    }

    fn claim_new(queue: &JobQueue<Arc<InMemoryStore>>, max_retries: u32) -> ClaimedJob {
        let job = Job::new(JobKind::Reminder, "c@example.com", "s", "t.html")
            .with_priority(Priority::High)
            .with_max_retries(max_retries);
        queue.enqueue(job).unwrap();
        queue.poll(NO_WAIT).unwrap().unwrap()
    }

    #[test]
    fn success_records_sent_result_and_clears_marker() {
        let (queue, clock) = queue();
        let claimed = claim_new(&queue, 3);

        assert_eq!(queue.complete(&claimed, Ok(())).unwrap(), Settlement::Sent);

        let result = queue.result(&claimed.job.id).unwrap().unwrap();
        assert!(result.successful);
        assert_eq!(result.status, DeliveryStatus::Sent);
        assert_eq!(result.sent_at, Some(clock.now()));
        assert!(!queue.store().exists(&processing_key(&claimed.job.id)).unwrap());
        assert_eq!(queue.stats().unwrap().in_flight, 0);
    }

    #[test]
    fn result_lookup_is_repeatable() {
        let (queue, _) = queue();
        let claimed = claim_new(&queue, 3);
        queue.complete(&claimed, Ok(())).unwrap();

        let first = queue.result(&claimed.job.id).unwrap();
        let second = queue.result(&claimed.job.id).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_job_has_no_result() {
        let (queue, _) = queue();
        assert!(queue.result(&JobId::from("missing")).unwrap().is_none());
    }

    #[test]
    fn results_expire_after_a_day() {
        let (queue, clock) = queue();
        let claimed = claim_new(&queue, 3);
        queue.complete(&claimed, Ok(())).unwrap();

        clock.advance(chrono::Duration::hours(24));
        assert!(queue.result(&claimed.job.id).unwrap().is_none());
    }

    #[test]
    fn failure_schedules_retry_with_backoff() {
        let (queue, clock) = queue();
        let claimed = claim_new(&queue, 3);

        let settlement = queue.complete(&claimed, Err("smtp 451".into())).unwrap();
        let expected_at = clock.now() + chrono::Duration::seconds(2);
        assert_eq!(
            settlement,
            Settlement::RetryScheduled {
                retry_count: 1,
                process_after: expected_at
            }
        );

        let result = queue.result(&claimed.job.id).unwrap().unwrap();
        assert!(!result.successful);
        assert_eq!(result.status, DeliveryStatus::Retrying);
        assert_eq!(result.error.as_deref(), Some("smtp 451"));
        assert_eq!(queue.stats().unwrap().delayed, 1);

        clock.advance(chrono::Duration::seconds(2));
        queue.promote_due(10).unwrap();
        let retried = queue.poll(NO_WAIT).unwrap().unwrap();
        assert_eq!(retried.job.retry_count, 1);
        assert_eq!(retried.job.last_error.as_deref(), Some("smtp 451"));
    }

    #[test]
    fn exhausted_job_is_dead_lettered() {
        let (queue, _) = queue();
        let claimed = claim_new(&queue, 0);

        let settlement = queue.complete(&claimed, Err("bounced".into())).unwrap();
        assert_eq!(
            settlement,
            Settlement::Dropped {
                reason: "bounced".into()
            }
        );

        let result = queue.result(&claimed.job.id).unwrap().unwrap();
        assert_eq!(result.status, DeliveryStatus::Dropped);

        let dead = queue.dead_letters(10).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.id, claimed.job.id);
        assert_eq!(dead[0].reason, "bounced");

        let stats = queue.stats().unwrap();
        assert_eq!((stats.ready(), stats.delayed), (0, 0));
    }

    #[test]
    fn dead_letter_can_be_requeued_once() {
        let (queue, _) = queue();
        let claimed = claim_new(&queue, 0);
        queue.complete(&claimed, Err("bounced".into())).unwrap();

        let job = queue.retry_dead_letter(&claimed.job.id).unwrap();
        assert_eq!(job.retry_count, 0);
        assert!(queue.dead_letters(10).unwrap().is_empty());
        assert_eq!(queue.stats().unwrap().high, 1);

        assert!(matches!(
            queue.retry_dead_letter(&claimed.job.id),
            Err(QueueError::NotFound(_))
        ));
    }

    #[test]
    fn dead_letters_are_capped_oldest_first() {
        let (queue, _) = queue();
        let queue = queue.with_dead_letter_limit(2);

        let ids: Vec<JobId> = (0..3)
            .map(|_| {
                let claimed = claim_new(&queue, 0);
                queue.complete(&claimed, Err("bounced".into())).unwrap();
                claimed.job.id
            })
            .collect();

        let kept: Vec<JobId> = queue
            .dead_letters(10)
            .unwrap()
            .into_iter()
            .map(|e| e.job.id)
            .collect();
        assert_eq!(kept, vec![ids[2].clone(), ids[1].clone()]);
        assert!(matches!(
            queue.retry_dead_letter(&ids[0]),
            Err(QueueError::NotFound(_))
        ));
    }

    #[test]
    fn expired_claim_without_result_counts_as_failure() {
        let (queue, clock) = queue();
        let claimed = claim_new(&queue, 3);

        assert_eq!(queue.reconcile_stale(10).unwrap(), 0);

        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(queue.reconcile_stale(10).unwrap(), 1);

        let result = queue.result(&claimed.job.id).unwrap().unwrap();
        assert_eq!(result.error.as_deref(), Some(MARKER_EXPIRED));
        let stats = queue.stats().unwrap();
        assert_eq!((stats.in_flight, stats.delayed), (0, 1));
    }

    #[test]
    fn finalized_claim_is_not_reconciled() {
        let (queue, clock) = queue();
        let claimed = claim_new(&queue, 3);
        queue.complete(&claimed, Ok(())).unwrap();
        // Simulate a claim whose removal was lost.
        queue
            .store()
            .schedule(CLAIMS_SET, &claimed.claim, to_millis(clock.now()))
            .unwrap();

        assert_eq!(queue.reconcile_stale(10).unwrap(), 0);
        assert!(queue.result(&claimed.job.id).unwrap().unwrap().successful);
    }
}
