//! Caller-facing notification API used by auth and registration flows.

use std::sync::Arc;

use tracing::{error, info, instrument};

use ticketing_auth::{DEFAULT_CODE_DIGITS, INVALID_CODE_MESSAGE, OTP_TTL, OtpIssued, OtpPurpose};
use ticketing_core::{Clock, DomainError, JobId, SystemClock};

use crate::jobs::{DeadLetterEntry, Job, JobQueue, JobResult, QueueError, QueueStats};
use crate::otp::{OtpError, OtpManager};
use crate::store::SharedStore;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no delivery channel for {0} codes")]
    UnsupportedChannel(OtpPurpose),
    /// Wrong, expired and never-issued codes all map here.
    #[error("{}", INVALID_CODE_MESSAGE)]
    InvalidCode,
    #[error(transparent)]
    Otp(#[from] OtpError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Issues codes and queues notifications.
#[derive(Debug)]
pub struct NotificationService<S> {
    otp: OtpManager<S>,
    queue: Arc<JobQueue<S>>,
}

impl<S: SharedStore + Clone> NotificationService<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            otp: OtpManager::new(store.clone()),
            queue: Arc::new(JobQueue::with_clock(store, clock)),
        }
    }
}

impl<S: SharedStore> NotificationService<S> {
    /// Assemble from parts that already share a store.
    pub fn from_parts(otp: OtpManager<S>, queue: Arc<JobQueue<S>>) -> Self {
        Self { otp, queue }
    }

    pub fn queue(&self) -> &Arc<JobQueue<S>> {
        &self.queue
    }

    /// Generate, store and email a code for `(identifier, purpose)`.
    ///
    /// Replaces any live code for the pair. If the email cannot be queued the
    /// new code is withdrawn.
    #[instrument(skip(self), err)]
    pub fn issue_otp(
        &self,
        identifier: &str,
        purpose: OtpPurpose,
    ) -> Result<OtpIssued, ServiceError> {
        require_non_empty("identifier", identifier)?;
        if !purpose.delivered_by_email() {
            return Err(ServiceError::UnsupportedChannel(purpose));
        }

        let code = self.otp.generate_code(DEFAULT_CODE_DIGITS)?;
        self.otp.save_code(identifier, purpose, &code)?;

        let job_id = match self.queue.enqueue(Job::otp(identifier, &code, purpose)) {
            Ok(id) => id,
            Err(e) => {
                if let Err(cleanup) = self.otp.invalidate_code(identifier, purpose) {
                    error!(error = %cleanup, "failed to withdraw undelivered code");
                }
                return Err(e.into());
            }
        };

        info!(job_id = %job_id, "otp issued");
        Ok(OtpIssued {
            expires_in_secs: OTP_TTL.as_secs(),
        })
    }

    /// `true` exactly once for a live matching code.
    pub fn verify_otp(
        &self,
        identifier: &str,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self.otp.verify_code(identifier, purpose, code)?.is_valid())
    }

    /// Like [`verify_otp`](Self::verify_otp), with a rejected code as
    /// [`ServiceError::InvalidCode`].
    pub fn require_otp(
        &self,
        identifier: &str,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<(), ServiceError> {
        if self.verify_otp(identifier, purpose, code)? {
            Ok(())
        } else {
            Err(ServiceError::InvalidCode)
        }
    }

    pub fn enqueue_notification(&self, job: Job) -> Result<JobId, ServiceError> {
        require_non_empty("destination", &job.destination)?;
        Ok(self.queue.enqueue(job)?)
    }

    pub fn job_result(&self, id: &JobId) -> Result<Option<JobResult>, ServiceError> {
        Ok(self.queue.result(id)?)
    }

    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, ServiceError> {
        Ok(self.queue.dead_letters(limit)?)
    }

    pub fn retry_dead_letter(&self, id: &JobId) -> Result<Job, ServiceError> {
        Ok(self.queue.retry_dead_letter(id)?)
    }

    pub fn queue_stats(&self) -> Result<QueueStats, ServiceError> {
        Ok(self.queue.stats()?)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::jobs::{JobKind, Priority};
    use crate::store::InMemoryStore;
    use crate::store::test_support::HookedStore;

    fn service() -> NotificationService<Arc<InMemoryStore>> {
        NotificationService::new(InMemoryStore::arc())
    }

    #[test]
    fn issue_otp_queues_urgent_email() {
        let service = service();

        let issued = service
            .issue_otp("carol@example.com", OtpPurpose::PasswordReset)
            .unwrap();
        assert_eq!(issued.expires_in_secs, 600);

        let claimed = service
            .queue()
            .poll(Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.queue, "queue:email:urgent");
        assert_eq!(claimed.job.kind, JobKind::Otp);
        assert_eq!(claimed.job.subject, "Reset Your Password");

        let code = claimed.job.template_data["OTP"].as_str().unwrap().to_string();
        assert_eq!(code.len(), 6);
        assert!(service
            .verify_otp("carol@example.com", OtpPurpose::PasswordReset, &code)
            .unwrap());
        assert!(!service
            .verify_otp("carol@example.com", OtpPurpose::PasswordReset, &code)
            .unwrap());
    }

    #[test]
    fn rejected_code_reads_the_same_for_every_cause() {
        let service = service();
        let wrong = service
            .require_otp("erin@example.com", OtpPurpose::TwoFactor, "000000")
            .unwrap_err();
        assert!(matches!(wrong, ServiceError::InvalidCode));
        assert_eq!(wrong.to_string(), "invalid or expired code");

        service.issue_otp("erin@example.com", OtpPurpose::TwoFactor).unwrap();
        let claimed = service.queue().poll(Duration::from_millis(10)).unwrap().unwrap();
        let code = claimed.job.template_data["OTP"].as_str().unwrap().to_string();

        service
            .require_otp("erin@example.com", OtpPurpose::TwoFactor, &code)
            .unwrap();
        let reused = service
            .require_otp("erin@example.com", OtpPurpose::TwoFactor, &code)
            .unwrap_err();
        assert_eq!(reused.to_string(), wrong.to_string());
    }

    #[test]
    fn phone_verification_is_rejected() {
        let err = service()
            .issue_otp("+15550100", OtpPurpose::PhoneVerification)
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::UnsupportedChannel(OtpPurpose::PhoneVerification)
        ));
    }

    #[test]
    fn blank_identifier_is_rejected() {
        let err = service().issue_otp("  ", OtpPurpose::Registration).unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation(_))));
    }

    #[test]
    fn notification_needs_destination() {
        let service = service();
        let job = Job::new(JobKind::Reminder, "", "s", "t.html");
        assert!(matches!(
            service.enqueue_notification(job),
            Err(ServiceError::Domain(_))
        ));

        let job = Job::new(JobKind::Reminder, "d@example.com", "s", "t.html")
            .with_priority(Priority::Low);
        let id = service.enqueue_notification(job).unwrap();
        assert!(!id.is_empty());
        assert_eq!(service.queue_stats().unwrap().low, 1);
    }

    #[test]
    fn failed_enqueue_withdraws_code() {
        let store = Arc::new(HookedStore::default().lists_offline());
        let service = NotificationService::new(store.clone());

        let err = service
            .issue_otp("dave@example.com", OtpPurpose::Registration)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Queue(QueueError::Store(_))));
        assert!(!store.exists("registration:dave@example.com").unwrap());
    }
}
