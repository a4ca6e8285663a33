//! Notification job model, wire format and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ticketing_auth::OtpPurpose;
use ticketing_core::JobId;

/// Template variables. Key order carries no meaning.
pub type TemplateData = serde_json::Map<String, Value>;

/// Retries allowed when a job does not say otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Cap on the backoff exponent (2^20 s is about 12 days).
const MAX_BACKOFF_EXPONENT: u32 = 20;

pub const QUEUE_URGENT: &str = "queue:email:urgent";
pub const QUEUE_HIGH: &str = "queue:email:high";
pub const QUEUE_NORMAL: &str = "queue:email:normal";
pub const QUEUE_LOW: &str = "queue:email:low";

/// Queue names in the order a poll checks them.
pub const PRIORITY_QUEUES: [&str; 4] = [QUEUE_URGENT, QUEUE_HIGH, QUEUE_NORMAL, QUEUE_LOW];

/// Delivery tier. Lower level = drained first.
///
/// Travels on the wire as its integer level. Levels outside 0-3 are clamped
/// when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn level(&self) -> u8 {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    /// The list holding jobs of this tier.
    pub fn queue_name(&self) -> &'static str {
        PRIORITY_QUEUES[self.level() as usize]
    }

    pub fn from_queue_name(name: &str) -> Option<Self> {
        Priority::ALL.into_iter().find(|p| p.queue_name() == name)
    }
}

impl From<i64> for Priority {
    fn from(level: i64) -> Self {
        match level {
            i64::MIN..=0 => Priority::Urgent,
            1 => Priority::High,
            2 => Priority::Normal,
            _ => Priority::Low,
        }
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.level()
    }
}

/// What a job is for. Informational only; routing uses [`Priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Otp,
    Verification,
    PasswordReset,
    Welcome,
    Notification,
    Invoice,
    Reminder,
    TicketConfirmation,
    Invitation,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Otp => "otp",
            JobKind::Verification => "verification",
            JobKind::PasswordReset => "password_reset",
            JobKind::Welcome => "welcome",
            JobKind::Notification => "notification",
            JobKind::Invoice => "invoice",
            JobKind::Reminder => "reminder",
            JobKind::TicketConfirmation => "ticket_confirmation",
            JobKind::Invitation => "invitation",
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// A notification waiting to be rendered and delivered.
///
/// The serialized form is the queue wire format; field names are fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Empty until the enqueuer assigns one.
    #[serde(default)]
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    #[serde(rename = "to")]
    pub destination: String,
    pub subject: String,
    /// Template reference handed to the renderer.
    #[serde(rename = "template_file")]
    pub template: String,
    #[serde(default)]
    pub template_data: TemplateData,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Not deliverable before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a normal-priority job with no id yet.
    pub fn new(
        kind: JobKind,
        destination: impl Into<String>,
        subject: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::empty(),
            kind,
            destination: destination.into(),
            subject: subject.into(),
            template: template.into(),
            template_data: TemplateData::new(),
            priority: Priority::Normal,
            created_at: None,
            process_after: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            last_attempted_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.template_data.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Defer delivery until `at`.
    pub fn process_after(mut self, at: DateTime<Utc>) -> Self {
        self.process_after = Some(at);
        self
    }

    /// Whether the job may be delivered at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.process_after.is_none_or(|at| at <= now)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Record a failed attempt and push `process_after` out by the backoff.
    ///
    /// Callers check [`Job::can_retry`] first; the retry count never exceeds
    /// `max_retries`.
    pub fn schedule_retry(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.last_attempted_at = Some(now);
        self.last_error = Some(error.into());

        let at =
            now + chrono::Duration::from_std(retry_delay(self.retry_count)).unwrap_or_default();
        self.process_after = Some(at);
        at
    }
}

/// Backoff before the attempt numbered `retry_count`: `2^retry_count` seconds.
pub fn retry_delay(retry_count: u32) -> Duration {
    Duration::from_secs(1u64 << retry_count.min(MAX_BACKOFF_EXPONENT))
}

// Convenience constructors for the notifications the platform sends.

/// Details for a new member's welcome email.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WelcomeEmail {
    pub to: String,
    pub name: String,
    pub organization: String,
    pub login_url: String,
    /// Set when an administrator created the account with a generated password.
    pub temporary_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TicketConfirmation {
    pub to: String,
    pub name: String,
    pub event_name: String,
    pub ticket_id: String,
    pub event_date: String,
    pub event_time: String,
    pub venue: String,
    pub ticket_type: String,
    pub barcode_image: String,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventNotification {
    pub to: String,
    pub name: String,
    /// Short label used as the subject prefix, e.g. "Event Updated".
    pub notification_type: String,
    pub message: String,
    pub event_name: String,
    pub description: String,
    pub date: String,
    pub time: String,
    pub location: String,
    pub organizer: String,
    pub event_url: String,
    pub unsubscribe_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrganizationInvitation {
    pub to: String,
    pub name: String,
    pub organization: String,
    pub organization_description: String,
    pub inviter_name: String,
    pub role_name: String,
    pub role_permissions: String,
    pub accept_url: String,
    pub decline_url: String,
    pub expires_on: String,
}

impl Job {
    /// One-time code email. Urgent: the user is waiting on it.
    pub fn otp(to: impl Into<String>, code: &str, purpose: OtpPurpose) -> Self {
        let copy = purpose.email_copy();
        Job::new(JobKind::Otp, to, copy.subject, "otp_email.html")
            .with_priority(Priority::Urgent)
            .with_data("Title", copy.title)
            .with_data("Message", copy.message)
            .with_data("OTP", code)
    }

    /// Email-address verification link.
    pub fn verification(to: impl Into<String>, name: &str, verification_url: &str) -> Self {
        Job::new(
            JobKind::Verification,
            to,
            "Verify Your Email Address",
            "verification_email.html",
        )
        .with_priority(Priority::Urgent)
        .with_data("Name", name)
        .with_data("VerificationURL", verification_url)
    }

    pub fn password_reset(to: impl Into<String>, reset_url: &str) -> Self {
        Job::new(
            JobKind::PasswordReset,
            to,
            "Reset Your Password",
            "reset_password_email.html",
        )
        .with_priority(Priority::Urgent)
        .with_data("ResetURL", reset_url)
    }

    pub fn welcome(details: WelcomeEmail) -> Self {
        let mut job = Job::new(
            JobKind::Welcome,
            details.to.clone(),
            format!("Welcome to {} - Your Account Information", details.organization),
            "welcome_email.html",
        )
        .with_priority(Priority::High)
        .with_data("Name", details.name)
        .with_data("OrgName", details.organization)
        .with_data("Email", details.to)
        .with_data("LoginURL", details.login_url);

        if let Some(password) = details.temporary_password {
            job = job.with_data("Password", password);
        }
        job
    }

    pub fn ticket_confirmation(details: TicketConfirmation) -> Self {
        Job::new(
            JobKind::TicketConfirmation,
            details.to,
            format!("Your Ticket Confirmation for {}", details.event_name),
            "ticket_confirmation.html",
        )
        .with_priority(Priority::High)
        .with_data("Name", details.name)
        .with_data("EventName", details.event_name)
        .with_data("TicketID", details.ticket_id)
        .with_data("EventDate", details.event_date)
        .with_data("EventTime", details.event_time)
        .with_data("EventVenue", details.venue)
        .with_data("TicketType", details.ticket_type)
        .with_data("BarcodeImage", details.barcode_image)
        .with_data("DownloadURL", details.download_url)
    }

    pub fn event_notification(details: EventNotification) -> Self {
        Job::new(
            JobKind::Notification,
            details.to,
            format!("{}: {}", details.notification_type, details.event_name),
            "event_notification.html",
        )
        .with_priority(Priority::Normal)
        .with_data("Name", details.name)
        .with_data("NotificationType", details.notification_type)
        .with_data("NotificationMessage", details.message)
        .with_data("EventName", details.event_name)
        .with_data("EventDescription", details.description)
        .with_data("EventDate", details.date)
        .with_data("EventTime", details.time)
        .with_data("EventLocation", details.location)
        .with_data("EventOrganizer", details.organizer)
        .with_data("EventURL", details.event_url)
        .with_data("UnsubscribeURL", details.unsubscribe_url)
    }

    pub fn organization_invitation(details: OrganizationInvitation) -> Self {
        Job::new(
            JobKind::Invitation,
            details.to,
            format!("Invitation to Join {}", details.organization),
            "organization_invitation.html",
        )
        .with_priority(Priority::Normal)
        .with_data("Name", details.name)
        .with_data("OrganizationName", details.organization)
        .with_data("OrganizationDescription", details.organization_description)
        .with_data("InviterName", details.inviter_name)
        .with_data("RoleName", details.role_name)
        .with_data("RoleSpecificPerms", details.role_permissions)
        .with_data("AcceptURL", details.accept_url)
        .with_data("DeclineURL", details.decline_url)
        .with_data("ExpirationDate", details.expires_on)
    }
}

/// How an attempt ended, as recorded in the job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Delivered. Terminal.
    Sent,
    /// Failed; another attempt is scheduled.
    Retrying,
    /// Failed with no retries left. Terminal.
    Dropped,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Retrying)
    }
}

/// Outcome record of the latest attempt of a job, kept for 24 hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub status: DeliveryStatus,
    /// Retry count of the job when this attempt ran (0 = first attempt).
    pub attempt: u32,
    pub recorded_at: DateTime<Utc>,
}

impl JobResult {
    pub fn sent(job: &Job, at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id.clone(),
            successful: true,
            error: None,
            sent_at: Some(at),
            status: DeliveryStatus::Sent,
            attempt: job.retry_count,
            recorded_at: at,
        }
    }

    pub fn failed(
        job: &Job,
        error: impl Into<String>,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            successful: false,
            error: Some(error.into()),
            sent_at: None,
            status,
            attempt: job.retry_count,
            recorded_at: at,
        }
    }
}

/// A job that exhausted its retries, kept for operator inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub dropped_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(job: Job, reason: impl Into<String>, dropped_at: DateTime<Utc>) -> Self {
        Self {
            job,
            dropped_at,
            reason: reason.into(),
        }
    }
}

/// What finalizing an attempt did with the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Sent,
    RetryScheduled {
        retry_count: u32,
        process_after: DateTime<Utc>,
    },
    Dropped {
        reason: String,
    },
}
