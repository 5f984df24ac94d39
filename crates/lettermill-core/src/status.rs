//! Email-job state machine.
//!
//! States: `pending → sent → {delivered → opened → clicked} | bounced |
//! dropped | unsubscribed`, with `pending → failed` on local submission
//! failure and `pending → queued` on provider-capacity backoff.
//! `failed`/`bounced`/`dropped` return to `pending` only through an explicit
//! retry. Webhook-driven transitions apply in receipt order, last-writer
//! wins; timestamps are recorded verbatim from the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::EmailJob;

/// Delivery status of an email job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Dropped,
    Unsubscribed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Sent => "sent",
            JobStatus::Delivered => "delivered",
            JobStatus::Opened => "opened",
            JobStatus::Clicked => "clicked",
            JobStatus::Bounced => "bounced",
            JobStatus::Dropped => "dropped",
            JobStatus::Unsubscribed => "unsubscribed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether a manual retry is allowed from this state.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Bounced | JobStatus::Dropped
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "sent" => Ok(JobStatus::Sent),
            "delivered" => Ok(JobStatus::Delivered),
            "opened" => Ok(JobStatus::Opened),
            "clicked" => Ok(JobStatus::Clicked),
            "bounced" => Ok(JobStatus::Bounced),
            "dropped" => Ok(JobStatus::Dropped),
            "unsubscribed" => Ok(JobStatus::Unsubscribed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A provider callback event, parsed from the webhook `event_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Dropped,
    Unsubscribed,
}

impl DeliveryEvent {
    /// Parse a webhook event type. Unknown types return `None`; the caller
    /// logs and drops them rather than failing the webhook.
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "sent" => Some(DeliveryEvent::Sent),
            "delivered" => Some(DeliveryEvent::Delivered),
            "opened" | "open" => Some(DeliveryEvent::Opened),
            "clicked" | "click" => Some(DeliveryEvent::Clicked),
            "bounced" | "bounce" => Some(DeliveryEvent::Bounced),
            "dropped" => Some(DeliveryEvent::Dropped),
            "unsubscribe" | "unsubscribed" => Some(DeliveryEvent::Unsubscribed),
            _ => None,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            DeliveryEvent::Sent => JobStatus::Sent,
            DeliveryEvent::Delivered => JobStatus::Delivered,
            DeliveryEvent::Opened => JobStatus::Opened,
            DeliveryEvent::Clicked => JobStatus::Clicked,
            DeliveryEvent::Bounced => JobStatus::Bounced,
            DeliveryEvent::Dropped => JobStatus::Dropped,
            DeliveryEvent::Unsubscribed => JobStatus::Unsubscribed,
        }
    }
}

/// Rejected manual retry.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("job in status '{0}' is not retryable")]
    NotRetryable(JobStatus),
}

impl EmailJob {
    /// Local submission succeeded: capture the provider message id for later
    /// webhook correlation.
    pub fn mark_sent(&mut self, message_id: &str, at: DateTime<Utc>) {
        self.status = JobStatus::Sent;
        self.provider_message_id = Some(message_id.to_string());
        self.sent_at = Some(at);
    }

    /// Local failure during submission (provider auth/config error, render
    /// failure, timeout). No automatic retry.
    pub fn mark_failed(&mut self, error: &str) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error.to_string());
    }

    /// Provider signalled capacity backoff.
    pub fn mark_queued(&mut self) {
        self.status = JobStatus::Queued;
    }

    /// Apply a provider callback event: set the status (last-writer-wins)
    /// and record the event timestamp verbatim.
    pub fn apply_event(&mut self, event: DeliveryEvent, at: DateTime<Utc>, reason: Option<&str>) {
        self.status = event.status();
        match event {
            DeliveryEvent::Sent => self.sent_at = Some(at),
            DeliveryEvent::Delivered => self.delivered_at = Some(at),
            DeliveryEvent::Opened => self.opened_at = Some(at),
            DeliveryEvent::Clicked => self.clicked_at = Some(at),
            DeliveryEvent::Bounced => {
                self.bounced_at = Some(at);
                self.error_message = reason.map(str::to_string);
            }
            DeliveryEvent::Dropped => {
                self.dropped_at = Some(at);
                self.error_message = reason.map(str::to_string);
            }
            DeliveryEvent::Unsubscribed => self.unsubscribed_at = Some(at),
        }
    }

    /// Manual retry: only allowed from `failed`, `bounced`, or `dropped`.
    /// Clears the error, bumps the retry counter, and returns the job to
    /// `pending`; the caller re-dispatches exactly once.
    pub fn begin_retry(&mut self) -> Result<(), RetryError> {
        if !self.status.retryable() {
            return Err(RetryError::NotRetryable(self.status));
        }
        self.status = JobStatus::Pending;
        self.error_message = None;
        self.retry_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job() -> EmailJob {
        EmailJob::new(
            "t1",
            "u1",
            "tmpl1",
            "E100",
            "jane@example.com",
            "Jane Doe",
            "Subject",
            "<p>body</p>",
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn sent_then_delivered_then_opened_sets_all_timestamps() {
        let mut j = job();
        j.apply_event(DeliveryEvent::Sent, at(100), None);
        j.apply_event(DeliveryEvent::Delivered, at(200), None);
        j.apply_event(DeliveryEvent::Opened, at(300), None);

        assert_eq!(j.status, JobStatus::Opened);
        assert_eq!(j.sent_at, Some(at(100)));
        assert_eq!(j.delivered_at, Some(at(200)));
        assert_eq!(j.opened_at, Some(at(300)));
    }

    #[test]
    fn bounced_after_delivered_still_wins() {
        // Receipt order is authoritative; no monotonicity check beyond the
        // explicit pending reversion rule.
        let mut j = job();
        j.apply_event(DeliveryEvent::Delivered, at(200), None);
        j.apply_event(DeliveryEvent::Bounced, at(150), Some("mailbox full"));

        assert_eq!(j.status, JobStatus::Bounced);
        assert_eq!(j.error_message.as_deref(), Some("mailbox full"));
        assert_eq!(j.bounced_at, Some(at(150)));
        assert_eq!(j.delivered_at, Some(at(200)));
    }

    #[test]
    fn retry_rejected_outside_failed_bounced_dropped() {
        for status in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Sent,
            JobStatus::Delivered,
            JobStatus::Opened,
            JobStatus::Clicked,
            JobStatus::Unsubscribed,
        ] {
            let mut j = job();
            j.status = status;
            assert!(j.begin_retry().is_err(), "retry should fail from {status}");
        }
    }

    #[test]
    fn retry_clears_error_and_returns_to_pending() {
        let mut j = job();
        j.mark_failed("provider auth error");
        assert_eq!(j.status, JobStatus::Failed);

        j.begin_retry().unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.error_message, None);
        assert_eq!(j.retry_count, 1);
    }

    #[test]
    fn unknown_event_types_parse_to_none() {
        assert_eq!(DeliveryEvent::parse("deferred"), None);
        assert_eq!(DeliveryEvent::parse(""), None);
        assert_eq!(
            DeliveryEvent::parse("unsubscribe"),
            Some(DeliveryEvent::Unsubscribed)
        );
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            "pending",
            "queued",
            "sent",
            "delivered",
            "opened",
            "clicked",
            "bounced",
            "dropped",
            "unsubscribed",
            "failed",
        ] {
            let parsed: JobStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("nonsense".parse::<JobStatus>().is_err());
    }
}
