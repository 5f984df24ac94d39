//! Status tracking: the single writer for email-job state.
//!
//! Every transition flows through here, whatever its origin (dispatch
//! outcome, webhook, reconciliation sweep, manual retry). Each recorded
//! transition is persisted to the primary store, appended to a flat-file
//! audit log, and fanned out to the owner's notification group. The audit
//! append and the fan-out are best-effort; the primary write is the one
//! that can fail, and even that failure still leaves an audit line behind.

use std::io::Write;
use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use lettermill_core::{DeliveryEvent, EmailJob};

use crate::models::{StatusEvent, WebhookPayload};
use crate::notify::{user_group, Notifier};
use crate::provider::DeliveryProvider;
use crate::store::JobStore;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("no email job with id {0}")]
    JobNotFound(Uuid),

    #[error("invalid event timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct StatusTracker {
    jobs: JobStore,
    notifier: Notifier,
    audit_log_path: PathBuf,
}

impl StatusTracker {
    pub fn new(jobs: JobStore, notifier: Notifier, audit_log_path: PathBuf) -> Self {
        Self {
            jobs,
            notifier,
            audit_log_path,
        }
    }

    /// Persist a job transition and fan it out. The primary write failing is
    /// logged and swallowed; the audit line is written regardless, so no
    /// transition disappears without trace.
    pub async fn record(&self, job: &EmailJob) {
        if let Err(e) = self.jobs.update(job).await {
            error!(job_id = %job.id, error = %e, "failed to persist job transition");
        }
        self.audit(job);
        self.notifier
            .publish(&user_group(&job.owner_user_id), StatusEvent::from_job(job))
            .await;
    }

    /// Append one JSONL audit line. Best-effort: failures are logged, never
    /// propagated.
    fn audit(&self, job: &EmailJob) {
        let line = json!({
            "jobId": job.id,
            "status": job.status.as_str(),
            "recipient": job.recipient_email,
            "errorMessage": job.error_message,
            "retryCount": job.retry_count,
            "recordedAt": Utc::now().to_rfc3339(),
        });

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .and_then(|mut f| writeln!(f, "{line}"));

        if let Err(e) = result {
            warn!(path = %self.audit_log_path.display(), error = %e, "audit log append failed");
        }
    }

    /// Apply a provider webhook. Unknown event types are logged and dropped;
    /// the webhook still succeeds so the provider does not re-deliver.
    /// Returns whether an event was applied.
    pub async fn apply_webhook(&self, payload: &WebhookPayload) -> Result<bool, TrackerError> {
        let Some(event) = DeliveryEvent::parse(&payload.event_type) else {
            warn!(event_type = %payload.event_type, job_id = %payload.email_job_id,
                  "unknown webhook event type dropped");
            return Ok(false);
        };

        let mut job = self
            .jobs
            .fetch(payload.email_job_id)
            .await?
            .ok_or(TrackerError::JobNotFound(payload.email_job_id))?;

        let at = Utc
            .timestamp_opt(payload.timestamp, 0)
            .single()
            .ok_or(TrackerError::InvalidTimestamp(payload.timestamp))?;

        job.apply_event(event, at, payload.reason.as_deref());
        self.record(&job).await;
        Ok(true)
    }

    /// Reconciliation sweep: ask the provider for events on every in-flight
    /// job and apply them in receipt order. Returns the number applied.
    pub async fn poll_provider(
        &self,
        provider: &dyn DeliveryProvider,
    ) -> Result<usize, TrackerError> {
        let in_flight = self.jobs.fetch_in_flight().await?;
        if in_flight.is_empty() {
            return Ok(0);
        }

        // Keyed by provider message id, mutated in place so a sweep that
        // returns several events for one job accumulates every transition.
        let mut jobs_by_message: std::collections::HashMap<String, EmailJob> = in_flight
            .into_iter()
            .filter_map(|j| j.provider_message_id.clone().map(|m| (m, j)))
            .collect();
        let message_ids: Vec<String> = jobs_by_message.keys().cloned().collect();

        let events = match provider.poll_events(&message_ids).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "provider event poll failed");
                return Ok(0);
            }
        };

        let mut applied = 0;
        for event in events {
            let Some(job) = jobs_by_message.get_mut(&event.message_id) else {
                continue;
            };
            job.apply_event(event.event, event.at, event.reason.as_deref());
            let snapshot = job.clone();
            self.record(&snapshot).await;
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::run_migrations;
    use lettermill_core::JobStatus;

    async fn tracker() -> (StatusTracker, JobStore, tempfile::TempDir) {
        // A single connection keeps the in-memory database shared.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        let jobs = JobStore::new(pool);
        let dir = tempfile::tempdir().unwrap();
        let tracker = StatusTracker::new(
            jobs.clone(),
            Notifier::new(),
            dir.path().join("audit.jsonl"),
        );
        (tracker, jobs, dir)
    }

    fn job() -> EmailJob {
        EmailJob::new(
            "tab1",
            "u1",
            "tmpl1",
            "E100",
            "jane@example.com",
            "Jane Doe",
            "Subject",
            "<p>body</p>",
        )
    }

    #[tokio::test]
    async fn webhook_applies_event_and_persists() {
        let (tracker, jobs, _dir) = tracker().await;
        let mut j = job();
        j.mark_sent("m1", Utc::now());
        jobs.insert(&j).await.unwrap();

        let applied = tracker
            .apply_webhook(&WebhookPayload {
                event_type: "delivered".into(),
                email_job_id: j.id,
                timestamp: 1_756_300_000,
                reason: None,
            })
            .await
            .unwrap();
        assert!(applied);

        let fetched = jobs.fetch(j.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Delivered);
        assert_eq!(
            fetched.delivered_at,
            Some(Utc.timestamp_opt(1_756_300_000, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn unknown_event_type_is_dropped_not_failed() {
        let (tracker, jobs, _dir) = tracker().await;
        let j = job();
        jobs.insert(&j).await.unwrap();

        let applied = tracker
            .apply_webhook(&WebhookPayload {
                event_type: "deferred".into(),
                email_job_id: j.id,
                timestamp: 1_756_300_000,
                reason: None,
            })
            .await
            .unwrap();
        assert!(!applied);

        let fetched = jobs.fetch(j.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn webhook_for_missing_job_is_not_found() {
        let (tracker, _jobs, _dir) = tracker().await;
        let err = tracker
            .apply_webhook(&WebhookPayload {
                event_type: "delivered".into(),
                email_job_id: Uuid::new_v4(),
                timestamp: 1_756_300_000,
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn bounce_reason_lands_in_error_message() {
        let (tracker, jobs, _dir) = tracker().await;
        let mut j = job();
        j.mark_sent("m1", Utc::now());
        jobs.insert(&j).await.unwrap();

        tracker
            .apply_webhook(&WebhookPayload {
                event_type: "bounced".into(),
                email_job_id: j.id,
                timestamp: 1_756_300_000,
                reason: Some("mailbox full".into()),
            })
            .await
            .unwrap();

        let fetched = jobs.fetch(j.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Bounced);
        assert_eq!(fetched.error_message.as_deref(), Some("mailbox full"));
    }

    struct ScriptedProvider {
        events: std::sync::Mutex<Vec<crate::provider::ProviderEvent>>,
    }

    #[async_trait::async_trait]
    impl DeliveryProvider for ScriptedProvider {
        async fn send(
            &self,
            _message: &crate::provider::OutboundMessage,
        ) -> Result<crate::provider::ProviderReceipt, crate::provider::ProviderError> {
            unimplemented!("sweep tests never send")
        }

        async fn poll_events(
            &self,
            _message_ids: &[String],
        ) -> Result<Vec<crate::provider::ProviderEvent>, crate::provider::ProviderError> {
            Ok(self.events.lock().unwrap().drain(..).collect())
        }
    }

    #[tokio::test]
    async fn sweep_accumulates_multiple_events_for_one_job() {
        let (tracker, jobs, _dir) = tracker().await;
        let mut j = job();
        j.mark_sent("m1", Utc::now());
        jobs.insert(&j).await.unwrap();

        // One sweep returns delivered then opened for the same message id;
        // the second event must not wipe the first one's timestamp.
        let provider = ScriptedProvider {
            events: std::sync::Mutex::new(vec![
                crate::provider::ProviderEvent {
                    message_id: "m1".into(),
                    event: DeliveryEvent::Delivered,
                    at: Utc.timestamp_opt(1_756_300_100, 0).unwrap(),
                    reason: None,
                },
                crate::provider::ProviderEvent {
                    message_id: "m1".into(),
                    event: DeliveryEvent::Opened,
                    at: Utc.timestamp_opt(1_756_300_200, 0).unwrap(),
                    reason: None,
                },
            ]),
        };

        let applied = tracker.poll_provider(&provider).await.unwrap();
        assert_eq!(applied, 2);

        let fetched = jobs.fetch(j.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Opened);
        assert_eq!(
            fetched.delivered_at,
            Some(Utc.timestamp_opt(1_756_300_100, 0).unwrap())
        );
        assert_eq!(
            fetched.opened_at,
            Some(Utc.timestamp_opt(1_756_300_200, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn record_appends_audit_line() {
        let (tracker, jobs, dir) = tracker().await;
        let mut j = job();
        jobs.insert(&j).await.unwrap();
        j.mark_failed("provider down");
        tracker.record(&j).await;

        let audit = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        let line: serde_json::Value = serde_json::from_str(audit.lines().next().unwrap()).unwrap();
        assert_eq!(line["status"], "failed");
        assert_eq!(line["errorMessage"], "provider down");
    }
}
