//! Email-job persistence.
//!
//! Jobs are append-and-update: created once by the dispatch engine, updated
//! by the status tracker, never deleted. Rows are the system of record for
//! the delivery lifecycle.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use lettermill_core::{EmailJob, JobStatus};

#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

/// Row mirror of [`EmailJob`]. Ids and statuses are stored as text.
#[derive(FromRow)]
struct DbEmailJob {
    id: String,
    letter_type_id: String,
    owner_user_id: String,
    template_id: String,
    employee_key: String,
    recipient_email: String,
    recipient_name: String,
    subject: String,
    body: String,
    attachments_json: String,
    cc_json: String,
    signature_ref: Option<String>,
    status: String,
    provider_message_id: Option<String>,
    error_message: Option<String>,
    retry_count: i32,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    clicked_at: Option<DateTime<Utc>>,
    bounced_at: Option<DateTime<Utc>>,
    dropped_at: Option<DateTime<Utc>>,
    unsubscribed_at: Option<DateTime<Utc>>,
}

impl DbEmailJob {
    fn into_job(self) -> Result<EmailJob, sqlx::Error> {
        let id = Uuid::parse_str(&self.id).map_err(|e| sqlx::Error::ColumnDecode {
            index: "id".into(),
            source: Box::new(e),
        })?;
        let status: JobStatus = self.status.parse().map_err(|e: String| {
            sqlx::Error::ColumnDecode {
                index: "status".into(),
                source: e.into(),
            }
        })?;
        Ok(EmailJob {
            id,
            letter_type_id: self.letter_type_id,
            owner_user_id: self.owner_user_id,
            template_id: self.template_id,
            employee_key: self.employee_key,
            recipient_email: self.recipient_email,
            recipient_name: self.recipient_name,
            subject: self.subject,
            body: self.body,
            attachments_json: self.attachments_json,
            cc_json: self.cc_json,
            signature_ref: self.signature_ref,
            status,
            provider_message_id: self.provider_message_id,
            error_message: self.error_message,
            retry_count: self.retry_count,
            created_at: self.created_at,
            sent_at: self.sent_at,
            delivered_at: self.delivered_at,
            opened_at: self.opened_at,
            clicked_at: self.clicked_at,
            bounced_at: self.bounced_at,
            dropped_at: self.dropped_at,
            unsubscribed_at: self.unsubscribed_at,
        })
    }
}

const JOB_COLUMNS: &str = "id, letter_type_id, owner_user_id, template_id, employee_key, \
     recipient_email, recipient_name, subject, body, attachments_json, cc_json, signature_ref, \
     status, provider_message_id, error_message, retry_count, created_at, sent_at, delivered_at, \
     opened_at, clicked_at, bounced_at, dropped_at, unsubscribed_at";

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, job: &EmailJob) -> Result<(), sqlx::Error> {
        let sql = format!(
            "INSERT INTO email_jobs ({JOB_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(job.id.to_string())
            .bind(&job.letter_type_id)
            .bind(&job.owner_user_id)
            .bind(&job.template_id)
            .bind(&job.employee_key)
            .bind(&job.recipient_email)
            .bind(&job.recipient_name)
            .bind(&job.subject)
            .bind(&job.body)
            .bind(&job.attachments_json)
            .bind(&job.cc_json)
            .bind(&job.signature_ref)
            .bind(job.status.as_str())
            .bind(&job.provider_message_id)
            .bind(&job.error_message)
            .bind(job.retry_count)
            .bind(job.created_at)
            .bind(job.sent_at)
            .bind(job.delivered_at)
            .bind(job.opened_at)
            .bind(job.clicked_at)
            .bind(job.bounced_at)
            .bind(job.dropped_at)
            .bind(job.unsubscribed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist the full mutable portion of a job.
    pub async fn update(&self, job: &EmailJob) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE email_jobs SET status = ?, provider_message_id = ?, error_message = ?, \
             retry_count = ?, sent_at = ?, delivered_at = ?, opened_at = ?, clicked_at = ?, \
             bounced_at = ?, dropped_at = ?, unsubscribed_at = ? WHERE id = ?",
        )
        .bind(job.status.as_str())
        .bind(&job.provider_message_id)
        .bind(&job.error_message)
        .bind(job.retry_count)
        .bind(job.sent_at)
        .bind(job.delivered_at)
        .bind(job.opened_at)
        .bind(job.clicked_at)
        .bind(job.bounced_at)
        .bind(job.dropped_at)
        .bind(job.unsubscribed_at)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<EmailJob>, sqlx::Error> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM email_jobs WHERE id = ?");
        let row = sqlx::query_as::<_, DbEmailJob>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(DbEmailJob::into_job).transpose()
    }

    /// Jobs awaiting a terminal signal from the provider, scanned by the
    /// reconciliation sweep.
    pub async fn fetch_in_flight(&self) -> Result<Vec<EmailJob>, sqlx::Error> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM email_jobs \
             WHERE status IN ('sent', 'queued') ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, DbEmailJob>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DbEmailJob::into_job).collect()
    }

    /// Queued jobs whose submission never reached the provider (no message
    /// id to reconcile against). The poll sweep hands these back to the
    /// dispatch pool.
    pub async fn fetch_queued_unsubmitted(&self) -> Result<Vec<EmailJob>, sqlx::Error> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM email_jobs \
             WHERE status = 'queued' AND provider_message_id IS NULL ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, DbEmailJob>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DbEmailJob::into_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::run_migrations;
    use chrono::TimeZone;
    use lettermill_core::DeliveryEvent;

    async fn store() -> JobStore {
        // A single connection keeps the in-memory database shared.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        JobStore::new(pool)
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
    async fn insert_and_fetch_round_trip() {
        let store = store().await;
        let j = job();
        store.insert(&j).await.unwrap();

        let fetched = store.fetch(j.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, j.id);
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.recipient_email, "jane@example.com");
    }

    #[tokio::test]
    async fn update_persists_status_and_timestamps() {
        let store = store().await;
        let mut j = job();
        store.insert(&j).await.unwrap();

        let at = Utc.timestamp_opt(1_756_300_000, 0).unwrap();
        j.mark_sent("ses-msg-1", at);
        j.apply_event(DeliveryEvent::Delivered, at, None);
        store.update(&j).await.unwrap();

        let fetched = store.fetch(j.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Delivered);
        assert_eq!(fetched.provider_message_id.as_deref(), Some("ses-msg-1"));
        assert_eq!(fetched.sent_at, Some(at));
        assert_eq!(fetched.delivered_at, Some(at));
    }

    #[tokio::test]
    async fn in_flight_scan_selects_sent_and_queued() {
        let store = store().await;

        let mut sent = job();
        sent.mark_sent("m1", Utc::now());
        store.insert(&sent).await.unwrap();

        let mut queued = job();
        queued.mark_queued();
        store.insert(&queued).await.unwrap();

        let mut failed = job();
        failed.mark_failed("boom");
        store.insert(&failed).await.unwrap();

        let in_flight = store.fetch_in_flight().await.unwrap();
        assert_eq!(in_flight.len(), 2);
        assert!(in_flight.iter().all(|j| j.id != failed.id));
    }

    #[tokio::test]
    async fn fetch_unknown_id_is_none() {
        let store = store().await;
        assert!(store.fetch(Uuid::new_v4()).await.unwrap().is_none());
    }
}
