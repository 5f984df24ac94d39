//! Request and response models for the Lettermill API

use chrono::{DateTime, Utc};
use lettermill_core::{EmailJob, JobStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An attachment supplied by the caller alongside the generated letter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDto {
    pub filename: String,
    /// Base64-encoded content.
    pub content: String,
    pub content_type: String,
}

/// Body of `POST /api/tabs/:tab_id/send-email`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailBody {
    pub employee_id: String,
    pub template_id: String,
    pub subject: String,
    /// Optional body override; when absent the stored template body is used.
    pub content: Option<String>,
    /// Signature selection: asset id, file path, or bare token for the
    /// directory fallback scan.
    #[serde(alias = "signaturePath")]
    pub signature: Option<String>,
    pub cc: Option<Vec<String>>,
    #[serde(default)]
    pub extra_attachments: Vec<AttachmentDto>,
    /// Acting user, recorded as the job owner for notification fan-out.
    pub user_id: Option<String>,
}

/// Body of `POST /api/tabs/:tab_id/generate-preview`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewBody {
    pub employee_id: String,
    pub template_id: String,
    pub content: Option<String>,
    #[serde(alias = "signaturePath")]
    pub signature: Option<String>,
    /// Caller-supplied token overrides, applied after all other sources.
    #[serde(default)]
    pub overrides: std::collections::HashMap<String, String>,
}

/// `202 Accepted` response for a fire-and-forget send.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreatedResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Provider callback payload for `POST /api/webhooks/delivery`. Providers
/// post snake_case field names.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub event_type: String,
    pub email_job_id: Uuid,
    /// Event time as epoch seconds, recorded verbatim.
    pub timestamp: i64,
    pub reason: Option<String>,
}

/// Response of `POST /api/email-status/poll`.
#[derive(Debug, Clone, Serialize)]
pub struct PollResponse {
    /// Number of provider events applied during the sweep.
    pub applied: usize,
    /// Queued jobs that never reached the provider, handed back to the
    /// dispatch pool.
    pub redispatched: usize,
}

/// A status change pushed to subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn from_job(job: &EmailJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            error_message: job.error_message.clone(),
            at: Utc::now(),
        }
    }
}

/// Full job view returned by `GET /api/jobs/:id`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: Uuid,
    pub letter_type_id: String,
    pub template_id: String,
    pub employee_key: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub subject: String,
    pub status: JobStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub dropped_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl From<EmailJob> for JobResponse {
    fn from(job: EmailJob) -> Self {
        Self {
            id: job.id,
            letter_type_id: job.letter_type_id,
            template_id: job.template_id,
            employee_key: job.employee_key,
            recipient_email: job.recipient_email,
            recipient_name: job.recipient_name,
            subject: job.subject,
            status: job.status,
            provider_message_id: job.provider_message_id,
            error_message: job.error_message,
            retry_count: job.retry_count,
            created_at: job.created_at,
            sent_at: job.sent_at,
            delivered_at: job.delivered_at,
            opened_at: job.opened_at,
            clicked_at: job.clicked_at,
            bounced_at: job.bounced_at,
            dropped_at: job.dropped_at,
            unsubscribed_at: job.unsubscribed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_body_accepts_camel_case() {
        let json = r#"{
            "employeeId": "E100",
            "templateId": "tmpl1",
            "subject": "Your offer",
            "signature": "hr-head",
            "cc": ["manager@example.com"],
            "userId": "u42"
        }"#;
        let body: SendEmailBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.employee_id, "E100");
        assert_eq!(body.signature.as_deref(), Some("hr-head"));
        assert!(body.extra_attachments.is_empty());
        assert_eq!(body.user_id.as_deref(), Some("u42"));
    }

    #[test]
    fn send_body_accepts_signature_path_alias() {
        let json = r#"{
            "employeeId": "E100",
            "templateId": "tmpl1",
            "subject": "Your offer",
            "signaturePath": "/var/signatures/hr-head.png"
        }"#;
        let body: SendEmailBody = serde_json::from_str(json).unwrap();
        assert_eq!(
            body.signature.as_deref(),
            Some("/var/signatures/hr-head.png")
        );
    }

    #[test]
    fn webhook_payload_is_snake_case() {
        let json = r#"{
            "event_type": "bounced",
            "email_job_id": "7f1e9d8a-3c42-4b6e-9a1f-0d2c4e6a8b0c",
            "timestamp": 1756300000,
            "reason": "mailbox full"
        }"#;
        let payload: WebhookPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.event_type, "bounced");
        assert_eq!(payload.timestamp, 1756300000);
        assert_eq!(payload.reason.as_deref(), Some("mailbox full"));
    }
}
