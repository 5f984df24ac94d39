//! Domain types for the letter pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::JobStatus;
use crate::template::scan_tokens;

/// Where a letter type's employee rows come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    /// Rows imported from an external file upload.
    FileImport,
    /// Rows maintained directly in a live table.
    LiveTable,
}

impl std::fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSourceKind::FileImport => write!(f, "file_import"),
            DataSourceKind::LiveTable => write!(f, "live_table"),
        }
    }
}

impl std::str::FromStr for DataSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file_import" => Ok(DataSourceKind::FileImport),
            "live_table" => Ok(DataSourceKind::LiveTable),
            other => Err(format!("unknown data source kind: {other}")),
        }
    }
}

/// The type a field's values are expected to carry.
///
/// Placeholder resolution treats every value as a string; the type exists for
/// the administrative surface and import validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Email,
    Phone,
    Currency,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
            FieldType::Currency => "currency",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(FieldType::Text),
            "number" => Ok(FieldType::Number),
            "date" => Ok(FieldType::Date),
            "email" => Ok(FieldType::Email),
            "phone" => Ok(FieldType::Phone),
            "currency" => Ok(FieldType::Currency),
            other => Err(format!("unknown field type: {other}")),
        }
    }
}

/// A named, typed placeholder slot owned by a letter type.
///
/// `key` is the primary lookup token used during resolution; `name` (the
/// display name, usually the raw source column header) is the secondary one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub order: i32,
    pub default_value: Option<String>,
}

impl Field {
    pub fn text(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            field_type: FieldType::Text,
            required: false,
            order: 0,
            default_value: None,
        }
    }
}

/// A tenant-defined document category ("tab") with its own fields and
/// backing dynamic table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetterType {
    pub id: String,
    pub name: String,
    pub source: DataSourceKind,
    pub active: bool,
    /// Column in the dynamic table holding the employee key.
    pub key_column: String,
    /// Explicit backing-table name recorded at import time, when set.
    pub table_override: Option<String>,
    pub owner_user_id: String,
    pub fields: Vec<Field>,
}

impl LetterType {
    /// Backing-table name: the explicit override when recorded at import
    /// time, otherwise derived from the display name with every
    /// non-alphanumeric character replaced by `_`.
    pub fn table_name(&self) -> String {
        match &self.table_override {
            Some(t) => t.clone(),
            None => self
                .name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect(),
        }
    }
}

/// Canonical employee attributes, kept alongside the dynamic row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub key: String,
    pub name: String,
    pub email: String,
}

impl EmployeeRecord {
    /// Portion of `name` before the first whitespace.
    pub fn first_name(&self) -> &str {
        self.name
            .split_whitespace()
            .next()
            .unwrap_or(self.name.as_str())
    }

    /// Portion of `name` after the first whitespace, empty for single-word
    /// names.
    pub fn last_name(&self) -> &str {
        match self.name.find(char::is_whitespace) {
            Some(idx) => self.name[idx..].trim_start(),
            None => "",
        }
    }
}

/// A stored signature image asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureAsset {
    pub id: String,
    pub display_name: String,
    pub path: String,
}

/// A letter template: a body with `{Token}` slots and an optional
/// `[signature]` anchor line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetterTemplate {
    pub id: String,
    pub letter_type_id: String,
    pub name: String,
    pub body: String,
}

impl LetterTemplate {
    /// Placeholder tokens discovered by scanning the body.
    pub fn tokens(&self) -> Vec<String> {
        scan_tokens(&self.body)
    }
}

/// The unit of delivery work: one outbound message tracked through the
/// delivery provider. Created by the dispatch engine, mutated only by the
/// status tracker, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJob {
    pub id: Uuid,
    pub letter_type_id: String,
    pub owner_user_id: String,
    pub template_id: String,
    pub employee_key: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub subject: String,
    pub body: String,
    /// Serialized attachment list (filename/content/content_type records).
    pub attachments_json: String,
    /// Serialized cc address list, kept so a retry reproduces the original
    /// send.
    pub cc_json: String,
    /// Signature selection (asset id, file name, or lookup token) recorded
    /// at submission time.
    pub signature_ref: Option<String>,
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

impl EmailJob {
    /// A fresh job in `pending`, ready to hand to the dispatch pool.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        letter_type_id: &str,
        owner_user_id: &str,
        template_id: &str,
        employee_key: &str,
        recipient_email: &str,
        recipient_name: &str,
        subject: &str,
        body: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            letter_type_id: letter_type_id.to_string(),
            owner_user_id: owner_user_id.to_string(),
            template_id: template_id.to_string(),
            employee_key: employee_key.to_string(),
            recipient_email: recipient_email.to_string(),
            recipient_name: recipient_name.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            attachments_json: "[]".to_string(),
            cc_json: "[]".to_string(),
            signature_ref: None,
            status: JobStatus::Pending,
            provider_message_id: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            bounced_at: None,
            dropped_at: None,
            unsubscribed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_replaces_non_alphanumerics() {
        let tab = LetterType {
            id: "t1".into(),
            name: "Offer Letters (2026)".into(),
            source: DataSourceKind::FileImport,
            active: true,
            key_column: "EMP ID".into(),
            table_override: None,
            owner_user_id: "u1".into(),
            fields: vec![],
        };
        assert_eq!(tab.table_name(), "Offer_Letters__2026_");
    }

    #[test]
    fn table_override_wins() {
        let tab = LetterType {
            id: "t1".into(),
            name: "Offer Letters".into(),
            source: DataSourceKind::FileImport,
            active: true,
            key_column: "EMP ID".into(),
            table_override: Some("offer_letters_v2".into()),
            owner_user_id: "u1".into(),
            fields: vec![],
        };
        assert_eq!(tab.table_name(), "offer_letters_v2");
    }

    #[test]
    fn name_split_on_first_whitespace() {
        let emp = EmployeeRecord {
            key: "E100".into(),
            name: "Jane Anne Doe".into(),
            email: "jane@example.com".into(),
        };
        assert_eq!(emp.first_name(), "Jane");
        assert_eq!(emp.last_name(), "Anne Doe");

        let single = EmployeeRecord {
            key: "E101".into(),
            name: "Prince".into(),
            email: "p@example.com".into(),
        };
        assert_eq!(single.first_name(), "Prince");
        assert_eq!(single.last_name(), "");
    }

    #[test]
    fn new_job_starts_pending() {
        let job = EmailJob::new(
            "t1",
            "u1",
            "tmpl1",
            "E100",
            "jane@example.com",
            "Jane Doe",
            "Your letter",
            "<p>hi</p>",
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.sent_at.is_none());
        assert!(job.error_message.is_none());
    }
}
