//! Delivery provider abstraction and the AWS SES implementation.
//!
//! The dispatch engine and the reconciliation sweep talk to the provider
//! only through [`DeliveryProvider`], so tests swap in a mock and the SES
//! client stays at the edge.

use async_trait::async_trait;
use aws_sdk_sesv2::{
    primitives::Blob,
    types::{EmailContent, RawMessage},
    Client as SesClient,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, instrument};
use uuid::Uuid;

use lettermill_core::DeliveryEvent;

use crate::models::AttachmentDto;

/// One outbound message, fully rendered and ready to hand to the provider.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<AttachmentDto>,
}

/// Acknowledgement of a successful hand-off.
#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    /// Provider-assigned id, stored for webhook correlation.
    pub message_id: String,
}

/// A provider-side event discovered by the reconciliation sweep.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub message_id: String,
    pub event: DeliveryEvent,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider configuration error: {0}")]
    Config(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("provider rejected the message: {0}")]
    Rejected(String),

    #[error("provider capacity exceeded: {0}")]
    Throttled(String),
}

#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Hand one message to the provider.
    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError>;

    /// Events for in-flight messages, queried by the reconciliation sweep.
    /// Providers without a pull API return nothing; their events arrive by
    /// webhook only.
    async fn poll_events(&self, _message_ids: &[String]) -> Result<Vec<ProviderEvent>, ProviderError> {
        Ok(Vec::new())
    }
}

/// AWS SES v2 delivery.
pub struct SesProvider {
    client: SesClient,
    configuration_set: Option<String>,
}

impl SesProvider {
    pub async fn new() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: SesClient::new(&config),
            configuration_set: std::env::var("SES_CONFIGURATION_SET").ok(),
        }
    }
}

#[async_trait]
impl DeliveryProvider for SesProvider {
    #[instrument(skip(self, message), fields(to = %message.to, subject = %message.subject))]
    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError> {
        let mime = build_mime_message(message)?;

        let raw = RawMessage::builder()
            .data(Blob::new(mime))
            .build()
            .map_err(|e| ProviderError::Build(e.to_string()))?;
        let content = EmailContent::builder().raw(raw).build();

        let mut request = self.client.send_email().content(content);
        if let Some(ref config_set) = self.configuration_set {
            request = request.configuration_set_name(config_set);
        }

        let result = request.send().await.map_err(|e| {
            let text = e.to_string();
            error!(error = %text, "SES send failed");
            if text.contains("Throttling") || text.contains("TooManyRequests") {
                ProviderError::Throttled(text)
            } else {
                ProviderError::Rejected(text)
            }
        })?;

        let message_id = result.message_id().unwrap_or("unknown").to_string();
        info!(message_id = %message_id, "email handed to SES");
        Ok(ProviderReceipt { message_id })
    }
}

/// Build a raw MIME message: multipart/mixed wrapping the HTML body and any
/// base64-encoded attachments.
fn build_mime_message(message: &OutboundMessage) -> Result<Vec<u8>, ProviderError> {
    use std::fmt::Write;

    let boundary = format!("----=_Part_{}", Uuid::new_v4().simple());
    let mut out = String::new();

    writeln!(out, "From: {}", message.from).unwrap();
    writeln!(out, "To: {}", message.to).unwrap();
    if !message.cc.is_empty() {
        writeln!(out, "Cc: {}", message.cc.join(", ")).unwrap();
    }
    writeln!(out, "Subject: {}", message.subject).unwrap();
    writeln!(out, "MIME-Version: 1.0").unwrap();
    writeln!(out, "Content-Type: multipart/mixed; boundary=\"{boundary}\"").unwrap();
    writeln!(out).unwrap();

    writeln!(out, "--{boundary}").unwrap();
    writeln!(out, "Content-Type: text/html; charset=UTF-8").unwrap();
    writeln!(out, "Content-Transfer-Encoding: quoted-printable").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "{}", message.html).unwrap();

    for attachment in &message.attachments {
        writeln!(out, "--{boundary}").unwrap();
        writeln!(
            out,
            "Content-Type: {}; name=\"{}\"",
            attachment.content_type, attachment.filename
        )
        .unwrap();
        writeln!(out, "Content-Transfer-Encoding: base64").unwrap();
        writeln!(
            out,
            "Content-Disposition: attachment; filename=\"{}\"",
            attachment.filename
        )
        .unwrap();
        writeln!(out).unwrap();

        // Attachment content is already base64 encoded; re-wrap at 76 columns.
        for chunk in attachment.content.as_bytes().chunks(76) {
            if !chunk.is_ascii() {
                return Err(ProviderError::Build(format!(
                    "attachment {} is not valid base64",
                    attachment.filename
                )));
            }
            writeln!(out, "{}", std::str::from_utf8(chunk).unwrap_or("")).unwrap();
        }
    }

    writeln!(out, "--{boundary}--").unwrap();
    Ok(out.into_bytes())
}
