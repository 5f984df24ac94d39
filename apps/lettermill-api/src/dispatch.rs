//! Background dispatch pool.
//!
//! Sends are fire-and-forget: the handler persists a `pending` job, submits
//! a dispatch request, and returns immediately. A bounded worker pool picks
//! requests up, renders the letter, hands it to the delivery provider under
//! a wall-clock timeout, and records the outcome through the tracker.
//! Rendering happens here rather than in the handler so a render failure
//! surfaces as a `failed` job, not a lost request.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use lettermill_core::resolve::TokenMap;
use lettermill_core::{clean_signature, render, EmailJob};

use crate::models::AttachmentDto;
use crate::provider::{DeliveryProvider, OutboundMessage, ProviderError};
use crate::tracker::StatusTracker;

/// Everything a worker needs to render and send one letter. Captured at
/// submission time so the worker never re-reads the catalog.
pub struct DispatchRequest {
    /// The job, already persisted as `pending`.
    pub job: EmailJob,
    /// Template body with placeholder slots still in place.
    pub template_body: String,
    pub tokens: TokenMap,
    /// Raw signature image bytes; cleaned in the worker.
    pub signature: Option<Vec<u8>>,
    pub cc: Vec<String>,
    pub extra_attachments: Vec<AttachmentDto>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch queue closed")]
    QueueClosed,
}

/// Handle for submitting dispatch requests. Cloneable; all clones feed the
/// same pool.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<DispatchRequest>,
}

impl Dispatcher {
    /// Start the pool: one router task plus up to `workers` concurrent
    /// sends, gated by a semaphore.
    pub fn start(
        workers: usize,
        queue_depth: usize,
        timeout: Duration,
        provider: Arc<dyn DeliveryProvider>,
        tracker: StatusTracker,
        default_from: String,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<DispatchRequest>(queue_depth);
        let permits = Arc::new(Semaphore::new(workers));

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let provider = provider.clone();
                let tracker = tracker.clone();
                let from = default_from.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    process_one(request, provider.as_ref(), &tracker, &from, timeout).await;
                });
            }
            info!("dispatch pool shut down");
        });

        Self { tx }
    }

    /// Queue a request. Applies backpressure when the queue is full.
    pub async fn submit(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }
}

/// Render and send one letter, recording the outcome. Never returns an
/// error: every failure path becomes a job transition.
async fn process_one(
    request: DispatchRequest,
    provider: &dyn DeliveryProvider,
    tracker: &StatusTracker,
    from: &str,
    timeout: Duration,
) {
    let mut job = request.job;
    debug!(job_id = %job.id, to = %job.recipient_email, "dispatching");

    let signature = match request.signature {
        Some(raw) => match clean_signature(&raw) {
            Ok(cleaned) => Some(cleaned),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "signature cleanup failed");
                job.mark_failed(&format!("signature cleanup failed: {e}"));
                tracker.record(&job).await;
                return;
            }
        },
        None => None,
    };

    let rendered = render(&request.template_body, &request.tokens, signature.as_deref());
    let html = rendered.to_html();

    // The letter travels both as the message body and as an attached
    // document, alongside any caller-supplied attachments.
    let mut attachments = vec![AttachmentDto {
        filename: "letter.html".to_string(),
        content: BASE64.encode(html.as_bytes()),
        content_type: "text/html".to_string(),
    }];
    attachments.extend(request.extra_attachments);

    let message = OutboundMessage {
        from: from.to_string(),
        to: job.recipient_email.clone(),
        cc: request.cc,
        subject: job.subject.clone(),
        html,
        attachments,
    };

    match tokio::time::timeout(timeout, provider.send(&message)).await {
        Ok(Ok(receipt)) => {
            job.mark_sent(&receipt.message_id, chrono::Utc::now());
            info!(job_id = %job.id, message_id = %receipt.message_id, "dispatched");
        }
        Ok(Err(ProviderError::Throttled(msg))) => {
            warn!(job_id = %job.id, error = %msg, "provider throttled, job queued");
            job.mark_queued();
        }
        Ok(Err(e)) => {
            error!(job_id = %job.id, error = %e, "dispatch failed");
            job.mark_failed(&e.to_string());
        }
        Err(_) => {
            error!(job_id = %job.id, "dispatch timed out after {}s", timeout.as_secs());
            job.mark_failed(&format!("dispatch timed out after {}s", timeout.as_secs()));
        }
    }

    tracker.record(&job).await;
}
