//! HTTP handlers for the Lettermill API

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::Html,
    Json,
};
use email_address::EmailAddress;
use serde_json::json;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use lettermill_core::model::{EmployeeRecord, LetterType};
use lettermill_core::resolve::TokenMap;
use lettermill_core::{clean_signature, derive_preview, find_in_dir, first_in_dir, render, resolve, EmailJob};

use crate::dispatch::DispatchRequest;
use crate::error::ApiError;
use crate::models::{
    JobCreatedResponse, JobResponse, PollResponse, PreviewBody, SendEmailBody, WebhookPayload,
};
use crate::notify::user_group;
use crate::state::AppState;

/// Health check endpoint
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "lettermill-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Everything needed to render one employee's letter.
struct RenderPlan {
    tab: LetterType,
    employee: EmployeeRecord,
    tokens: TokenMap,
    /// Raw signature bytes; cleanup happens at render time.
    signature: Option<Vec<u8>>,
}

/// Load the tab, employee, and dynamic row, resolve the token map, and pick
/// the signature bytes.
async fn build_render_plan(
    state: &AppState,
    tab_id: &str,
    employee_key: &str,
    signature_ref: Option<&str>,
    overrides: Option<&std::collections::HashMap<String, String>>,
) -> Result<RenderPlan, ApiError> {
    let tab = state
        .tabs
        .get_letter_type(tab_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("letter type {tab_id}")))?;
    if !tab.active {
        return Err(ApiError::Validation(format!(
            "letter type {tab_id} is not active"
        )));
    }

    let employee = state
        .tabs
        .get_employee(tab_id, employee_key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("employee {employee_key}")))?;

    let row = state
        .rows
        .fetch_row(&tab.table_name(), &tab.key_column, employee_key)
        .await?;

    let tokens = resolve(
        &employee,
        &row,
        &tab.fields,
        &state.config.organization,
        overrides,
    );

    let signature = match signature_ref {
        Some(token) => load_signature(state, token).await?,
        None => None,
    };

    Ok(RenderPlan {
        tab,
        employee,
        tokens,
        signature,
    })
}

/// Signature lookup chain: catalog asset by id or name, then a literal file
/// path, then a directory scan by token, then the first file in the
/// directory. A dead end yields no signature rather than a failed request.
async fn load_signature(state: &AppState, token: &str) -> Result<Option<Vec<u8>>, ApiError> {
    if let Some(asset) = state.tabs.get_signature(token).await? {
        match std::fs::read(&asset.path) {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(e) => {
                warn!(path = %asset.path, error = %e, "signature asset unreadable, falling back");
            }
        }
    }

    let literal = std::path::Path::new(token);
    if literal.is_file() {
        if let Ok(bytes) = std::fs::read(literal) {
            return Ok(Some(bytes));
        }
    }

    let dir = &state.config.signature_dir;
    let path = find_in_dir(dir, token).or_else(|| first_in_dir(dir));
    match path {
        Some(path) => match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "signature file unreadable");
                Ok(None)
            }
        },
        None => {
            warn!(token, "no signature found, sending without one");
            Ok(None)
        }
    }
}

/// `POST /api/tabs/:tab_id/send-email`: persist a pending job and hand it to
/// the dispatch pool. Fire-and-forget; the response carries only the job id.
pub async fn send_email(
    State(state): State<Arc<AppState>>,
    Path(tab_id): Path<String>,
    Json(body): Json<SendEmailBody>,
) -> Result<(StatusCode, Json<JobCreatedResponse>), ApiError> {
    let plan = build_render_plan(
        &state,
        &tab_id,
        &body.employee_id,
        body.signature.as_deref(),
        None,
    )
    .await?;

    if !EmailAddress::is_valid(&plan.employee.email) {
        return Err(ApiError::Validation(format!(
            "invalid recipient address: {}",
            plan.employee.email
        )));
    }
    for cc in body.cc.iter().flatten() {
        if !EmailAddress::is_valid(cc) {
            return Err(ApiError::Validation(format!("invalid cc address: {cc}")));
        }
    }

    let template = state
        .tabs
        .get_template(&body.template_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("template {}", body.template_id)))?;
    if template.letter_type_id != tab_id {
        return Err(ApiError::Validation(format!(
            "template {} does not belong to letter type {tab_id}",
            body.template_id
        )));
    }

    let letter_body = body.content.clone().unwrap_or(template.body);
    let owner = body
        .user_id
        .clone()
        .unwrap_or_else(|| plan.tab.owner_user_id.clone());
    let cc = body.cc.clone().unwrap_or_default();

    let mut job = EmailJob::new(
        &tab_id,
        &owner,
        &body.template_id,
        &body.employee_id,
        &plan.employee.email,
        &plan.employee.name,
        &body.subject,
        &letter_body,
    );
    job.cc_json = serde_json::to_string(&cc).unwrap_or_else(|_| "[]".into());
    job.signature_ref = body.signature.clone();
    job.attachments_json =
        serde_json::to_string(&body.extra_attachments).unwrap_or_else(|_| "[]".into());
    state.jobs.insert(&job).await?;

    info!(job_id = %job.id, to = %job.recipient_email, "email job accepted");

    let response = JobCreatedResponse {
        job_id: job.id,
        status: job.status,
    };
    state
        .dispatcher
        .submit(DispatchRequest {
            job,
            template_body: letter_body,
            tokens: plan.tokens,
            signature: plan.signature,
            cc,
            extra_attachments: body.extra_attachments,
        })
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `POST /api/tabs/:tab_id/generate-preview`: render the letter inline with
/// caller overrides and wrap it in the fixed page layout.
pub async fn generate_preview(
    State(state): State<Arc<AppState>>,
    Path(tab_id): Path<String>,
    Json(body): Json<PreviewBody>,
) -> Result<Html<String>, ApiError> {
    let plan = build_render_plan(
        &state,
        &tab_id,
        &body.employee_id,
        body.signature.as_deref(),
        Some(&body.overrides),
    )
    .await?;

    let template = state
        .tabs
        .get_template(&body.template_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("template {}", body.template_id)))?;
    let letter_body = body.content.unwrap_or(template.body);

    let signature = match plan.signature {
        Some(raw) => Some(
            clean_signature(&raw)
                .map_err(|e| ApiError::Validation(format!("signature cleanup failed: {e}")))?,
        ),
        None => None,
    };

    let rendered = render(&letter_body, &plan.tokens, signature.as_deref());
    let preview = derive_preview(&rendered.into_bytes());
    Ok(Html(String::from_utf8_lossy(&preview).into_owned()))
}

/// `POST /api/webhooks/delivery`: apply one provider callback event.
pub async fn delivery_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let applied = state.tracker.apply_webhook(&payload).await?;
    Ok(Json(json!({ "applied": applied })))
}

/// `POST /api/email-status/poll`: reconciliation sweep over in-flight jobs.
/// Applies provider events, then hands queued jobs that never reached the
/// provider back to the dispatch pool so a throttled submission is not a
/// dead end.
pub async fn poll_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PollResponse>, ApiError> {
    let applied = state.tracker.poll_provider(state.provider.as_ref()).await?;

    let mut redispatched = 0;
    for job in state.jobs.fetch_queued_unsubmitted().await? {
        let plan = match build_render_plan(
            &state,
            &job.letter_type_id,
            &job.employee_key,
            job.signature_ref.as_deref(),
            None,
        )
        .await
        {
            Ok(plan) => plan,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "queued job could not be re-planned");
                continue;
            }
        };

        let cc: Vec<String> = serde_json::from_str(&job.cc_json).unwrap_or_default();
        let extra_attachments = serde_json::from_str(&job.attachments_json).unwrap_or_default();
        let template_body = job.body.clone();
        let job_id = job.id;
        if state
            .dispatcher
            .submit(DispatchRequest {
                job,
                template_body,
                tokens: plan.tokens,
                signature: plan.signature,
                cc,
                extra_attachments,
            })
            .await
            .is_ok()
        {
            info!(job_id = %job_id, "queued job handed back to dispatch");
            redispatched += 1;
        }
    }

    Ok(Json(PollResponse {
        applied,
        redispatched,
    }))
}

/// `GET /api/jobs/:id`: full job view.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .jobs
        .fetch(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("email job {id}")))?;
    Ok(Json(job.into()))
}

/// `POST /api/jobs/:id/retry`: return a failed, bounced, or dropped job to
/// `pending` and re-dispatch it exactly once, re-resolving against the
/// current row data.
pub async fn retry_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobCreatedResponse>, ApiError> {
    let mut job = state
        .jobs
        .fetch(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("email job {id}")))?;

    // Rebuild the render plan before touching the job so a broken catalog
    // leaves the job state untouched.
    let plan = build_render_plan(
        &state,
        &job.letter_type_id,
        &job.employee_key,
        job.signature_ref.as_deref(),
        None,
    )
    .await?;

    job.begin_retry()
        .map_err(|e| ApiError::Conflict(e.to_string()))?;
    state.tracker.record(&job).await;

    info!(job_id = %job.id, retry_count = job.retry_count, "email job retry accepted");

    let cc: Vec<String> = serde_json::from_str(&job.cc_json).unwrap_or_default();
    let extra_attachments = serde_json::from_str(&job.attachments_json).unwrap_or_default();
    let response = JobCreatedResponse {
        job_id: job.id,
        status: job.status,
    };
    let template_body = job.body.clone();
    state
        .dispatcher
        .submit(DispatchRequest {
            job,
            template_body,
            tokens: plan.tokens,
            signature: plan.signature,
            cc,
            extra_attachments,
        })
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(Json(response))
}

/// `GET /api/notifications/:user_id/stream`: SSE stream of status events for
/// one user's jobs.
pub async fn notifications_stream(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.notifier.subscribe(&user_group(&user_id)).await;
    let stream = BroadcastStream::new(rx).filter_map(|event| {
        event
            .ok()
            .and_then(|e| Event::default().event("status").json_data(&e).ok())
            .map(Ok)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
