//! Core pipeline for personalized letter generation and email delivery.
//!
//! The pipeline, leaf first:
//!
//! 1. [`resolve`] — builds a case-insensitive token map from a dynamic
//!    employee row, canonical employee attributes, a fixed synonym alias
//!    table, and system placeholders.
//! 2. [`signature`] — normalizes an uploaded signature image (alpha flatten,
//!    background snap-to-white, ink-bounding-box crop) so it can be inserted
//!    into a rendered letter. Cleanup is deterministic and idempotent.
//! 3. [`template`] — scans `{Token}` placeholders, fills slots against the
//!    resolved map, inserts the signature at its `[signature]` anchor, and
//!    derives a paged preview from the rendered bytes.
//! 4. [`status`] — the email-job state machine driven by provider webhook
//!    events, local dispatch results, and manual retries.
//!
//! Everything here is I/O free (apart from image codec work); stores,
//! providers, and HTTP live in the `lettermill-api` app.

pub mod model;
pub mod resolve;
pub mod signature;
pub mod status;
pub mod template;

pub use model::{
    DataSourceKind, EmailJob, EmployeeRecord, Field, FieldType, LetterTemplate, LetterType,
    SignatureAsset,
};
pub use resolve::{resolve, TokenMap};
pub use signature::{clean_signature, find_in_dir, first_in_dir, SignatureError};
pub use status::{DeliveryEvent, JobStatus, RetryError};
pub use template::{derive_preview, render, scan_tokens, RenderedDocument, SIGNATURE_ANCHOR};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
