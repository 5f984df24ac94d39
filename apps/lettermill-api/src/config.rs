//! Runtime configuration, loaded from the environment.

use std::path::PathBuf;

/// Configuration for the Lettermill API
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string.
    pub database_url: String,

    /// Directory scanned for signature files during fallback lookup.
    pub signature_dir: PathBuf,

    /// Flat-file audit log receiving a copy of every job transition.
    pub audit_log_path: PathBuf,

    /// Organization name injected as a system placeholder.
    pub organization: String,

    /// Default "from" address for outbound mail.
    pub default_from: String,

    /// Number of concurrent background dispatches.
    pub dispatch_workers: usize,

    /// Depth of the dispatch queue before submission applies backpressure.
    pub dispatch_queue_depth: usize,

    /// Wall-clock budget for one render-and-send, in seconds. Generous to
    /// accommodate slow document rendering.
    pub dispatch_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:lettermill.db?mode=rwc".to_string(),
            signature_dir: PathBuf::from("./signatures"),
            audit_log_path: PathBuf::from("./email_jobs_audit.jsonl"),
            organization: "Lettermill".to_string(),
            default_from: "Lettermill <noreply@lettermill.io>".to_string(),
            dispatch_workers: 4,
            dispatch_queue_depth: 64,
            dispatch_timeout_secs: 300,
        }
    }
}

impl AppConfig {
    /// Load from environment variables, with defaults for everything.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            signature_dir: std::env::var("SIGNATURE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.signature_dir),
            audit_log_path: std::env::var("AUDIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.audit_log_path),
            organization: std::env::var("ORGANIZATION_NAME").unwrap_or(defaults.organization),
            default_from: std::env::var("DEFAULT_FROM").unwrap_or(defaults.default_from),
            dispatch_workers: std::env::var("DISPATCH_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.dispatch_workers),
            dispatch_queue_depth: std::env::var("DISPATCH_QUEUE_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.dispatch_queue_depth),
            dispatch_timeout_secs: std::env::var("DISPATCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.dispatch_timeout_secs),
        }
    }
}
