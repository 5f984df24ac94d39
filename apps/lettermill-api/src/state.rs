//! Application state for the Lettermill API

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::AppConfig;
use crate::dispatch::Dispatcher;
use crate::notify::Notifier;
use crate::provider::{DeliveryProvider, SesProvider};
use crate::store::{JobStore, RowStore, TabStore};
use crate::tracker::StatusTracker;

pub struct AppState {
    pub config: AppConfig,
    pub db: SqlitePool,
    pub tabs: TabStore,
    pub rows: RowStore,
    pub jobs: JobStore,
    pub notifier: Notifier,
    pub tracker: StatusTracker,
    pub dispatcher: Dispatcher,
    pub provider: Arc<dyn DeliveryProvider>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Connecting to database: {}", config.database_url);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await?;
        run_migrations(&pool).await?;

        let provider: Arc<dyn DeliveryProvider> = Arc::new(SesProvider::new().await);
        Ok(Self::assemble(config, pool, provider))
    }

    /// Build state around an existing pool and provider. Used by tests to
    /// swap in an in-memory database and a mock provider.
    pub async fn with_provider(
        config: AppConfig,
        pool: SqlitePool,
        provider: Arc<dyn DeliveryProvider>,
    ) -> Result<Self> {
        run_migrations(&pool).await?;
        Ok(Self::assemble(config, pool, provider))
    }

    fn assemble(config: AppConfig, pool: SqlitePool, provider: Arc<dyn DeliveryProvider>) -> Self {
        let tabs = TabStore::new(pool.clone());
        let rows = RowStore::new(pool.clone());
        let jobs = JobStore::new(pool.clone());
        let notifier = Notifier::new();
        let tracker = StatusTracker::new(
            jobs.clone(),
            notifier.clone(),
            config.audit_log_path.clone(),
        );
        let dispatcher = Dispatcher::start(
            config.dispatch_workers,
            config.dispatch_queue_depth,
            Duration::from_secs(config.dispatch_timeout_secs),
            provider.clone(),
            tracker.clone(),
            config.default_from.clone(),
        );

        Self {
            config,
            db: pool,
            tabs,
            rows,
            jobs,
            notifier,
            tracker,
            dispatcher,
            provider,
        }
    }
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS letter_types (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'file_import',
            active BOOLEAN NOT NULL DEFAULT TRUE,
            key_column TEXT NOT NULL,
            table_override TEXT,
            owner_user_id TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fields (
            letter_type_id TEXT NOT NULL REFERENCES letter_types(id),
            key TEXT NOT NULL,
            name TEXT NOT NULL,
            field_type TEXT NOT NULL DEFAULT 'text',
            required BOOLEAN NOT NULL DEFAULT FALSE,
            field_order INTEGER NOT NULL DEFAULT 0,
            default_value TEXT,
            PRIMARY KEY (letter_type_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id TEXT PRIMARY KEY,
            letter_type_id TEXT NOT NULL REFERENCES letter_types(id),
            name TEXT NOT NULL,
            body TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signatures (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            path TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS employees (
            letter_type_id TEXT NOT NULL REFERENCES letter_types(id),
            key TEXT NOT NULL,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            PRIMARY KEY (letter_type_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_jobs (
            id TEXT PRIMARY KEY,
            letter_type_id TEXT NOT NULL,
            owner_user_id TEXT NOT NULL,
            template_id TEXT NOT NULL,
            employee_key TEXT NOT NULL,
            recipient_email TEXT NOT NULL,
            recipient_name TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            attachments_json TEXT NOT NULL DEFAULT '[]',
            cc_json TEXT NOT NULL DEFAULT '[]',
            signature_ref TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            provider_message_id TEXT,
            error_message TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            sent_at TEXT,
            delivered_at TEXT,
            opened_at TEXT,
            clicked_at TEXT,
            bounced_at TEXT,
            dropped_at TEXT,
            unsubscribed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_email_jobs_status ON email_jobs(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_email_jobs_message_id \
         ON email_jobs(provider_message_id)",
    )
    .execute(pool)
    .await?;

    info!("Migrations complete");
    Ok(())
}
