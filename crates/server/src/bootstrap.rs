use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use reqflow_core::config::{AppConfig, ConfigError, LoadOptions};
use reqflow_db::repositories::{
    NotificationLedger, SqlNotificationLedger, SqlOrgDirectory, SqlRequisitionRepository,
};
use reqflow_db::{connect_with_settings, migrations, DbPool};
use reqflow_notify::{
    DeliveryChannel, DispatchEngine, HttpRelayTransport, MailTransport, RecipientResolver,
    RetrySweeper, TemplateRenderer, TransportError,
};

use crate::workflow::RequisitionService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<RequisitionService>,
    pub ledger: Arc<dyn NotificationLedger>,
    pub sweeper: Arc<RetrySweeper>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("mail transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let primary: Arc<dyn MailTransport> = Arc::new(HttpRelayTransport::primary(&config.mail)?);
    let fallback: Option<Arc<dyn MailTransport>> = HttpRelayTransport::fallback(&config.mail)?
        .map(|transport| Arc::new(transport) as Arc<dyn MailTransport>);
    let channel = Arc::new(DeliveryChannel::new(
        primary,
        fallback,
        Duration::from_secs(config.mail.send_timeout_secs),
    ));

    let directory = Arc::new(SqlOrgDirectory::new(db_pool.clone()));
    let ledger: Arc<dyn NotificationLedger> =
        Arc::new(SqlNotificationLedger::new(db_pool.clone()));

    let engine = Arc::new(DispatchEngine::new(
        RecipientResolver::new(directory.clone()),
        TemplateRenderer::new(),
        channel.clone(),
        ledger.clone(),
    ));

    let service = Arc::new(RequisitionService::new(
        Arc::new(SqlRequisitionRepository::new(db_pool.clone())),
        directory,
        engine,
    ));

    let sweeper = Arc::new(RetrySweeper::new(channel, ledger.clone(), config.notify.max_retries));

    Ok(Application { config, db_pool, service, ledger, sweeper })
}

#[cfg(test)]
mod tests {
    use reqflow_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_stack() {
        let app = bootstrap(overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('requisition', 'requisition_line', \
                                               'org_employee', 'org_manager', \
                                               'notification_ledger')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected foundation tables after bootstrap");
        assert_eq!(table_count, 5, "bootstrap should expose the baseline tables");

        assert_eq!(app.sweeper.default_max_retries(), app.config.notify.max_retries);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_database_url() {
        let result = bootstrap(overrides("postgres://not-sqlite")).await;

        let message = result.err().expect("validation error").to_string();
        assert!(message.contains("database.url"));
    }
}
