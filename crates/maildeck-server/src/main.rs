mod api;
mod auth;

use std::sync::Arc;
use std::{env, net::SocketAddr};

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use maildeck_core::ai::{AiClient, GenaiAiClient};
use maildeck_core::config::{Config, GoogleConfig};
use maildeck_core::connector::GmailConnector;
use maildeck_core::db::Database;
use maildeck_core::mailboxes::MailboxRepository;
use maildeck_core::messages::MessageRepository;
use maildeck_core::moves::MoveCoordinator;
use maildeck_core::search::SearchService;
use maildeck_core::secrets::SecretBox;
use maildeck_core::semantic::SemanticSearchService;
use maildeck_core::sync::enrichment::run_enrichment_worker;
use maildeck_core::sync::{EnrichmentWorker, SyncEngine, run_snooze_scheduler, run_sync_engine};
use maildeck_core::{columns::ColumnRepository, migrations, telemetry};

use crate::auth::TokenVerifier;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub secrets: Arc<SecretBox>,
    pub google: GoogleConfig,
    pub connector: GmailConnector,
    pub engine: Arc<SyncEngine>,
    pub ai: Arc<dyn AiClient>,
    pub enrichment: Arc<EnrichmentWorker>,
    pub mover: MoveCoordinator,
    pub search: SearchService,
    pub semantic: SemanticSearchService,
    pub verifier: Arc<TokenVerifier>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = telemetry::init_telemetry(&config.app, &config.telemetry)?;

    let db = Database::open(&config.paths.database).await?;
    migrations::run_migrations(&db).await?;

    let secrets = Arc::new(SecretBox::from_hex_key(&config.crypto.encryption_key)?);
    let ai: Arc<dyn AiClient> = Arc::new(GenaiAiClient::new(config.ai.clone()));

    let mailboxes = MailboxRepository::new(db.clone(), secrets.clone());
    let messages = MessageRepository::new(db.clone());
    let columns = ColumnRepository::new(db.clone());

    let connector = GmailConnector::new(
        reqwest::Client::new(),
        config.google.clone(),
        mailboxes.clone(),
    );
    let engine = Arc::new(SyncEngine::new(
        mailboxes.clone(),
        messages.clone(),
        connector.clone(),
        config.sync.clone(),
    ));
    let enrichment = Arc::new(EnrichmentWorker::new(
        mailboxes.clone(),
        messages.clone(),
        ai.clone(),
        config.sync.enrichment_batch_size,
    ));

    let shutdown = CancellationToken::new();
    let engine_handle = tokio::spawn(run_sync_engine(engine.clone(), shutdown.child_token()));
    let snooze_handle = tokio::spawn(run_snooze_scheduler(
        messages.clone(),
        config.sync.snooze_interval_secs,
        shutdown.child_token(),
    ));
    let enrichment_handle = tokio::spawn(run_enrichment_worker(
        enrichment.clone(),
        config.sync.enrichment_interval_secs,
        shutdown.child_token(),
    ));

    let state = AppState {
        db: db.clone(),
        secrets,
        google: config.google.clone(),
        connector: connector.clone(),
        engine,
        ai: ai.clone(),
        enrichment,
        mover: MoveCoordinator::new(mailboxes, messages.clone(), columns, connector),
        search: SearchService::new(messages.clone()),
        semantic: SemanticSearchService::new(messages, ai),
        verifier: Arc::new(TokenVerifier::new(
            &config.auth.access_secret,
            config.auth.audience.clone(),
            config.auth.issuer.clone(),
        )),
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Maildeck listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    for (name, handle) in [
        ("sync engine", engine_handle),
        ("snooze scheduler", snooze_handle),
        ("enrichment worker", enrichment_handle),
    ] {
        if let Err(err) = handle.await {
            warn!("{name} join error: {err}");
        }
    }
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", api::router())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    database: String,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_status = match state.db.ping().await {
        Ok(_) => "ok",
        Err(_) => "unhealthy",
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if db_status == "ok" {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: db_status.to_string(),
        }),
    )
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, shutting down");
        }
        _ = terminate => {
            warn!("received terminate signal, shutting down");
        }
    }

    shutdown.cancel();
}
