use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actor_directory::ActorDirectory;
use actor_directory::InMemoryActorDirectory;
use approval_policy::ApprovalsService;
use approval_policy::InMemoryApprovalsService;
use fee_matrix::FeeResolver;
use fee_matrix::InMemoryFeeMatrixStore;
use idempotency_chain::InMemoryIdempotencyStore;
use ledger_core::InMemoryEventOutbox;
use ledger_core::InMemoryPostingEngine;
use ledger_core::PostingEngine;
use posting_api::AppState;
use posting_api::FloatAdjustmentHandler;
use posting_api::PostingConfig;
use posting_api::bootstrap_house_accounts;
use posting_api::router;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Reference deployment of the posting surface over the in-memory
/// engines: wires §10's `PostingConfig`, provisions house accounts for
/// a starter currency set, and starts the approval sweeper alongside
/// the HTTP listener. A persistent-store deployment swaps the
/// `InMemory*` constructors below for its own backends without
/// touching `posting_api::router`.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = PostingConfig::from_env();
    tracing::info!(
        retry_limit = config.retry_limit,
        idempotency_ttl_hours = config.idempotency_ttl_hours,
        approval_sweeper_interval_seconds = config.approval_sweeper_interval_seconds,
        "posting-api starting"
    );

    let directory_impl = InMemoryActorDirectory::new();
    let house_accounts = Arc::new(bootstrap_house_accounts(&directory_impl, &["BBD", "USD", "XOF"]).await);
    let directory: Arc<dyn ActorDirectory> = Arc::new(directory_impl);

    let fee_store = Arc::new(InMemoryFeeMatrixStore::new());
    let fees = Arc::new(FeeResolver::new(fee_store));
    let idempotency = Arc::new(InMemoryIdempotencyStore::new());
    let outbox = Arc::new(InMemoryEventOutbox::new());
    let idempotency_ttl = Duration::from_secs(config.idempotency_ttl_hours.max(0) as u64 * 3600);
    let engine: Arc<dyn PostingEngine> = Arc::new(InMemoryPostingEngine::new(
        directory.clone(),
        idempotency,
        fees,
        outbox,
        config.retry_limit,
        idempotency_ttl,
    ));

    let approvals: Arc<dyn ApprovalsService> = Arc::new(InMemoryApprovalsService::new());
    let float_handler = Arc::new(FloatAdjustmentHandler::new(
        engine.clone(),
        directory.clone(),
        house_accounts.clone(),
    ));
    approvals
        .register_handler("FLOAT_TOP_UP".to_string(), float_handler.clone())
        .await;
    approvals
        .register_handler("FLOAT_WITHDRAWAL".to_string(), float_handler)
        .await;

    let state = AppState {
        engine,
        directory,
        approvals: approvals.clone(),
        house_accounts,
        staff_roles: Arc::new(RwLock::new(HashMap::new())),
    };

    let sweep_interval = Duration::from_secs(config.approval_sweeper_interval_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = approvals.sweep_expired(chrono::Utc::now()).await {
                tracing::warn!(error = %err, "approval sweep failed");
            }
        }
    });

    let addr = std::env::var("POSTING_API_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, error = %err, "failed to bind posting-api listener");
            return;
        }
    };
    tracing::info!(%addr, "posting-api listening");
    if let Err(err) = axum::serve(listener, router(state)).await {
        tracing::error!(error = %err, "posting-api server loop exited");
    }
}
