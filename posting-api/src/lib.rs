#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::Arc;

use actor_directory::ActorDirectory;
use actor_directory::ActorType;
use actor_directory::DirectoryError;
use actor_directory::InMemoryActorDirectory;
use actor_directory::provision_house_account;
use approval_policy::ApprovalError;
use approval_policy::ApprovalHandler;
use approval_policy::ApprovalRequest;
use approval_policy::ApprovalResult;
use approval_policy::ApprovalsService;
use approval_policy::DecisionInput;
use approval_policy::DecisionKind;
use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use chrono::Utc;
use ledger_core::EntryInput;
use ledger_core::FeeContext;
use ledger_core::LedgerJournal;
use ledger_core::LedgerLine;
use ledger_core::PostCommand;
use ledger_core::PostingEngine;
use ledger_core::PostingError;
use money::PostingSide;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::Instrument;
use tracing::info_span;
use uuid::Uuid;

pub type ApiResult<T> = Result<T, ApiError>;

/// Runtime configuration read once at boot, mirroring the
/// `*_from_env()` convention used elsewhere in the workspace: typed
/// defaults, a warning on a malformed override rather than a panic.
#[derive(Debug, Clone)]
pub struct PostingConfig {
    pub db_url: String,
    pub events_queue_url: String,
    pub pin_pepper: String,
    pub retry_limit: usize,
    pub idempotency_ttl_hours: i64,
    pub approval_sweeper_interval_seconds: u64,
}

impl PostingConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            db_url: env_string("POSTING_DB_URL", ""),
            events_queue_url: env_string("EVENTS_QUEUE_URL", ""),
            pin_pepper: env_string("PIN_PEPPER", ""),
            retry_limit: env_parse("RETRY_LIMIT", 5),
            idempotency_ttl_hours: env_parse("IDEMPOTENCY_TTL_HOURS", 24),
            approval_sweeper_interval_seconds: env_parse("APPROVAL_SWEEPER_INTERVAL_SECONDS", 60),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Clone,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, "failed to parse environment override, using default");
            default.clone()
        }),
        Err(_) => default,
    }
}

/// The §7 error taxonomy, collapsed into a single type every service
/// trait's error bubbles up to at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiErrorKind {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not authorized: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    #[error("retry limit exhausted, try again")]
    Retryable,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug)]
pub struct ApiError(pub ApiErrorKind);

impl ApiError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self(ApiErrorKind::Validation(message.into()))
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self(ApiErrorKind::Auth(message.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            ApiErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
            ApiErrorKind::Auth(_) => StatusCode::FORBIDDEN,
            ApiErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ApiErrorKind::Conflict(_) => StatusCode::CONFLICT,
            ApiErrorKind::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorKind::Retryable => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!(error = %self.0, %status, "request failed");
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<PostingError> for ApiError {
    fn from(value: PostingError) -> Self {
        let kind = match value {
            PostingError::Validation(msg) => ApiErrorKind::Validation(msg),
            PostingError::NotFound(msg) => ApiErrorKind::NotFound(msg),
            PostingError::Conflict(msg) => ApiErrorKind::Conflict(msg),
            PostingError::Unbalanced {
                debit_minor,
                credit_minor,
            } => ApiErrorKind::Unprocessable(format!(
                "unbalanced journal: debit {debit_minor} credit {credit_minor}"
            )),
            PostingError::InsufficientFunds {
                account_id,
                available_minor,
            } => ApiErrorKind::Unprocessable(format!(
                "insufficient funds on {account_id}: available would be {available_minor}"
            )),
            PostingError::AccountFrozen(msg) => {
                ApiErrorKind::Unprocessable(format!("account owner is frozen: {msg}"))
            }
            PostingError::PeriodClosed(msg) => {
                ApiErrorKind::Unprocessable(format!("accounting period is closed: {msg}"))
            }
            PostingError::ConcurrencyRetryExhausted => ApiErrorKind::Retryable,
            PostingError::Internal(msg) => ApiErrorKind::Internal(msg),
        };
        ApiError(kind)
    }
}

impl From<DirectoryError> for ApiError {
    fn from(value: DirectoryError) -> Self {
        let kind = match value {
            DirectoryError::Validation(msg) => ApiErrorKind::Validation(msg),
            DirectoryError::Conflict(msg) => ApiErrorKind::Conflict(msg),
            DirectoryError::NotFound(msg) => ApiErrorKind::NotFound(msg),
        };
        ApiError(kind)
    }
}

impl From<ApprovalError> for ApiError {
    fn from(value: ApprovalError) -> Self {
        let kind = match value {
            ApprovalError::Validation(msg) => ApiErrorKind::Validation(msg),
            ApprovalError::NotFound(msg) => ApiErrorKind::NotFound(msg),
            ApprovalError::Conflict(msg) => ApiErrorKind::Conflict(msg),
            ApprovalError::Auth(msg) => ApiErrorKind::Auth(msg),
            ApprovalError::Finalized => {
                ApiErrorKind::Conflict("request is already in a terminal state".into())
            }
            ApprovalError::NoPolicy(request_type) => ApiErrorKind::Unprocessable(format!(
                "no approval policy configured for {request_type}"
            )),
        };
        ApiError(kind)
    }
}

/// House-owned accounts provisioned once per currency at boot (fee
/// revenue and the bank mirror used to fund/drain agent float).
#[derive(Debug, Clone)]
pub struct HouseAccounts {
    pub fee_revenue_account_id: String,
    pub bank_mirror_account_id: String,
}

pub async fn bootstrap_house_accounts(
    directory: &InMemoryActorDirectory,
    currencies: &[&str],
) -> HashMap<String, HouseAccounts> {
    let mut map = HashMap::new();
    for &currency in currencies {
        let fee_revenue = provision_house_account(
            directory,
            actor_directory::AccountType::Fee,
            currency,
            "house-fee-revenue",
        )
        .await;
        let bank_mirror = provision_house_account(
            directory,
            actor_directory::AccountType::BankMirror,
            currency,
            "house-bank-mirror",
        )
        .await;
        map.insert(
            currency.to_string(),
            HouseAccounts {
                fee_revenue_account_id: fee_revenue.id,
                bank_mirror_account_id: bank_mirror.id,
            },
        );
    }
    map
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn PostingEngine>,
    pub directory: Arc<dyn ActorDirectory>,
    pub approvals: Arc<dyn ApprovalsService>,
    pub house_accounts: Arc<HashMap<String, HouseAccounts>>,
    /// The posting API owns this small staff->role lookup itself:
    /// `actor-directory`'s `Actor` has no role field (roles are a
    /// maker-checker concept, not an actor-directory one), and staff
    /// authentication/roster management is an external collaborator
    /// per spec scope, so this is the minimal seam that lets
    /// `/approvals/:id/approve` resolve a `decider_role` at all.
    pub staff_roles: Arc<RwLock<HashMap<String, String>>>,
}

impl AppState {
    pub async fn register_staff_role(&self, staff_id: impl Into<String>, role: impl Into<String>) {
        self.staff_roles.write().await.insert(staff_id.into(), role.into());
    }

    async fn staff_role(&self, staff_id: &str) -> ApiResult<String> {
        self.staff_roles
            .read()
            .await
            .get(staff_id)
            .cloned()
            .ok_or_else(|| ApiError::auth(format!("unknown staff id {staff_id}")))
    }

    fn house_accounts_for(&self, currency: &str) -> ApiResult<HouseAccounts> {
        self.house_accounts
            .get(currency)
            .cloned()
            .ok_or_else(|| ApiError::validation(format!("no house accounts provisioned for {currency}")))
    }
}

fn parse_actor_type(raw: &str) -> ApiResult<ActorType> {
    match raw.to_ascii_uppercase().as_str() {
        "CUSTOMER" => Ok(ActorType::Customer),
        "AGENT" => Ok(ActorType::Agent),
        "MERCHANT" => Ok(ActorType::Merchant),
        "STAFF" => Ok(ActorType::Staff),
        "SYSTEM" => Ok(ActorType::System),
        other => Err(ApiError::validation(format!("unknown owner_type {other}"))),
    }
}

fn new_correlation_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------
// Customer/store transfers (§6: /tx/p2p, /tx/b2b, /tx/merchant-payment)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct P2pRequest {
    pub sender_msisdn: String,
    pub receiver_msisdn: String,
    pub amount: String,
    pub currency: String,
    pub idempotency_key: String,
    /// Not in the distilled §6 table; an optional extension so the fee
    /// splice in §4.5 is actually reachable from the HTTP surface
    /// without the API inventing a fixed fee-per-txn-type policy.
    pub fee_version_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct B2bRequest {
    pub sender_store_code: String,
    pub receiver_store_code: String,
    pub amount: String,
    pub currency: String,
    pub idempotency_key: String,
    pub fee_version_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MerchantPaymentRequest {
    pub customer_msisdn: String,
    pub store_code: String,
    pub amount: String,
    pub currency: String,
    pub idempotency_key: String,
    pub fee_version_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostingResponse {
    pub posting_id: String,
    pub state: String,
    pub correlation_id: String,
}

#[allow(clippy::too_many_arguments)]
async fn post_transfer(
    state: &AppState,
    txn_type: &str,
    sender_actor_id: String,
    sender_actor_type: ActorType,
    sender_account_id: String,
    receiver_account_id: String,
    amount: &str,
    currency: String,
    idempotency_key: String,
    fee_version_id: Option<String>,
) -> ApiResult<PostingResponse> {
    let amount_minor = money::parse_minor(amount).map_err(|err| ApiError::validation(err.to_string()))?;
    let correlation_id = new_correlation_id();

    let fee_context = match &fee_version_id {
        Some(_) => Some(FeeContext {
            agent_type: None,
            amount_minor,
            fee_payer_account_id: Some(sender_account_id.clone()),
            fee_revenue_account_id: Some(state.house_accounts_for(&currency)?.fee_revenue_account_id),
            commission_funding_account_id: None,
            commission_payee_account_id: None,
        }),
        None => None,
    };

    let cmd = PostCommand {
        idempotency_key,
        correlation_id: correlation_id.clone(),
        txn_type: txn_type.to_string(),
        currency,
        entries: vec![
            EntryInput {
                account_id: sender_account_id,
                side: PostingSide::Debit,
                amount_minor,
                description: format!("{txn_type} debit"),
            },
            EntryInput {
                account_id: receiver_account_id,
                side: PostingSide::Credit,
                amount_minor,
                description: format!("{txn_type} credit"),
            },
        ],
        description: format!("{txn_type} transfer"),
        actor_type: sender_actor_type,
        actor_id: sender_actor_id,
        fee_version_id,
        commission_version_id: None,
        fee_context,
        effective_date: None,
        reversal_of: None,
    };

    let span = info_span!("post_transfer", txn_type, correlation_id = %correlation_id);
    let receipt = state.engine.post(cmd).instrument(span).await?;
    Ok(PostingResponse {
        posting_id: receipt.journal_id,
        state: format!("{:?}", receipt.state).to_uppercase(),
        correlation_id: receipt.correlation_id,
    })
}

async fn p2p_handler(
    State(state): State<AppState>,
    Json(req): Json<P2pRequest>,
) -> ApiResult<(StatusCode, Json<PostingResponse>)> {
    let sender = state
        .directory
        .resolve_by_msisdn(ActorType::Customer, &req.sender_msisdn)
        .await?;
    let receiver = state
        .directory
        .resolve_by_msisdn(ActorType::Customer, &req.receiver_msisdn)
        .await?;
    let sender_account = state.directory.wallet_account(&sender.id, &req.currency).await?;
    let receiver_account = state.directory.wallet_account(&receiver.id, &req.currency).await?;
    let response = post_transfer(
        &state,
        "P2P",
        sender.id,
        ActorType::Customer,
        sender_account.id,
        receiver_account.id,
        &req.amount,
        req.currency,
        req.idempotency_key,
        req.fee_version_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn b2b_handler(
    State(state): State<AppState>,
    Json(req): Json<B2bRequest>,
) -> ApiResult<(StatusCode, Json<PostingResponse>)> {
    let sender = state.directory.resolve_by_code(&req.sender_store_code).await?;
    let receiver = state.directory.resolve_by_code(&req.receiver_store_code).await?;
    let sender_account = state.directory.wallet_account(&sender.id, &req.currency).await?;
    let receiver_account = state.directory.wallet_account(&receiver.id, &req.currency).await?;
    let sender_actor_type = sender.actor_type;
    let response = post_transfer(
        &state,
        "B2B",
        sender.id,
        sender_actor_type,
        sender_account.id,
        receiver_account.id,
        &req.amount,
        req.currency,
        req.idempotency_key,
        req.fee_version_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn merchant_payment_handler(
    State(state): State<AppState>,
    Json(req): Json<MerchantPaymentRequest>,
) -> ApiResult<(StatusCode, Json<PostingResponse>)> {
    let customer = state
        .directory
        .resolve_by_msisdn(ActorType::Customer, &req.customer_msisdn)
        .await?;
    let store = state.directory.resolve_by_code(&req.store_code).await?;
    let customer_account = state.directory.wallet_account(&customer.id, &req.currency).await?;
    let store_account = state.directory.wallet_account(&store.id, &req.currency).await?;
    let response = post_transfer(
        &state,
        "MERCHANT_PAYMENT",
        customer.id,
        ActorType::Customer,
        customer_account.id,
        store_account.id,
        &req.amount,
        req.currency,
        req.idempotency_key,
        req.fee_version_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

// ---------------------------------------------------------------------
// Float adjustments (§6: /float/top-up, /float/withdrawal) — approval-
// gated when a matching policy exists, posted directly otherwise.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FloatDirection {
    TopUp,
    Withdrawal,
}

impl FloatDirection {
    fn txn_type(self) -> &'static str {
        match self {
            FloatDirection::TopUp => "FLOAT_TOP_UP",
            FloatDirection::Withdrawal => "FLOAT_WITHDRAWAL",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FloatAdjustmentRequest {
    pub agent_code: String,
    pub amount: String,
    pub currency: String,
    pub staff_id: String,
    pub reason: Option<String>,
    pub reference: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FloatAdjustmentPayload {
    agent_code: String,
    amount_minor: i64,
    currency: String,
    staff_id: String,
    reason: Option<String>,
    reference: Option<String>,
    idempotency_key: String,
    direction: FloatDirection,
    correlation_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome")]
pub enum FloatAdjustmentResponse {
    #[serde(rename = "POSTED")]
    Posted {
        posting_id: String,
        state: String,
        correlation_id: String,
        balance_before_minor: i64,
        balance_after_minor: i64,
    },
    #[serde(rename = "APPROVAL_REQUIRED")]
    ApprovalRequired { request_id: String, state: String },
}

fn build_float_post_command(
    payload: &FloatAdjustmentPayload,
    idempotency_key: String,
    agent_account_id: String,
    house_bank_mirror_account_id: String,
) -> PostCommand {
    let (debit_account, credit_account) = match payload.direction {
        FloatDirection::TopUp => (agent_account_id, house_bank_mirror_account_id),
        FloatDirection::Withdrawal => (house_bank_mirror_account_id, agent_account_id),
    };
    PostCommand {
        idempotency_key,
        correlation_id: payload.correlation_id.clone(),
        txn_type: payload.direction.txn_type().to_string(),
        currency: payload.currency.clone(),
        entries: vec![
            EntryInput {
                account_id: debit_account,
                side: PostingSide::Debit,
                amount_minor: payload.amount_minor,
                description: "float adjustment debit".into(),
            },
            EntryInput {
                account_id: credit_account,
                side: PostingSide::Credit,
                amount_minor: payload.amount_minor,
                description: "float adjustment credit".into(),
            },
        ],
        description: payload
            .reason
            .clone()
            .unwrap_or_else(|| "agent float adjustment".into()),
        actor_type: ActorType::Staff,
        actor_id: payload.staff_id.clone(),
        fee_version_id: None,
        commission_version_id: None,
        fee_context: None,
        effective_date: None,
        reversal_of: None,
    }
}

/// Registered under `FLOAT_TOP_UP`/`FLOAT_WITHDRAWAL` so a request that
/// clears its approval stages posts the journal without the approvals
/// crate needing a compile-time dependency back onto `ledger-core`.
pub struct FloatAdjustmentHandler {
    engine: Arc<dyn PostingEngine>,
    directory: Arc<dyn ActorDirectory>,
    house_accounts: Arc<HashMap<String, HouseAccounts>>,
}

impl FloatAdjustmentHandler {
    #[must_use]
    pub fn new(
        engine: Arc<dyn PostingEngine>,
        directory: Arc<dyn ActorDirectory>,
        house_accounts: Arc<HashMap<String, HouseAccounts>>,
    ) -> Self {
        Self {
            engine,
            directory,
            house_accounts,
        }
    }
}

#[async_trait]
impl ApprovalHandler for FloatAdjustmentHandler {
    async fn handle(&self, request: &ApprovalRequest) -> ApprovalResult<()> {
        let payload: FloatAdjustmentPayload = serde_json::from_value(request.payload.clone())
            .map_err(|err| ApprovalError::Validation(format!("corrupt float adjustment payload: {err}")))?;
        let agent = self
            .directory
            .resolve_by_code(&payload.agent_code)
            .await
            .map_err(|err| ApprovalError::Validation(err.to_string()))?;
        let agent_account = self
            .directory
            .float_account(&agent.id, &payload.currency)
            .await
            .map_err(|err| ApprovalError::Validation(err.to_string()))?;
        let house = self.house_accounts.get(&payload.currency).ok_or_else(|| {
            ApprovalError::Validation(format!("no house accounts provisioned for {}", payload.currency))
        })?;
        // The request id is the idempotency key: a retried sweep or a
        // replayed `APPROVAL_DECIDED` event must not post this twice.
        let cmd = build_float_post_command(
            &payload,
            request.id.clone(),
            agent_account.id,
            house.bank_mirror_account_id.clone(),
        );
        self.engine
            .post(cmd)
            .await
            .map_err(|err| ApprovalError::Validation(err.to_string()))?;
        Ok(())
    }
}

async fn float_adjustment_handler(
    state: AppState,
    req: FloatAdjustmentRequest,
    direction: FloatDirection,
) -> ApiResult<(StatusCode, Json<FloatAdjustmentResponse>)> {
    let amount_minor = money::parse_minor(&req.amount).map_err(|err| ApiError::validation(err.to_string()))?;
    let agent = state.directory.resolve_by_code(&req.agent_code).await?;
    let agent_account = state.directory.float_account(&agent.id, &req.currency).await?;
    let balance_before = state
        .engine
        .get_balance(&agent_account.id)
        .await
        .map(|balance| balance.actual_minor)
        .unwrap_or(0);

    let correlation_id = new_correlation_id();
    let payload = FloatAdjustmentPayload {
        agent_code: req.agent_code.clone(),
        amount_minor,
        currency: req.currency.clone(),
        staff_id: req.staff_id.clone(),
        reason: req.reason.clone(),
        reference: req.reference.clone(),
        idempotency_key: req.idempotency_key.clone(),
        direction,
        correlation_id: correlation_id.clone(),
    };
    let payload_json =
        serde_json::to_value(&payload).map_err(|err| ApiError(ApiErrorKind::Internal(err.to_string())))?;

    let span = info_span!("float_adjustment", txn_type = direction.txn_type(), correlation_id = %correlation_id);
    let submission = state
        .approvals
        .submit(
            direction.txn_type().to_string(),
            payload_json,
            req.staff_id.clone(),
            Utc::now(),
        )
        .instrument(span)
        .await;

    match submission {
        Ok(request) => Ok((
            StatusCode::ACCEPTED,
            Json(FloatAdjustmentResponse::ApprovalRequired {
                request_id: request.id,
                state: format!("{:?}", request.state).to_uppercase(),
            }),
        )),
        Err(ApprovalError::NoPolicy(_)) => {
            let house = state.house_accounts_for(&req.currency)?;
            let cmd = build_float_post_command(
                &payload,
                req.idempotency_key.clone(),
                agent_account.id.clone(),
                house.bank_mirror_account_id,
            );
            let receipt = state.engine.post(cmd).await?;
            let balance_after = state.engine.get_balance(&agent_account.id).await?.actual_minor;
            Ok((
                StatusCode::CREATED,
                Json(FloatAdjustmentResponse::Posted {
                    posting_id: receipt.journal_id,
                    state: format!("{:?}", receipt.state).to_uppercase(),
                    correlation_id: receipt.correlation_id,
                    balance_before_minor: balance_before,
                    balance_after_minor: balance_after,
                }),
            ))
        }
        Err(other) => Err(ApiError::from(other)),
    }
}

async fn float_top_up_handler(
    State(state): State<AppState>,
    Json(req): Json<FloatAdjustmentRequest>,
) -> ApiResult<(StatusCode, Json<FloatAdjustmentResponse>)> {
    float_adjustment_handler(state, req, FloatDirection::TopUp).await
}

async fn float_withdrawal_handler(
    State(state): State<AppState>,
    Json(req): Json<FloatAdjustmentRequest>,
) -> ApiResult<(StatusCode, Json<FloatAdjustmentResponse>)> {
    float_adjustment_handler(state, req, FloatDirection::Withdrawal).await
}

// ---------------------------------------------------------------------
// Read endpoints (§6: /balance, /ops/ledger/journal/:id, /ops/ledger/verify)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub owner_type: String,
    pub owner_id: String,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub actual: i64,
    pub available: i64,
    pub hold: i64,
    pub pending_credits: i64,
}

async fn balance_handler(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
) -> ApiResult<Json<BalanceResponse>> {
    parse_actor_type(&query.owner_type)?;
    let account = state.directory.wallet_account(&query.owner_id, &query.currency).await?;
    let balance = state.engine.get_balance(&account.id).await?;
    Ok(Json(BalanceResponse {
        actual: balance.actual_minor,
        available: balance.available_minor,
        hold: balance.hold_minor,
        pending_credits: balance.pending_credits_minor,
    }))
}

#[derive(Debug, Serialize)]
pub struct JournalResponse {
    pub journal: LedgerJournal,
    pub lines: Vec<LedgerLine>,
}

async fn journal_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<JournalResponse>> {
    let (journal, lines) = state.engine.get_journal(&id).await?;
    Ok(Json(JournalResponse { journal, lines }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub currency: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub ok: bool,
    pub checked_from: Option<String>,
    pub checked_to: Option<String>,
    pub errors: Vec<String>,
}

/// `from`/`to` are accepted and echoed back per §6's query shape but
/// are not used to bound the walk: the in-memory chain has no date
/// index, so every journal currently chained for `currency` is
/// verified. A persistent-store implementation with a date-indexed
/// journal table would apply the range before recomputing hashes.
async fn verify_handler(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> ApiResult<Json<VerifyResponse>> {
    let verification = state.engine.verify_chain(&query.currency).await?;
    Ok(Json(VerifyResponse {
        ok: verification.ok,
        checked_from: query.from,
        checked_to: query.to,
        errors: verification.errors,
    }))
}

// ---------------------------------------------------------------------
// Approval decisions (§6: /approvals/:id/approve, /approvals/:id/reject)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub staff_id: String,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub staff_id: String,
    pub reason: String,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub request_id: String,
    pub state: String,
}

async fn approve_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<Json<DecisionResponse>> {
    let role = state.staff_role(&req.staff_id).await?;
    let span = info_span!(
        "approvals_decide",
        request_id = %id,
        correlation_id = req.correlation_id.as_deref().unwrap_or_default(),
    );
    let request = state
        .approvals
        .decide(
            &id,
            DecisionInput {
                decider_id: req.staff_id,
                decider_role: role,
                decision: DecisionKind::Approve,
                reason: None,
            },
            Utc::now(),
        )
        .instrument(span)
        .await?;
    Ok(Json(DecisionResponse {
        request_id: request.id,
        state: format!("{:?}", request.state).to_uppercase(),
    }))
}

async fn reject_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<DecisionResponse>> {
    let role = state.staff_role(&req.staff_id).await?;
    let span = info_span!(
        "approvals_decide",
        request_id = %id,
        correlation_id = req.correlation_id.as_deref().unwrap_or_default(),
    );
    let request = state
        .approvals
        .decide(
            &id,
            DecisionInput {
                decider_id: req.staff_id,
                decider_role: role,
                decision: DecisionKind::Reject,
                reason: Some(req.reason),
            },
            Utc::now(),
        )
        .instrument(span)
        .await?;
    Ok(Json(DecisionResponse {
        request_id: request.id,
        state: format!("{:?}", request.state).to_uppercase(),
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tx/p2p", post(p2p_handler))
        .route("/tx/b2b", post(b2b_handler))
        .route("/tx/merchant-payment", post(merchant_payment_handler))
        .route("/float/top-up", post(float_top_up_handler))
        .route("/float/withdrawal", post(float_withdrawal_handler))
        .route("/balance", get(balance_handler))
        .route("/ops/ledger/journal/{id}", get(journal_handler))
        .route("/ops/ledger/verify", get(verify_handler))
        .route("/approvals/{id}/approve", post(approve_handler))
        .route("/approvals/{id}/reject", post(reject_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actor_directory::InMemoryActorDirectory;
    use actor_directory::RegisterActorRequest;
    use approval_policy::ApprovalPolicy;
    use approval_policy::InMemoryApprovalsService;
    use approval_policy::PolicyCondition;
    use approval_policy::PolicyState;
    use approval_policy::PolicyStage;
    use fee_matrix::FeeResolver;
    use fee_matrix::InMemoryFeeMatrixStore;
    use ledger_core::InMemoryEventOutbox;
    use ledger_core::InMemoryPostingEngine;
    use idempotency_chain::InMemoryIdempotencyStore;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn harness() -> (AppState, Arc<InMemoryActorDirectory>, String, String) {
        let directory_impl = InMemoryActorDirectory::new();
        let house_accounts = bootstrap_house_accounts(&directory_impl, &["BBD"]).await;
        let directory = Arc::new(directory_impl);
        let directory_trait: Arc<dyn ActorDirectory> = directory.clone();

        let alice = directory_trait
            .register_actor(RegisterActorRequest {
                actor_type: ActorType::Customer,
                msisdn: Some("2461234567".into()),
                code: None,
                parent_actor_id: None,
                currency: "BBD".into(),
            })
            .await
            .expect("register alice");
        let bob = directory_trait
            .register_actor(RegisterActorRequest {
                actor_type: ActorType::Customer,
                msisdn: Some("2467654321".into()),
                code: None,
                parent_actor_id: None,
                currency: "BBD".into(),
            })
            .await
            .expect("register bob");
        let alice_account = directory_trait
            .wallet_account(&alice.id, "BBD")
            .await
            .expect("alice account");
        directory_trait
            .wallet_account(&bob.id, "BBD")
            .await
            .expect("bob account");

        let bank_mirror_account_id = house_accounts
            .get("BBD")
            .expect("house accounts provisioned")
            .bank_mirror_account_id
            .clone();

        let fee_store = Arc::new(InMemoryFeeMatrixStore::new());
        let fees = Arc::new(FeeResolver::new(fee_store));
        let idempotency = Arc::new(InMemoryIdempotencyStore::new());
        let outbox = Arc::new(InMemoryEventOutbox::new());
        let engine: Arc<dyn PostingEngine> = Arc::new(InMemoryPostingEngine::new(
            directory_trait.clone(),
            idempotency,
            fees,
            outbox,
            5,
            Duration::from_secs(86_400),
        ));
        // Fund alice so transfer tests have something to debit. Money
        // enters through BANK_MIRROR (asset, debit-normal); alice's
        // WALLET (liability, credit-normal) is credited in step.
        engine
            .post(PostCommand {
                idempotency_key: "seed-alice".into(),
                correlation_id: "seed-alice".into(),
                txn_type: "FUNDING".into(),
                currency: "BBD".into(),
                entries: vec![
                    EntryInput {
                        account_id: bank_mirror_account_id,
                        side: PostingSide::Debit,
                        amount_minor: 10_000,
                        description: "seed".into(),
                    },
                    EntryInput {
                        account_id: alice_account.id.clone(),
                        side: PostingSide::Credit,
                        amount_minor: 10_000,
                        description: "seed".into(),
                    },
                ],
                description: "seed funding".into(),
                actor_type: ActorType::System,
                actor_id: "house-bank-mirror".into(),
                fee_version_id: None,
                commission_version_id: None,
                fee_context: None,
                effective_date: None,
                reversal_of: None,
            })
            .await
            .expect("seed posting");

        let approvals: Arc<dyn ApprovalsService> = Arc::new(InMemoryApprovalsService::new());
        let house_accounts = Arc::new(house_accounts);
        approvals
            .register_handler(
                "FLOAT_TOP_UP".into(),
                Arc::new(FloatAdjustmentHandler::new(
                    engine.clone(),
                    directory_trait.clone(),
                    house_accounts.clone(),
                )),
            )
            .await;

        let state = AppState {
            engine,
            directory: directory_trait,
            approvals,
            house_accounts,
            staff_roles: Arc::new(RwLock::new(HashMap::new())),
        };
        (state, directory, alice.id, bob.id)
    }

    #[tokio::test]
    async fn p2p_handler_moves_funds() {
        let (state, _directory, _alice_id, _bob_id) = harness().await;

        let response = p2p_handler(
            State(state.clone()),
            Json(P2pRequest {
                sender_msisdn: "2461234567".into(),
                receiver_msisdn: "2467654321".into(),
                amount: "25.00".into(),
                currency: "BBD".into(),
                idempotency_key: "p2p-1".into(),
                fee_version_id: None,
            }),
        )
        .await
        .expect("p2p should succeed");

        assert_eq!(response.0, StatusCode::CREATED);
        assert_eq!(response.1.state, "POSTED");
    }

    #[tokio::test]
    async fn p2p_handler_rejects_unknown_msisdn() {
        let (state, _directory, _alice_id, _bob_id) = harness().await;

        let err = p2p_handler(
            State(state),
            Json(P2pRequest {
                sender_msisdn: "0000000000".into(),
                receiver_msisdn: "2467654321".into(),
                amount: "10.00".into(),
                currency: "BBD".into(),
                idempotency_key: "p2p-2".into(),
                fee_version_id: None,
            }),
        )
        .await
        .expect_err("unknown sender should 404");

        assert!(matches!(err.0, ApiErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn float_top_up_posts_directly_without_a_policy() {
        let (state, _directory, _alice_id, _bob_id) = harness().await;
        let agent = state
            .directory
            .register_actor(RegisterActorRequest {
                actor_type: ActorType::Agent,
                msisdn: None,
                code: Some("900001".into()),
                parent_actor_id: None,
                currency: "BBD".into(),
            })
            .await
            .expect("register agent");

        let response = float_top_up_handler(
            State(state),
            Json(FloatAdjustmentRequest {
                agent_code: "900001".into(),
                amount: "500.00".into(),
                currency: "BBD".into(),
                staff_id: "staff-1".into(),
                reason: Some("daily top-up".into()),
                reference: None,
                idempotency_key: "float-1".into(),
            }),
        )
        .await
        .expect("float top-up should succeed");

        assert_eq!(response.0, StatusCode::CREATED);
        match response.1.0 {
            FloatAdjustmentResponse::Posted {
                balance_before_minor,
                balance_after_minor,
                ..
            } => {
                assert_eq!(balance_before_minor, 0);
                assert_eq!(balance_after_minor, 50_000);
            }
            FloatAdjustmentResponse::ApprovalRequired { .. } => {
                panic!("expected a direct post when no policy is registered for {}", agent.id)
            }
        }
    }

    #[tokio::test]
    async fn float_withdrawal_routes_through_approval_when_policy_matches() {
        let (state, _directory, _alice_id, _bob_id) = harness().await;
        state
            .directory
            .register_actor(RegisterActorRequest {
                actor_type: ActorType::Agent,
                msisdn: None,
                code: Some("900002".into()),
                parent_actor_id: None,
                currency: "BBD".into(),
            })
            .await
            .expect("register agent");

        state
            .approvals
            .register_policy(ApprovalPolicy {
                id: "policy-float-withdrawal".into(),
                name: "large float withdrawal".into(),
                approval_type: Some("FLOAT_WITHDRAWAL".into()),
                priority: 10,
                version: 1,
                state: PolicyState::Active,
                valid_from: None,
                valid_to: None,
                expiry_minutes: None,
                escalation_minutes: None,
                conditions: vec![PolicyCondition {
                    field: "amount_minor".into(),
                    operator: approval_policy::ConditionOperator::Gt,
                    value: serde_json::json!(0),
                }],
                stages: vec![PolicyStage {
                    stage_no: 1,
                    min_approvals: 1,
                    roles: vec!["MANAGER".into()],
                    actor_ids: vec![],
                    exclude_maker: false,
                    exclude_previous_approvers: false,
                    timeout_minutes: None,
                }],
                bindings: vec![],
            })
            .await
            .expect("register policy");

        let response = float_withdrawal_handler(
            State(state),
            Json(FloatAdjustmentRequest {
                agent_code: "900002".into(),
                amount: "100.00".into(),
                currency: "BBD".into(),
                staff_id: "staff-1".into(),
                reason: None,
                reference: None,
                idempotency_key: "float-2".into(),
            }),
        )
        .await
        .expect("float withdrawal should be accepted");

        assert_eq!(response.0, StatusCode::ACCEPTED);
        assert!(matches!(
            response.1.0,
            FloatAdjustmentResponse::ApprovalRequired { .. }
        ));
    }

    #[tokio::test]
    async fn approve_rejects_unknown_staff_id() {
        let (state, _directory, _alice_id, _bob_id) = harness().await;

        let err = approve_handler(
            State(state),
            Path("missing-request".into()),
            Json(ApproveRequest {
                staff_id: "ghost".into(),
                correlation_id: None,
            }),
        )
        .await
        .expect_err("unknown staff id should be rejected");

        assert!(matches!(err.0, ApiErrorKind::Auth(_)));
    }

    #[tokio::test]
    async fn verify_handler_reports_empty_chain_as_ok() {
        let (state, _directory, _alice_id, _bob_id) = harness().await;

        let response = verify_handler(
            State(state),
            Query(VerifyQuery {
                currency: "XOF".into(),
                from: None,
                to: None,
            }),
        )
        .await
        .expect("verify should succeed");

        assert!(response.0.ok);
        assert_eq!(response.0.errors.len(), 0);
    }
}
