#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actor_directory::ActorDirectory;
use actor_directory::ActorType;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use fee_matrix::FeeResolver;
use fee_matrix::FeesError;
use fee_matrix::ResolveRequest;
use idempotency_chain::ChainRecord;
use idempotency_chain::ChainVerification;
use idempotency_chain::IdempotencyStore;
use money::BalanceEntry;
use money::PostingSide;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type PostingResult<T> = Result<T, PostingError>;

#[derive(Debug, Error)]
pub enum PostingError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unbalanced journal: debit total {debit_minor} does not equal credit total {credit_minor}")]
    Unbalanced { debit_minor: i64, credit_minor: i64 },
    #[error("insufficient funds on account {account_id}: available would be {available_minor}")]
    InsufficientFunds {
        account_id: String,
        available_minor: i64,
    },
    #[error("account owner is frozen: {0}")]
    AccountFrozen(String),
    #[error("accounting period is not open for {0}")]
    PeriodClosed(String),
    #[error("concurrency retries exhausted")]
    ConcurrencyRetryExhausted,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<money::MoneyError> for PostingError {
    fn from(value: money::MoneyError) -> Self {
        match value {
            money::MoneyError::Unbalanced {
                debit_minor,
                credit_minor,
            } => PostingError::Unbalanced {
                debit_minor,
                credit_minor,
            },
            other => PostingError::Validation(other.to_string()),
        }
    }
}

impl From<actor_directory::DirectoryError> for PostingError {
    fn from(value: actor_directory::DirectoryError) -> Self {
        match value {
            actor_directory::DirectoryError::NotFound(msg) => PostingError::NotFound(msg),
            actor_directory::DirectoryError::Conflict(msg) => PostingError::Conflict(msg),
            actor_directory::DirectoryError::Validation(msg) => PostingError::Validation(msg),
        }
    }
}

impl From<FeesError> for PostingError {
    fn from(value: FeesError) -> Self {
        match value {
            FeesError::Validation(msg) => PostingError::Validation(msg),
            FeesError::NoEffectiveVersion(currency) => {
                PostingError::Validation(format!("no fee matrix version effective for {currency}"))
            }
        }
    }
}

impl From<idempotency_chain::IdempotencyError> for PostingError {
    fn from(value: idempotency_chain::IdempotencyError) -> Self {
        match value {
            idempotency_chain::IdempotencyError::Validation(msg) => PostingError::Validation(msg),
            idempotency_chain::IdempotencyError::Conflict => {
                PostingError::Conflict("idempotency key already used with a different payload".into())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalState {
    Pending,
    Posted,
    Reversed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodStatus {
    Open,
    Closed,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingPeriod {
    pub id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: PeriodStatus,
}

impl AccountingPeriod {
    fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerJournal {
    pub id: String,
    pub txn_type: String,
    pub currency: String,
    pub correlation_id: String,
    pub state: JournalState,
    pub description: String,
    pub prev_hash: String,
    pub hash: String,
    pub effective_date: DateTime<Utc>,
    pub reversal_of: Option<String>,
    pub correction_of: Option<String>,
    pub posting_batch_id: Option<String>,
    pub accounting_period_id: Option<String>,
    pub total_amount_minor: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub id: String,
    pub journal_id: String,
    pub account_id: String,
    pub side: PostingSide,
    pub amount_minor: i64,
    pub line_number: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: String,
    pub actual_minor: i64,
    pub available_minor: i64,
    pub hold_minor: i64,
    pub pending_credits_minor: i64,
    pub last_journal_id: Option<String>,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    fn new(account_id: &str, currency: &str, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.to_string(),
            actual_minor: 0,
            available_minor: 0,
            hold_minor: 0,
            pending_credits_minor: 0,
            last_journal_id: None,
            currency: currency.to_string(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub entity_id: String,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub actor_type: String,
    pub actor_id: String,
    pub schema_version: u32,
    pub payload_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventOutbox: Send + Sync {
    async fn publish(&self, event: Event);
}

#[derive(Default)]
pub struct InMemoryEventOutbox {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventOutbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn drain(&self) -> Vec<Event> {
        let mut guard = self.events.write().await;
        std::mem::take(&mut *guard)
    }

    pub async fn peek(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventOutbox for InMemoryEventOutbox {
    async fn publish(&self, event: Event) {
        let mut guard = self.events.write().await;
        guard.push(event);
    }
}

#[derive(Debug, Clone)]
pub struct EntryInput {
    pub account_id: String,
    pub side: PostingSide,
    pub amount_minor: i64,
    pub description: String,
}

/// Optional context that routes fee/commission splicing (§4.5) into the
/// command's entries; omitted entirely when a command carries no fees
/// (e.g. the reversal path never re-derives fees).
#[derive(Debug, Clone)]
pub struct FeeContext {
    pub agent_type: Option<String>,
    pub amount_minor: i64,
    pub fee_payer_account_id: Option<String>,
    pub fee_revenue_account_id: Option<String>,
    pub commission_funding_account_id: Option<String>,
    pub commission_payee_account_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PostCommand {
    pub idempotency_key: String,
    pub correlation_id: String,
    pub txn_type: String,
    pub currency: String,
    pub entries: Vec<EntryInput>,
    pub description: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub fee_version_id: Option<String>,
    pub commission_version_id: Option<String>,
    pub fee_context: Option<FeeContext>,
    pub effective_date: Option<DateTime<Utc>>,
    pub reversal_of: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub journal_id: String,
    pub state: JournalState,
    pub entries: Vec<LedgerLine>,
    pub created_at: DateTime<Utc>,
    pub correlation_id: String,
    pub txn_type: String,
    pub currency: String,
}

#[async_trait]
pub trait PostingEngine: Send + Sync {
    async fn post(&self, cmd: PostCommand) -> PostingResult<Receipt>;
    async fn reverse(
        &self,
        journal_id: &str,
        reason: &str,
        actor_type: ActorType,
        actor_id: &str,
        correlation_id: String,
    ) -> PostingResult<Receipt>;
    async fn get_journal(&self, journal_id: &str) -> PostingResult<(LedgerJournal, Vec<LedgerLine>)>;
    async fn get_balance(&self, account_id: &str) -> PostingResult<AccountBalance>;
    async fn verify_chain(&self, currency: &str) -> PostingResult<ChainVerification>;
    async fn open_period(&self, period: AccountingPeriod);
}

#[derive(Default)]
struct EngineState {
    journals: HashMap<String, LedgerJournal>,
    lines: HashMap<String, Vec<LedgerLine>>,
    balances: HashMap<String, AccountBalance>,
    chain_order: HashMap<String, Vec<String>>,
    chain_tail: HashMap<String, String>,
    periods: Vec<AccountingPeriod>,
}

pub struct InMemoryPostingEngine {
    directory: Arc<dyn ActorDirectory>,
    idempotency: Arc<dyn IdempotencyStore>,
    fees: Arc<FeeResolver>,
    outbox: Arc<dyn EventOutbox>,
    state: RwLock<EngineState>,
    retry_limit: usize,
    idempotency_ttl: Duration,
}

/// What one line of the command looks like after fee/commission
/// splicing, together with the account's normal-balance class so the
/// apply step knows the debit/credit sign without a second directory
/// round-trip.
struct ResolvedLine {
    account_id: String,
    side: PostingSide,
    amount_minor: i64,
    description: String,
    normal_balance: PostingSide,
    allow_negative: bool,
}

impl InMemoryPostingEngine {
    #[must_use]
    pub fn new(
        directory: Arc<dyn ActorDirectory>,
        idempotency: Arc<dyn IdempotencyStore>,
        fees: Arc<FeeResolver>,
        outbox: Arc<dyn EventOutbox>,
        retry_limit: usize,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            directory,
            idempotency,
            fees,
            outbox,
            state: RwLock::new(EngineState::default()),
            retry_limit,
            idempotency_ttl,
        }
    }

    fn header_canonical(
        id: &str,
        txn_type: &str,
        currency: &str,
        correlation_id: &str,
        effective_date: DateTime<Utc>,
        total_amount_minor: i64,
    ) -> String {
        money::canonical_json(&serde_json::json!({
            "id": id,
            "txn_type": txn_type,
            "currency": currency,
            "correlation_id": correlation_id,
            "effective_date": effective_date.to_rfc3339(),
            "total_amount_minor": total_amount_minor,
        }))
    }

    fn lines_canonical(lines: &[LedgerLine]) -> String {
        let values: Vec<serde_json::Value> = lines
            .iter()
            .map(|line| {
                serde_json::json!({
                    "account_id": line.account_id,
                    "side": line.side,
                    "amount_minor": line.amount_minor,
                    "line_number": line.line_number,
                })
            })
            .collect();
        money::canonical_json(&serde_json::Value::Array(values))
    }

    async fn resolve_lines(&self, cmd: &PostCommand) -> PostingResult<Vec<ResolvedLine>> {
        let mut resolved = Vec::with_capacity(cmd.entries.len());
        for entry in &cmd.entries {
            let account = self.directory.get_account(&entry.account_id).await?;
            if account.currency != cmd.currency {
                return Err(PostingError::Validation(format!(
                    "account {} is denominated in {} not {}",
                    entry.account_id, account.currency, cmd.currency
                )));
            }
            if entry.side == PostingSide::Debit {
                let owner = self.directory.get_actor(&account.owner_id).await?;
                if owner.is_frozen() {
                    return Err(PostingError::AccountFrozen(account.owner_id.clone()));
                }
            }
            resolved.push(ResolvedLine {
                account_id: entry.account_id.clone(),
                side: entry.side,
                amount_minor: entry.amount_minor,
                description: entry.description.clone(),
                normal_balance: account.normal_balance(),
                allow_negative: account.allow_negative,
            });
        }

        if let Some(fee_context) = &cmd.fee_context {
            let resolution = self
                .fees
                .resolve(ResolveRequest {
                    txn_type: cmd.txn_type.clone(),
                    currency: cmd.currency.clone(),
                    agent_type: fee_context.agent_type.clone(),
                    amount_minor: fee_context.amount_minor,
                    fee_version_id: cmd.fee_version_id.clone(),
                    commission_version_id: cmd.commission_version_id.clone(),
                    fee_payer_account_id: fee_context.fee_payer_account_id.clone(),
                    fee_revenue_account_id: fee_context.fee_revenue_account_id.clone(),
                    commission_funding_account_id: fee_context.commission_funding_account_id.clone(),
                    commission_payee_account_id: fee_context.commission_payee_account_id.clone(),
                })
                .await?;

            for line in resolution.fee_lines.into_iter().chain(resolution.commission_lines) {
                let account = self.directory.get_account(&line.account_id).await?;
                resolved.push(ResolvedLine {
                    account_id: line.account_id,
                    side: line.side,
                    amount_minor: line.amount_minor,
                    description: line.description,
                    normal_balance: account.normal_balance(),
                    allow_negative: account.allow_negative,
                });
            }
        }

        Ok(resolved)
    }

    fn period_for(state: &EngineState, date: NaiveDate) -> Option<&AccountingPeriod> {
        state.periods.iter().find(|period| period.covers(date))
    }

    fn apply_signed_delta(balance: &mut AccountBalance, resolved: &ResolvedLine) -> i64 {
        let signed = if resolved.side == resolved.normal_balance {
            resolved.amount_minor
        } else {
            -resolved.amount_minor
        };
        balance.actual_minor += signed;
        balance.available_minor = balance.actual_minor - balance.hold_minor;
        signed
    }

    #[tracing::instrument(skip(self, cmd), fields(correlation_id = %cmd.correlation_id))]
    async fn post_inner(&self, cmd: PostCommand) -> PostingResult<Receipt> {
        if cmd.entries.is_empty() {
            return Err(PostingError::Validation(
                "command must contain at least one entry".into(),
            ));
        }

        let payload_hash = money::payload_hash(&serde_json::json!({
            "txn_type": cmd.txn_type,
            "currency": cmd.currency,
            "entries": cmd.entries.iter().map(|e| serde_json::json!({
                "account_id": e.account_id,
                "side": e.side,
                "amount_minor": e.amount_minor,
            })).collect::<Vec<_>>(),
            "description": cmd.description,
        }));
        let scope_hash = money::scope_hash(&cmd.actor_id, &cmd.txn_type, &cmd.idempotency_key);

        if let Some(existing) = self
            .idempotency
            .lookup(&scope_hash, &cmd.idempotency_key)
            .await?
        {
            if existing.payload_hash == payload_hash {
                let receipt: Receipt = serde_json::from_value(existing.result_json)
                    .map_err(|e| PostingError::Internal(format!("corrupt idempotency record: {e}")))?;
                return Ok(receipt);
            }
            return Err(PostingError::Conflict(
                "idempotency key already used with a different payload".into(),
            ));
        }

        let resolved = self.resolve_lines(&cmd).await?;
        let balance_entries: Vec<BalanceEntry> = resolved
            .iter()
            .map(|line| BalanceEntry {
                side: line.side,
                amount_minor: line.amount_minor,
            })
            .collect();
        money::assert_balanced(&balance_entries)?;

        let effective_date = cmd.effective_date.unwrap_or_else(Utc::now);
        let total_amount_minor: i64 = resolved
            .iter()
            .filter(|line| line.side == PostingSide::Debit)
            .map(|line| line.amount_minor)
            .sum();

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            if attempt > self.retry_limit {
                return Err(PostingError::ConcurrencyRetryExhausted);
            }

            let (snapshot, prev_hash) = {
                let guard = self.state.read().await;
                if let Some(period) = Self::period_for(&guard, effective_date.date_naive())
                    && period.status != PeriodStatus::Open
                {
                    return Err(PostingError::PeriodClosed(period.id.clone()));
                }
                let mut snapshot: HashMap<String, Option<String>> = HashMap::new();
                for line in &resolved {
                    snapshot.entry(line.account_id.clone()).or_insert_with(|| {
                        guard
                            .balances
                            .get(&line.account_id)
                            .and_then(|b| b.last_journal_id.clone())
                    });
                }
                let prev_hash = guard
                    .chain_tail
                    .get(&cmd.currency)
                    .cloned()
                    .unwrap_or_else(idempotency_chain::genesis_hash);
                (snapshot, prev_hash)
            };

            let journal_id = Uuid::new_v4().to_string();
            let mut lines = Vec::with_capacity(resolved.len());
            for (index, entry) in resolved.iter().enumerate() {
                lines.push(LedgerLine {
                    id: Uuid::new_v4().to_string(),
                    journal_id: journal_id.clone(),
                    account_id: entry.account_id.clone(),
                    side: entry.side,
                    amount_minor: entry.amount_minor,
                    line_number: index as u32 + 1,
                    description: entry.description.clone(),
                });
            }
            let header = Self::header_canonical(
                &journal_id,
                &cmd.txn_type,
                &cmd.currency,
                &cmd.correlation_id,
                effective_date,
                total_amount_minor,
            );
            let lines_canonical = Self::lines_canonical(&lines);
            let hash = idempotency_chain::compute_journal_hash(&prev_hash, &header, &lines_canonical);

            let mut guard = self.state.write().await;

            let stale = snapshot.iter().any(|(account_id, expected)| {
                let actual = guard
                    .balances
                    .get(account_id)
                    .and_then(|b| b.last_journal_id.clone());
                &actual != expected
            });
            let tail_stale = guard
                .chain_tail
                .get(&cmd.currency)
                .cloned()
                .unwrap_or_else(idempotency_chain::genesis_hash)
                != prev_hash;
            if stale || tail_stale {
                drop(guard);
                continue;
            }

            let mut insufficient: Option<PostingError> = None;
            for entry in &resolved {
                if entry.side != PostingSide::Debit || entry.allow_negative {
                    continue;
                }
                let now = Utc::now();
                let current = guard
                    .balances
                    .entry(entry.account_id.clone())
                    .or_insert_with(|| AccountBalance::new(&entry.account_id, &cmd.currency, now));
                let projected_signed = if entry.side == entry.normal_balance {
                    entry.amount_minor
                } else {
                    -entry.amount_minor
                };
                let projected_available = current.actual_minor + projected_signed - current.hold_minor;
                if projected_available < 0 {
                    insufficient = Some(PostingError::InsufficientFunds {
                        account_id: entry.account_id.clone(),
                        available_minor: projected_available,
                    });
                    break;
                }
            }
            if let Some(err) = insufficient {
                return Err(err);
            }

            let journal = LedgerJournal {
                id: journal_id.clone(),
                txn_type: cmd.txn_type.clone(),
                currency: cmd.currency.clone(),
                correlation_id: cmd.correlation_id.clone(),
                state: JournalState::Posted,
                description: cmd.description.clone(),
                prev_hash: prev_hash.clone(),
                hash: hash.clone(),
                effective_date,
                reversal_of: cmd.reversal_of.clone(),
                correction_of: None,
                posting_batch_id: None,
                accounting_period_id: None,
                total_amount_minor,
            };

            let now = Utc::now();
            for entry in &resolved {
                let balance = guard
                    .balances
                    .entry(entry.account_id.clone())
                    .or_insert_with(|| AccountBalance::new(&entry.account_id, &cmd.currency, now));
                Self::apply_signed_delta(balance, entry);
                balance.last_journal_id = Some(journal_id.clone());
                balance.updated_at = now;
            }

            guard.lines.insert(journal_id.clone(), lines.clone());
            guard
                .chain_order
                .entry(cmd.currency.clone())
                .or_default()
                .push(journal_id.clone());
            guard.chain_tail.insert(cmd.currency.clone(), hash.clone());
            guard.journals.insert(journal_id.clone(), journal.clone());
            drop(guard);

            let receipt = Receipt {
                journal_id: journal_id.clone(),
                state: JournalState::Posted,
                entries: lines,
                created_at: now,
                correlation_id: cmd.correlation_id.clone(),
                txn_type: cmd.txn_type.clone(),
                currency: cmd.currency.clone(),
            };

            let result_json = serde_json::to_value(&receipt)
                .map_err(|e| PostingError::Internal(format!("failed to serialize receipt: {e}")))?;
            self.idempotency
                .record(
                    &scope_hash,
                    &cmd.idempotency_key,
                    &payload_hash,
                    result_json,
                    self.idempotency_ttl,
                )
                .await?;

            self.outbox
                .publish(Event {
                    id: Uuid::new_v4().to_string(),
                    name: format!("{}_POSTED", cmd.txn_type),
                    entity_type: "LedgerJournal".into(),
                    entity_id: journal_id.clone(),
                    correlation_id: cmd.correlation_id.clone(),
                    causation_id: None,
                    actor_type: format!("{:?}", cmd.actor_type).to_uppercase(),
                    actor_id: cmd.actor_id.clone(),
                    schema_version: 1,
                    payload_json: result_json_for_event(&receipt),
                    created_at: now,
                })
                .await;

            tracing::info!(journal_id = %journal_id, "journal posted");
            return Ok(receipt);
        }
    }
}

fn result_json_for_event(receipt: &Receipt) -> serde_json::Value {
    serde_json::json!({
        "journal_id": receipt.journal_id,
        "txn_type": receipt.txn_type,
        "currency": receipt.currency,
    })
}

#[async_trait]
impl PostingEngine for InMemoryPostingEngine {
    async fn post(&self, cmd: PostCommand) -> PostingResult<Receipt> {
        self.post_inner(cmd).await
    }

    async fn reverse(
        &self,
        journal_id: &str,
        reason: &str,
        actor_type: ActorType,
        actor_id: &str,
        correlation_id: String,
    ) -> PostingResult<Receipt> {
        let (original, original_lines) = self.get_journal(journal_id).await?;
        if original.state == JournalState::Reversed {
            return Err(PostingError::Conflict(format!(
                "journal {journal_id} is already reversed"
            )));
        }

        let entries: Vec<EntryInput> = original_lines
            .iter()
            .map(|line| EntryInput {
                account_id: line.account_id.clone(),
                side: line.side.opposite(),
                amount_minor: line.amount_minor,
                description: format!("reversal of {}: {}", original.id, reason),
            })
            .collect();

        let reversal_cmd = PostCommand {
            idempotency_key: format!("reverse:{journal_id}"),
            correlation_id,
            txn_type: format!("{}_REVERSAL", original.txn_type),
            currency: original.currency.clone(),
            entries,
            description: reason.to_string(),
            actor_type,
            actor_id: actor_id.to_string(),
            fee_version_id: None,
            commission_version_id: None,
            fee_context: None,
            effective_date: None,
            reversal_of: Some(journal_id.to_string()),
        };

        let receipt = self.post_inner(reversal_cmd).await?;

        let mut guard = self.state.write().await;
        match guard.journals.get_mut(journal_id) {
            Some(journal) if journal.state == JournalState::Reversed => {
                return Err(PostingError::Conflict(format!(
                    "journal {journal_id} is already reversed"
                )));
            }
            Some(journal) => journal.state = JournalState::Reversed,
            None => return Err(PostingError::NotFound(format!("journal {journal_id}"))),
        }

        Ok(receipt)
    }

    async fn get_journal(&self, journal_id: &str) -> PostingResult<(LedgerJournal, Vec<LedgerLine>)> {
        let guard = self.state.read().await;
        let journal = guard
            .journals
            .get(journal_id)
            .cloned()
            .ok_or_else(|| PostingError::NotFound(format!("journal {journal_id}")))?;
        let lines = guard.lines.get(journal_id).cloned().unwrap_or_default();
        Ok((journal, lines))
    }

    async fn get_balance(&self, account_id: &str) -> PostingResult<AccountBalance> {
        let guard = self.state.read().await;
        guard
            .balances
            .get(account_id)
            .cloned()
            .ok_or_else(|| PostingError::NotFound(format!("balance for account {account_id}")))
    }

    async fn verify_chain(&self, currency: &str) -> PostingResult<ChainVerification> {
        let guard = self.state.read().await;
        let order = guard.chain_order.get(currency).cloned().unwrap_or_default();
        let records: Vec<ChainRecord> = order
            .iter()
            .filter_map(|journal_id| {
                let journal = guard.journals.get(journal_id)?;
                let lines = guard.lines.get(journal_id)?;
                Some(ChainRecord {
                    journal_id: journal.id.clone(),
                    prev_hash: journal.prev_hash.clone(),
                    hash: journal.hash.clone(),
                    header_canonical: Self::header_canonical(
                        &journal.id,
                        &journal.txn_type,
                        &journal.currency,
                        &journal.correlation_id,
                        journal.effective_date,
                        journal.total_amount_minor,
                    ),
                    lines_canonical: Self::lines_canonical(lines),
                })
            })
            .collect();
        Ok(idempotency_chain::verify_chain(&records))
    }

    async fn open_period(&self, period: AccountingPeriod) {
        let mut guard = self.state.write().await;
        guard.periods.push(period);
    }
}
