#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use money::PostingSide;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorType {
    Customer,
    Agent,
    Merchant,
    Staff,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorState {
    Active,
    Suspended,
    Frozen,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KycState {
    Pending,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub actor_type: ActorType,
    pub state: ActorState,
    pub msisdn: Option<String>,
    pub code: Option<String>,
    pub parent_actor_id: Option<String>,
    pub kyc_state: KycState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Actor {
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        matches!(self.state, ActorState::Frozen)
    }
}

/// The five classical account families; every `AccountType` maps onto
/// exactly one and that mapping determines the sign convention used
/// when a journal line is applied to a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountClass {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountClass {
    #[must_use]
    pub fn normal_balance(self) -> PostingSide {
        match self {
            AccountClass::Asset | AccountClass::Expense => PostingSide::Debit,
            AccountClass::Liability | AccountClass::Equity | AccountClass::Revenue => {
                PostingSide::Credit
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Wallet,
    CashFloat,
    Fee,
    Commission,
    Suspense,
    BankMirror,
}

impl AccountType {
    #[must_use]
    pub fn class(self) -> AccountClass {
        match self {
            AccountType::CashFloat | AccountType::BankMirror => AccountClass::Asset,
            AccountType::Fee | AccountType::Commission => AccountClass::Revenue,
            AccountType::Wallet | AccountType::Suspense => AccountClass::Liability,
        }
    }

    #[must_use]
    pub fn coa_code(self) -> &'static str {
        match self {
            AccountType::Wallet => "2100",
            AccountType::CashFloat => "1200",
            AccountType::Fee => "4100",
            AccountType::Commission => "4200",
            AccountType::Suspense => "2900",
            AccountType::BankMirror => "1900",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub id: String,
    pub owner_type: ActorType,
    pub owner_id: String,
    pub account_type: AccountType,
    pub currency: String,
    pub coa_code: String,
    /// Whether a DR against this account may push `available_minor`
    /// below zero without an active overdraft facility.
    pub allow_negative: bool,
}

impl LedgerAccount {
    #[must_use]
    pub fn normal_balance(&self) -> PostingSide {
        self.account_type.class().normal_balance()
    }
}

#[derive(Debug, Clone)]
pub struct RegisterActorRequest {
    pub actor_type: ActorType,
    pub msisdn: Option<String>,
    pub code: Option<String>,
    pub parent_actor_id: Option<String>,
    pub currency: String,
}

impl RegisterActorRequest {
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.currency.trim().len() != 3 {
            return Err(DirectoryError::Validation(
                "currency must be a three-letter code".into(),
            ));
        }
        if let Some(code) = &self.code
            && (code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(DirectoryError::Validation(
                "agent/store code must be exactly six digits".into(),
            ));
        }
        if let Some(msisdn) = &self.msisdn
            && msisdn.trim().is_empty()
        {
            return Err(DirectoryError::Validation(
                "msisdn must not be blank when provided".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn register_actor(&self, request: RegisterActorRequest) -> DirectoryResult<Actor>;
    async fn get_actor(&self, actor_id: &str) -> DirectoryResult<Actor>;
    async fn resolve_by_msisdn(
        &self,
        actor_type: ActorType,
        msisdn: &str,
    ) -> DirectoryResult<Actor>;
    async fn resolve_by_code(&self, code: &str) -> DirectoryResult<Actor>;
    async fn get_account(&self, account_id: &str) -> DirectoryResult<LedgerAccount>;
    async fn wallet_account(&self, actor_id: &str, currency: &str) -> DirectoryResult<LedgerAccount>;
    async fn float_account(&self, actor_id: &str, currency: &str) -> DirectoryResult<LedgerAccount>;
    async fn accounts_for_actor(&self, actor_id: &str) -> DirectoryResult<Vec<LedgerAccount>>;
}

#[derive(Default)]
struct State {
    actors: HashMap<String, Actor>,
    msisdn_index: HashMap<(ActorType, String), String>,
    code_index: HashMap<String, String>,
    accounts: HashMap<String, LedgerAccount>,
    accounts_by_actor: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct InMemoryActorDirectory {
    state: RwLock<State>,
}

impl InMemoryActorDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn provision_account(
        state: &mut State,
        owner_type: ActorType,
        owner_id: &str,
        account_type: AccountType,
        currency: &str,
    ) -> LedgerAccount {
        let account = LedgerAccount {
            id: Uuid::new_v4().to_string(),
            owner_type,
            owner_id: owner_id.to_string(),
            account_type,
            currency: currency.to_string(),
            coa_code: account_type.coa_code().to_string(),
            allow_negative: false,
        };
        state.accounts.insert(account.id.clone(), account.clone());
        state
            .accounts_by_actor
            .entry(owner_id.to_string())
            .or_default()
            .push(account.id.clone());
        account
    }

    async fn find_account(
        &self,
        actor_id: &str,
        currency: &str,
        account_type: AccountType,
    ) -> DirectoryResult<LedgerAccount> {
        let guard = self.state.read().await;
        let ids = guard
            .accounts_by_actor
            .get(actor_id)
            .ok_or_else(|| DirectoryError::NotFound(format!("actor {actor_id} has no accounts")))?;
        ids.iter()
            .filter_map(|id| guard.accounts.get(id))
            .find(|account| account.account_type == account_type && account.currency == currency)
            .cloned()
            .ok_or_else(|| {
                DirectoryError::NotFound(format!(
                    "actor {actor_id} has no {account_type:?} account in {currency}"
                ))
            })
    }
}

#[async_trait]
impl ActorDirectory for InMemoryActorDirectory {
    async fn register_actor(&self, request: RegisterActorRequest) -> DirectoryResult<Actor> {
        request.validate()?;
        let mut guard = self.state.write().await;

        if let Some(msisdn) = &request.msisdn
            && guard
                .msisdn_index
                .contains_key(&(request.actor_type, msisdn.clone()))
        {
            return Err(DirectoryError::Conflict(format!(
                "msisdn {msisdn} already registered for this actor type"
            )));
        }
        if let Some(code) = &request.code
            && guard.code_index.contains_key(code)
        {
            return Err(DirectoryError::Conflict(format!(
                "code {code} already registered"
            )));
        }

        let now = Utc::now();
        let actor = Actor {
            id: Uuid::new_v4().to_string(),
            actor_type: request.actor_type,
            state: ActorState::Active,
            msisdn: request.msisdn.clone(),
            code: request.code.clone(),
            parent_actor_id: request.parent_actor_id.clone(),
            kyc_state: KycState::Pending,
            created_at: now,
            updated_at: now,
        };

        if let Some(msisdn) = &request.msisdn {
            guard
                .msisdn_index
                .insert((request.actor_type, msisdn.clone()), actor.id.clone());
        }
        if let Some(code) = &request.code {
            guard.code_index.insert(code.clone(), actor.id.clone());
        }
        guard.actors.insert(actor.id.clone(), actor.clone());

        Self::provision_account(
            &mut guard,
            request.actor_type,
            &actor.id,
            AccountType::Wallet,
            &request.currency,
        );
        if request.actor_type == ActorType::Agent {
            Self::provision_account(
                &mut guard,
                request.actor_type,
                &actor.id,
                AccountType::CashFloat,
                &request.currency,
            );
        }

        Ok(actor)
    }

    async fn get_actor(&self, actor_id: &str) -> DirectoryResult<Actor> {
        let guard = self.state.read().await;
        guard
            .actors
            .get(actor_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("actor {actor_id}")))
    }

    async fn resolve_by_msisdn(
        &self,
        actor_type: ActorType,
        msisdn: &str,
    ) -> DirectoryResult<Actor> {
        let guard = self.state.read().await;
        let actor_id = guard
            .msisdn_index
            .get(&(actor_type, msisdn.to_string()))
            .ok_or_else(|| DirectoryError::NotFound(format!("msisdn {msisdn}")))?;
        guard
            .actors
            .get(actor_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("msisdn {msisdn}")))
    }

    async fn resolve_by_code(&self, code: &str) -> DirectoryResult<Actor> {
        let guard = self.state.read().await;
        let actor_id = guard
            .code_index
            .get(code)
            .ok_or_else(|| DirectoryError::NotFound(format!("code {code}")))?;
        guard
            .actors
            .get(actor_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("code {code}")))
    }

    async fn get_account(&self, account_id: &str) -> DirectoryResult<LedgerAccount> {
        let guard = self.state.read().await;
        guard
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("account {account_id}")))
    }

    async fn wallet_account(&self, actor_id: &str, currency: &str) -> DirectoryResult<LedgerAccount> {
        self.find_account(actor_id, currency, AccountType::Wallet).await
    }

    async fn float_account(&self, actor_id: &str, currency: &str) -> DirectoryResult<LedgerAccount> {
        self.find_account(actor_id, currency, AccountType::CashFloat).await
    }

    async fn accounts_for_actor(&self, actor_id: &str) -> DirectoryResult<Vec<LedgerAccount>> {
        let guard = self.state.read().await;
        let ids = guard
            .accounts_by_actor
            .get(actor_id)
            .cloned()
            .unwrap_or_default();
        Ok(ids
            .into_iter()
            .filter_map(|id| guard.accounts.get(&id).cloned())
            .collect())
    }
}

/// House accounts (fee revenue, commission, suspense, bank mirror) are
/// provisioned once per currency at boot, not per-actor.
pub async fn provision_house_account(
    directory: &InMemoryActorDirectory,
    account_type: AccountType,
    currency: &str,
    house_actor_id: &str,
) -> LedgerAccount {
    let mut guard = directory.state.write().await;
    let owner_type = ActorType::System;
    if !guard.actors.contains_key(house_actor_id) {
        let now = Utc::now();
        guard.actors.insert(
            house_actor_id.to_string(),
            Actor {
                id: house_actor_id.to_string(),
                actor_type: owner_type,
                state: ActorState::Active,
                msisdn: None,
                code: None,
                parent_actor_id: None,
                kyc_state: KycState::Verified,
                created_at: now,
                updated_at: now,
            },
        );
    }
    let seen = guard
        .accounts_by_actor
        .get(house_actor_id)
        .and_then(|ids| {
            ids.iter()
                .filter_map(|id| guard.accounts.get(id))
                .find(|account| account.account_type == account_type && account.currency == currency)
                .cloned()
        });
    if let Some(existing) = seen {
        return existing;
    }
    InMemoryActorDirectory::provision_account(
        &mut guard,
        owner_type,
        house_actor_id,
        account_type,
        currency,
    )
}
