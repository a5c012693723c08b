#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("idempotency key already used with a different payload")]
    Conflict,
}

/// `(scope_hash, idempotency_key)` uniquely identifies one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub scope_hash: String,
    pub idempotency_key: String,
    pub payload_hash: String,
    pub result_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Point read used before posting: a hit with a matching
    /// `payload_hash` means replay the stored receipt.
    async fn lookup(
        &self,
        scope_hash: &str,
        idempotency_key: &str,
    ) -> IdempotencyResult<Option<IdempotencyRecord>>;

    /// Conditional insert used after a successful post. Returns the
    /// existing record unchanged if one already exists with the same
    /// payload hash (a concurrent identical request raced us); returns
    /// [`IdempotencyError::Conflict`] if an existing record has a
    /// different payload hash; never overwrites.
    async fn record(
        &self,
        scope_hash: &str,
        idempotency_key: &str,
        payload_hash: &str,
        result_json: serde_json::Value,
        ttl: Duration,
    ) -> IdempotencyResult<IdempotencyRecord>;
}

#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<(String, String), IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn lookup(
        &self,
        scope_hash: &str,
        idempotency_key: &str,
    ) -> IdempotencyResult<Option<IdempotencyRecord>> {
        let guard = self.records.read().await;
        let key = (scope_hash.to_string(), idempotency_key.to_string());
        match guard.get(&key) {
            Some(record) if !record.is_expired(Utc::now()) => Ok(Some(record.clone())),
            _ => Ok(None),
        }
    }

    async fn record(
        &self,
        scope_hash: &str,
        idempotency_key: &str,
        payload_hash: &str,
        result_json: serde_json::Value,
        ttl: Duration,
    ) -> IdempotencyResult<IdempotencyRecord> {
        if scope_hash.trim().is_empty() || idempotency_key.trim().is_empty() {
            return Err(IdempotencyError::Validation(
                "scope_hash and idempotency_key must not be empty".into(),
            ));
        }

        let mut guard = self.records.write().await;
        let key = (scope_hash.to_string(), idempotency_key.to_string());
        let now = Utc::now();

        if let Some(existing) = guard.get(&key)
            && !existing.is_expired(now)
        {
            return if existing.payload_hash == payload_hash {
                Ok(existing.clone())
            } else {
                Err(IdempotencyError::Conflict)
            };
        }

        let ttl_chrono = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let record = IdempotencyRecord {
            scope_hash: scope_hash.to_string(),
            idempotency_key: idempotency_key.to_string(),
            payload_hash: payload_hash.to_string(),
            result_json,
            created_at: now,
            expires_at: now + ttl_chrono,
        };
        guard.insert(key, record.clone());
        Ok(record)
    }
}

/// Inputs to the per-journal chain hash: `hash = sha256(prev_hash ||
/// header-canonical || lines-canonical)`.
#[must_use]
pub fn compute_journal_hash(prev_hash: &str, header_canonical: &str, lines_canonical: &str) -> String {
    let mut combined = String::with_capacity(
        prev_hash.len() + header_canonical.len() + lines_canonical.len(),
    );
    combined.push_str(prev_hash);
    combined.push_str(header_canonical);
    combined.push_str(lines_canonical);
    money::sha256_hex(combined.as_bytes())
}

/// The zero-value hash used as `prev_hash` for the first-ever journal
/// chained in a given currency.
#[must_use]
pub fn genesis_hash() -> String {
    "0".repeat(64)
}

/// Minimal shape a caller needs to supply for [`verify_chain`]; the
/// ledger's own journal type satisfies this by field access.
#[derive(Debug, Clone)]
pub struct ChainRecord {
    pub journal_id: String,
    pub prev_hash: String,
    pub hash: String,
    pub header_canonical: String,
    pub lines_canonical: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub ok: bool,
    pub checked: usize,
    pub errors: Vec<String>,
}

/// Walks `records` (already in currency chain order) and recomputes
/// each hash from its predecessor, reporting the first mismatching
/// journal id it finds. Every subsequent journal's hash necessarily
/// changes too since each link folds in the previous one.
#[must_use]
pub fn verify_chain(records: &[ChainRecord]) -> ChainVerification {
    let mut previous = genesis_hash();
    let mut errors = Vec::new();

    for record in records {
        if record.prev_hash != previous {
            errors.push(format!(
                "prev_hash mismatch at journal {}",
                record.journal_id
            ));
            previous = record.hash.clone();
            continue;
        }
        let expected = compute_journal_hash(
            &record.prev_hash,
            &record.header_canonical,
            &record.lines_canonical,
        );
        if expected != record.hash {
            errors.push(format!("hash mismatch at journal {}", record.journal_id));
        }
        previous = record.hash.clone();
    }

    ChainVerification {
        ok: errors.is_empty(),
        checked: records.len(),
        errors,
    }
}
