#![deny(clippy::print_stdout, clippy::print_stderr)]

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

pub type MoneyResult<T> = Result<T, MoneyError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("unbalanced journal: debit total {debit_minor} does not equal credit total {credit_minor}")]
    Unbalanced { debit_minor: i64, credit_minor: i64 },
    #[error("journal must contain at least one entry")]
    EmptyEntries,
}

/// One side of a double-entry line. Shared by every crate that needs to
/// reason about debit/credit polarity without depending on the ledger's
/// full line type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostingSide {
    #[serde(rename = "DR")]
    Debit,
    #[serde(rename = "CR")]
    Credit,
}

impl PostingSide {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            PostingSide::Debit => PostingSide::Credit,
            PostingSide::Credit => PostingSide::Debit,
        }
    }

    /// +1 if this side increases a debit-normal balance, -1 otherwise.
    #[must_use]
    pub fn debit_sign(self) -> i64 {
        match self {
            PostingSide::Debit => 1,
            PostingSide::Credit => -1,
        }
    }
}

/// Minimal shape required by [`assert_balanced`]; the ledger's own line
/// type satisfies this trivially by field access.
#[derive(Debug, Clone, Copy)]
pub struct BalanceEntry {
    pub side: PostingSide,
    pub amount_minor: i64,
}

/// Strict decimal-string parsing into signed minor units. Accepts an
/// optional leading `-`, 1+ integer digits, and at most two fractional
/// digits, matching `^-?\d+(\.\d{1,2})?$`.
pub fn parse_minor(input: &str) -> MoneyResult<i64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(MoneyError::InvalidAmount("amount must not be empty".into()));
    }

    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (integer_part, fraction_part) = match rest.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (rest, None),
    };

    if integer_part.is_empty() || !integer_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidAmount(format!(
            "invalid amount: {input}"
        )));
    }

    let fraction_digits: String = match fraction_part {
        Some(frac) if frac.is_empty() || frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) => {
            return Err(MoneyError::InvalidAmount(format!(
                "invalid amount: {input}"
            )));
        }
        Some(frac) if frac.len() == 1 => format!("{frac}0"),
        Some(frac) => frac.to_string(),
        None => "00".to_string(),
    };

    let integer_minor: i64 = integer_part
        .parse()
        .map_err(|_| MoneyError::InvalidAmount(format!("amount out of range: {input}")))?;
    let fraction_minor: i64 = fraction_digits
        .parse()
        .map_err(|_| MoneyError::InvalidAmount(format!("amount out of range: {input}")))?;

    let magnitude = integer_minor
        .checked_mul(100)
        .and_then(|whole| whole.checked_add(fraction_minor))
        .ok_or_else(|| MoneyError::InvalidAmount(format!("amount out of range: {input}")))?;

    Ok(if negative { -magnitude } else { magnitude })
}

/// Round-trip exact inverse of [`parse_minor`].
#[must_use]
pub fn format_minor(minor: i64) -> String {
    let negative = minor < 0;
    let magnitude = minor.unsigned_abs();
    let whole = magnitude / 100;
    let fraction = magnitude % 100;
    format!("{}{whole}.{fraction:02}", if negative { "-" } else { "" })
}

/// Sums both sides of a journal's entries in minor units and requires
/// equality; both totals must also be strictly positive.
pub fn assert_balanced(entries: &[BalanceEntry]) -> MoneyResult<()> {
    if entries.is_empty() {
        return Err(MoneyError::EmptyEntries);
    }

    let mut debit_minor: i64 = 0;
    let mut credit_minor: i64 = 0;
    for entry in entries {
        match entry.side {
            PostingSide::Debit => debit_minor += entry.amount_minor,
            PostingSide::Credit => credit_minor += entry.amount_minor,
        }
    }

    if debit_minor <= 0 || credit_minor <= 0 || debit_minor != credit_minor {
        return Err(MoneyError::Unbalanced {
            debit_minor,
            credit_minor,
        });
    }

    Ok(())
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Fingerprints `(initiator, txn_type, key)` so unrelated initiators or
/// transaction types can never collide on the same idempotency key.
#[must_use]
pub fn scope_hash(initiator_actor_id: &str, txn_type: &str, idempotency_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(initiator_actor_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(txn_type.as_bytes());
    hasher.update(b"\0");
    hasher.update(idempotency_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hashes the canonical JSON form of a value: object keys sorted
/// lexicographically and recursively, numbers rendered without
/// scientific notation, no incidental whitespace.
#[must_use]
pub fn payload_hash(value: &serde_json::Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Renders `value` as compact JSON with every object's keys sorted.
/// `serde_json::Value`'s default `Map` is already key-ordered (the
/// `preserve_order` feature is not enabled anywhere in this workspace),
/// but we sort explicitly so canonicalization does not silently depend
/// on that cargo feature never being turned on by a transitive crate.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn write(value: &serde_json::Value, out: &mut String) {
        match value {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (index, key) in keys.iter().enumerate() {
                    if index > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).unwrap_or_default());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            serde_json::Value::Array(items) => {
                out.push('[');
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(parse_minor("10.00").expect("parse"), 1000);
        assert_eq!(parse_minor("10").expect("parse"), 1000);
        assert_eq!(parse_minor("0.5").expect("parse"), 50);
        assert_eq!(parse_minor("-25.01").expect("parse"), -2501);
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert!(parse_minor("10.001").is_err());
        assert!(parse_minor("abc").is_err());
        assert!(parse_minor("").is_err());
        assert!(parse_minor("1.").is_err());
        assert!(parse_minor(".5").is_err());
    }

    #[test]
    fn format_minor_round_trips() {
        for s in ["10.00", "0.05", "-25.01", "999999.99"] {
            let minor = parse_minor(s).expect("parse");
            assert_eq!(format_minor(minor), s);
        }
    }

    #[test]
    fn assert_balanced_requires_equal_positive_sides() {
        let balanced = [
            BalanceEntry {
                side: PostingSide::Debit,
                amount_minor: 2500,
            },
            BalanceEntry {
                side: PostingSide::Credit,
                amount_minor: 2500,
            },
        ];
        assert_balanced(&balanced).expect("balanced entries should pass");

        let unbalanced = [
            BalanceEntry {
                side: PostingSide::Debit,
                amount_minor: 2500,
            },
            BalanceEntry {
                side: PostingSide::Credit,
                amount_minor: 2400,
            },
        ];
        assert!(assert_balanced(&unbalanced).is_err());

        assert!(matches!(assert_balanced(&[]), Err(MoneyError::EmptyEntries)));
    }

    #[test]
    fn scope_hash_distinguishes_initiators_and_types() {
        let a = scope_hash("actor-1", "P2P", "key-1");
        let b = scope_hash("actor-2", "P2P", "key-1");
        let c = scope_hash("actor-1", "B2B", "key-1");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, scope_hash("actor-1", "P2P", "key-1"));
    }

    #[test]
    fn payload_hash_is_order_independent_over_keys() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn payload_hash_changes_when_a_value_changes() {
        let a = serde_json::json!({"amount": 2500});
        let b = serde_json::json!({"amount": 2501});
        assert_ne!(payload_hash(&a), payload_hash(&b));
    }
}
