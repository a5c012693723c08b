#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use money::PostingSide;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

pub type FeesResult<T> = Result<T, FeesError>;

#[derive(Debug, Error)]
pub enum FeesError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no fee/commission matrix version is effective for currency {0}")]
    NoEffectiveVersion(String),
}

/// Integer division rounded half-to-even ("banker's rounding"), the
/// rounding mode every amount in the fee matrix is computed with.
/// `denominator` must be positive.
#[must_use]
pub fn round_half_even_div(numerator: i128, denominator: i128) -> i64 {
    debug_assert!(denominator > 0, "denominator must be positive");
    let quotient = numerator.div_euclid(denominator);
    let remainder = numerator.rem_euclid(denominator);
    let twice_remainder = remainder * 2;
    let rounded = match twice_remainder.cmp(&denominator) {
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Equal => {
            if quotient % 2 == 0 {
                quotient
            } else {
                quotient + 1
            }
        }
    };
    rounded as i64
}

#[must_use]
pub fn clamp_i64(value: i64, min: i64, max: i64) -> i64 {
    value.clamp(min, max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixVersionState {
    Draft,
    Approved,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixVersion {
    pub id: String,
    pub currency: String,
    pub state: MatrixVersionState,
    pub effective_at: DateTime<Utc>,
}

/// A single (txn_type, currency, agent_type) pricing rule, used for
/// both the fee matrix and the commission matrix — the two share the
/// same shape and rounding rules (§4.5), only the routed account and
/// default bp differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: String,
    pub version_id: String,
    pub txn_type: String,
    pub currency: String,
    pub agent_type: Option<String>,
    pub flat_minor: i64,
    pub percent_bp: i64,
    pub tax_rate_bp: i64,
    pub min_minor: i64,
    pub max_minor: i64,
}

impl PricingRule {
    /// Computes `{fee_minor, tax_minor}` for `amount_minor` per §4.5
    /// step 3: `round_half_even(flat + amount * percent_bp / 10000)`
    /// clamped to `[min_minor, max_minor]`, then tax on the clamped fee.
    #[must_use]
    pub fn apply(&self, amount_minor: i64) -> (i64, i64) {
        let numerator = i128::from(self.flat_minor) * 10_000 + i128::from(amount_minor) * i128::from(self.percent_bp);
        let raw_fee = round_half_even_div(numerator, 10_000);
        let fee_minor = clamp_i64(raw_fee, self.min_minor, self.max_minor);
        let tax_minor = round_half_even_div(i128::from(fee_minor) * i128::from(self.tax_rate_bp), 10_000);
        (fee_minor, tax_minor)
    }
}

#[async_trait]
pub trait FeeMatrixStore: Send + Sync {
    async fn current_version(&self, currency: &str) -> FeesResult<Option<MatrixVersion>>;
    async fn rule_for(
        &self,
        version_id: &str,
        txn_type: &str,
        currency: &str,
        agent_type: Option<&str>,
    ) -> FeesResult<Option<PricingRule>>;
}

#[derive(Default)]
struct MatrixState {
    fee_versions: Vec<MatrixVersion>,
    commission_versions: Vec<MatrixVersion>,
    fee_rules: HashMap<String, Vec<PricingRule>>,
    commission_rules: HashMap<String, Vec<PricingRule>>,
}

#[derive(Default)]
pub struct InMemoryFeeMatrixStore {
    state: RwLock<MatrixState>,
}

impl InMemoryFeeMatrixStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_fee_version(&self, version: MatrixVersion) {
        let mut guard = self.state.write().await;
        guard.fee_versions.push(version);
    }

    pub async fn put_commission_version(&self, version: MatrixVersion) {
        let mut guard = self.state.write().await;
        guard.commission_versions.push(version);
    }

    pub async fn put_fee_rule(&self, rule: PricingRule) {
        let mut guard = self.state.write().await;
        guard.fee_rules.entry(rule.version_id.clone()).or_default().push(rule);
    }

    pub async fn put_commission_rule(&self, rule: PricingRule) {
        let mut guard = self.state.write().await;
        guard
            .commission_rules
            .entry(rule.version_id.clone())
            .or_default()
            .push(rule);
    }

    async fn latest_approved(versions: &[MatrixVersion], currency: &str) -> Option<MatrixVersion> {
        versions
            .iter()
            .filter(|v| v.currency == currency && v.state == MatrixVersionState::Approved)
            .max_by_key(|v| v.effective_at)
            .cloned()
    }

    fn find_rule(
        rules: &HashMap<String, Vec<PricingRule>>,
        version_id: &str,
        txn_type: &str,
        currency: &str,
        agent_type: Option<&str>,
    ) -> Option<PricingRule> {
        let candidates = rules.get(version_id)?;
        candidates
            .iter()
            .find(|rule| {
                rule.txn_type == txn_type
                    && rule.currency == currency
                    && rule.agent_type.as_deref() == agent_type
            })
            .cloned()
    }
}

#[async_trait]
impl FeeMatrixStore for InMemoryFeeMatrixStore {
    async fn current_version(&self, currency: &str) -> FeesResult<Option<MatrixVersion>> {
        let guard = self.state.read().await;
        Ok(Self::latest_approved(&guard.fee_versions, currency).await)
    }

    async fn rule_for(
        &self,
        version_id: &str,
        txn_type: &str,
        currency: &str,
        agent_type: Option<&str>,
    ) -> FeesResult<Option<PricingRule>> {
        let guard = self.state.read().await;
        Ok(Self::find_rule(
            &guard.fee_rules,
            version_id,
            txn_type,
            currency,
            agent_type,
        ))
    }
}

/// A second store-shaped accessor for commission lookups, since a
/// single `FeeMatrixStore` trait object cannot expose two differently
/// scoped `current_version`/`rule_for` pairs at once.
#[async_trait]
pub trait CommissionMatrixStore: Send + Sync {
    async fn current_version(&self, currency: &str) -> FeesResult<Option<MatrixVersion>>;
    async fn rule_for(
        &self,
        version_id: &str,
        txn_type: &str,
        currency: &str,
        agent_type: Option<&str>,
    ) -> FeesResult<Option<PricingRule>>;
}

#[async_trait]
impl CommissionMatrixStore for InMemoryFeeMatrixStore {
    async fn current_version(&self, currency: &str) -> FeesResult<Option<MatrixVersion>> {
        let guard = self.state.read().await;
        Ok(Self::latest_approved(&guard.commission_versions, currency).await)
    }

    async fn rule_for(
        &self,
        version_id: &str,
        txn_type: &str,
        currency: &str,
        agent_type: Option<&str>,
    ) -> FeesResult<Option<PricingRule>> {
        let guard = self.state.read().await;
        Ok(Self::find_rule(
            &guard.commission_rules,
            version_id,
            txn_type,
            currency,
            agent_type,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct LineSpec {
    pub account_id: String,
    pub side: PostingSide,
    pub amount_minor: i64,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct FeeResolution {
    pub fee_lines: Vec<LineSpec>,
    pub commission_lines: Vec<LineSpec>,
    pub fee_version_id: Option<String>,
    pub commission_version_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub txn_type: String,
    pub currency: String,
    pub agent_type: Option<String>,
    pub amount_minor: i64,
    pub fee_version_id: Option<String>,
    pub commission_version_id: Option<String>,
    /// Account debited for the fee (typically the sender's wallet).
    pub fee_payer_account_id: Option<String>,
    /// Account credited with the fee revenue.
    pub fee_revenue_account_id: Option<String>,
    /// Account debited to fund the commission (typically the platform's
    /// commission expense or the fee revenue account itself).
    pub commission_funding_account_id: Option<String>,
    /// Account credited with the agent's commission.
    pub commission_payee_account_id: Option<String>,
}

pub struct FeeResolver {
    fees: Arc<dyn FeeMatrixStore>,
    commissions: Arc<dyn CommissionMatrixStore>,
}

impl FeeResolver {
    #[must_use]
    pub fn new(fees: Arc<dyn FeeMatrixStore>, commissions: Arc<dyn CommissionMatrixStore>) -> Self {
        Self { fees, commissions }
    }

    pub async fn resolve(&self, request: ResolveRequest) -> FeesResult<FeeResolution> {
        let mut resolution = FeeResolution::default();

        let fee_version_id = match &request.fee_version_id {
            Some(id) => id.clone(),
            None => {
                match self.fees.current_version(&request.currency).await? {
                    Some(version) => version.id,
                    None => return Ok(resolution),
                }
            }
        };
        resolution.fee_version_id = Some(fee_version_id.clone());

        if let Some(rule) = self
            .fees
            .rule_for(
                &fee_version_id,
                &request.txn_type,
                &request.currency,
                request.agent_type.as_deref(),
            )
            .await?
        {
            let (fee_minor, tax_minor) = rule.apply(request.amount_minor);
            let total_fee = fee_minor + tax_minor;
            if total_fee > 0 {
                let payer = request.fee_payer_account_id.clone().ok_or_else(|| {
                    FeesError::Validation("fee_payer_account_id is required when a fee rule matches".into())
                })?;
                let revenue = request.fee_revenue_account_id.clone().ok_or_else(|| {
                    FeesError::Validation(
                        "fee_revenue_account_id is required when a fee rule matches".into(),
                    )
                })?;
                resolution.fee_lines.push(LineSpec {
                    account_id: payer,
                    side: PostingSide::Debit,
                    amount_minor: total_fee,
                    description: format!("fee for {}", request.txn_type),
                });
                resolution.fee_lines.push(LineSpec {
                    account_id: revenue,
                    side: PostingSide::Credit,
                    amount_minor: total_fee,
                    description: format!("fee revenue for {}", request.txn_type),
                });
            }
        }

        let commission_version_id = match &request.commission_version_id {
            Some(id) => Some(id.clone()),
            None => self
                .commissions
                .current_version(&request.currency)
                .await?
                .map(|version| version.id),
        };
        resolution.commission_version_id = commission_version_id.clone();

        if let (Some(version_id), Some(agent_type)) =
            (commission_version_id, request.agent_type.as_deref())
            && let Some(rule) = self
                .commissions
                .rule_for(&version_id, &request.txn_type, &request.currency, Some(agent_type))
                .await?
        {
            let (commission_minor, _tax_minor) = rule.apply(request.amount_minor);
            if commission_minor > 0 {
                let funding = request.commission_funding_account_id.clone().ok_or_else(|| {
                    FeesError::Validation(
                        "commission_funding_account_id is required when a commission rule matches".into(),
                    )
                })?;
                let payee = request.commission_payee_account_id.clone().ok_or_else(|| {
                    FeesError::Validation(
                        "commission_payee_account_id is required when a commission rule matches".into(),
                    )
                })?;
                resolution.commission_lines.push(LineSpec {
                    account_id: funding,
                    side: PostingSide::Debit,
                    amount_minor: commission_minor,
                    description: format!("commission for {}", request.txn_type),
                });
                resolution.commission_lines.push(LineSpec {
                    account_id: payee,
                    side: PostingSide::Credit,
                    amount_minor: commission_minor,
                    description: format!("commission payout for {}", request.txn_type),
                });
            }
        }

        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_half_even_ties_round_to_even_neighbor() {
        assert_eq!(round_half_even_div(25, 10), 2);
        assert_eq!(round_half_even_div(35, 10), 4);
        assert_eq!(round_half_even_div(15, 10), 2);
        assert_eq!(round_half_even_div(-25, 10), -2);
    }

    #[test]
    fn pricing_rule_applies_flat_plus_percent_with_clamp() {
        let rule = PricingRule {
            id: "rule-1".into(),
            version_id: "v1".into(),
            txn_type: "P2P".into(),
            currency: "BBD".into(),
            agent_type: None,
            flat_minor: 50,
            percent_bp: 100,
            tax_rate_bp: 1500,
            min_minor: 0,
            max_minor: 10_000,
        };
        let (fee_minor, tax_minor) = rule.apply(10_000);
        assert_eq!(fee_minor, 150);
        assert_eq!(tax_minor, 23);
    }

    #[test]
    fn pricing_rule_clamps_to_max() {
        let rule = PricingRule {
            id: "rule-2".into(),
            version_id: "v1".into(),
            txn_type: "B2B".into(),
            currency: "BBD".into(),
            agent_type: None,
            flat_minor: 0,
            percent_bp: 500,
            tax_rate_bp: 0,
            min_minor: 0,
            max_minor: 100,
        };
        let (fee_minor, _) = rule.apply(1_000_000);
        assert_eq!(fee_minor, 100);
    }

    #[tokio::test]
    async fn resolver_splices_fee_and_commission_lines() {
        let store = Arc::new(InMemoryFeeMatrixStore::new());
        store
            .put_fee_version(MatrixVersion {
                id: "fv1".into(),
                currency: "BBD".into(),
                state: MatrixVersionState::Approved,
                effective_at: Utc::now(),
            })
            .await;
        store
            .put_fee_rule(PricingRule {
                id: "f-rule".into(),
                version_id: "fv1".into(),
                txn_type: "P2P".into(),
                currency: "BBD".into(),
                agent_type: None,
                flat_minor: 50,
                percent_bp: 100,
                tax_rate_bp: 0,
                min_minor: 0,
                max_minor: 10_000,
            })
            .await;
        store
            .put_commission_version(MatrixVersion {
                id: "cv1".into(),
                currency: "BBD".into(),
                state: MatrixVersionState::Approved,
                effective_at: Utc::now(),
            })
            .await;
        store
            .put_commission_rule(PricingRule {
                id: "c-rule".into(),
                version_id: "cv1".into(),
                txn_type: "P2P".into(),
                currency: "BBD".into(),
                agent_type: Some("AGENT".into()),
                flat_minor: 0,
                percent_bp: 50,
                tax_rate_bp: 0,
                min_minor: 0,
                max_minor: 10_000,
            })
            .await;

        let resolver = FeeResolver::new(store.clone(), store);
        let resolution = resolver
            .resolve(ResolveRequest {
                txn_type: "P2P".into(),
                currency: "BBD".into(),
                agent_type: Some("AGENT".into()),
                amount_minor: 10_000,
                fee_version_id: None,
                commission_version_id: None,
                fee_payer_account_id: Some("wallet-alice".into()),
                fee_revenue_account_id: Some("fee-revenue".into()),
                commission_funding_account_id: Some("fee-revenue".into()),
                commission_payee_account_id: Some("commission-agent".into()),
            })
            .await
            .expect("resolve");

        assert_eq!(resolution.fee_lines.len(), 2);
        assert_eq!(resolution.fee_lines[0].amount_minor, 150);
        assert_eq!(resolution.commission_lines.len(), 2);
        assert_eq!(resolution.commission_lines[0].amount_minor, 50);
        assert_eq!(resolution.fee_version_id, Some("fv1".into()));
        assert_eq!(resolution.commission_version_id, Some("cv1".into()));
    }

    #[tokio::test]
    async fn resolver_returns_empty_when_no_version_effective() {
        let store = Arc::new(InMemoryFeeMatrixStore::new());
        let resolver = FeeResolver::new(store.clone(), store);
        let resolution = resolver
            .resolve(ResolveRequest {
                txn_type: "P2P".into(),
                currency: "BBD".into(),
                agent_type: None,
                amount_minor: 1_000,
                fee_version_id: None,
                commission_version_id: None,
                fee_payer_account_id: None,
                fee_revenue_account_id: None,
                commission_funding_account_id: None,
                commission_payee_account_id: None,
            })
            .await
            .expect("resolve");
        assert!(resolution.fee_lines.is_empty());
        assert!(resolution.commission_lines.is_empty());
    }
}
