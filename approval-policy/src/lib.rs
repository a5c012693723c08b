#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ApprovalResult<T> = Result<T, ApprovalError>;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not authorized: {0}")]
    Auth(String),
    #[error("request is already in a terminal state")]
    Finalized,
    #[error("no approval policy matches type {0}")]
    NoPolicy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyState {
    Draft,
    Active,
    Inactive,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
    Matches,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

impl PolicyCondition {
    /// Whitelisted dotted-path access into `payload`; never evaluates
    /// arbitrary expressions, only the operators in [`ConditionOperator`].
    #[must_use]
    pub fn evaluate(&self, payload: &serde_json::Value) -> bool {
        let Some(actual) = resolve_path(payload, &self.field) else {
            return false;
        };
        match self.operator {
            ConditionOperator::Eq => actual == &self.value,
            ConditionOperator::Neq => actual != &self.value,
            ConditionOperator::Gt => compare_numeric(actual, &self.value).is_some_and(|o| o.is_gt()),
            ConditionOperator::Gte => compare_numeric(actual, &self.value).is_some_and(|o| o.is_ge()),
            ConditionOperator::Lt => compare_numeric(actual, &self.value).is_some_and(|o| o.is_lt()),
            ConditionOperator::Lte => compare_numeric(actual, &self.value).is_some_and(|o| o.is_le()),
            ConditionOperator::In => self
                .value
                .as_array()
                .is_some_and(|values| values.iter().any(|candidate| candidate == actual)),
            ConditionOperator::NotIn => self
                .value
                .as_array()
                .is_none_or(|values| !values.iter().any(|candidate| candidate == actual)),
            ConditionOperator::Between => {
                let Some(bounds) = self.value.as_array() else {
                    return false;
                };
                let (Some(low), Some(high)) = (bounds.first(), bounds.get(1)) else {
                    return false;
                };
                compare_numeric(actual, low).is_some_and(|o| o.is_ge())
                    && compare_numeric(actual, high).is_some_and(|o| o.is_le())
            }
            ConditionOperator::Matches => match (actual.as_str(), self.value.as_str()) {
                (Some(text), Some(pattern)) => glob_match(pattern, text),
                _ => false,
            },
        }
    }
}

fn resolve_path<'a>(payload: &'a serde_json::Value, field: &str) -> Option<&'a serde_json::Value> {
    field
        .split('.')
        .try_fold(payload, |current, segment| current.get(segment))
}

fn compare_numeric(actual: &serde_json::Value, target: &serde_json::Value) -> Option<std::cmp::Ordering> {
    let actual = actual.as_f64()?;
    let target = target.as_f64()?;
    actual.partial_cmp(&target)
}

/// `*` matches any run of characters; every other character must match
/// literally. Intentionally not a general regular-expression engine.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn recurse(pattern: &[u8], text: &[u8]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some(b'*') => {
                recurse(&pattern[1..], text)
                    || (!text.is_empty() && recurse(pattern, &text[1..]))
            }
            Some(&byte) => text.first() == Some(&byte) && recurse(&pattern[1..], &text[1..]),
        }
    }
    recurse(pattern.as_bytes(), text.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStage {
    pub stage_no: u32,
    pub min_approvals: u32,
    pub roles: Vec<String>,
    pub actor_ids: Vec<String>,
    pub exclude_maker: bool,
    pub exclude_previous_approvers: bool,
    pub timeout_minutes: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingType {
    ApprovalType,
    Route,
    Role,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub binding_type: BindingType,
    pub binding_value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub id: String,
    pub name: String,
    pub approval_type: Option<String>,
    pub priority: i32,
    pub version: i32,
    pub state: PolicyState,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub expiry_minutes: Option<i64>,
    pub escalation_minutes: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
    pub stages: Vec<PolicyStage>,
    #[serde(default)]
    pub bindings: Vec<PolicyBinding>,
}

impl ApprovalPolicy {
    fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.state == PolicyState::Active
            && self.valid_from.is_none_or(|from| from <= now)
            && self.valid_to.is_none_or(|to| to >= now)
    }

    fn binding_matches(&self, approval_type: &str, payload: &serde_json::Value) -> bool {
        if self.approval_type.as_deref() == Some(approval_type) {
            return true;
        }
        self.bindings.iter().any(|binding| match binding.binding_type {
            BindingType::ApprovalType => {
                binding.binding_value.as_str() == Some(approval_type)
            }
            BindingType::Route => payload
                .get("route")
                .is_some_and(|route| route == &binding.binding_value),
            BindingType::Role => payload
                .get("role")
                .is_some_and(|role| role == &binding.binding_value),
            BindingType::Custom => true,
        })
    }

    fn conditions_match(&self, payload: &serde_json::Value) -> bool {
        self.conditions.iter().all(|condition| condition.evaluate(payload))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Pending,
    Approved,
    Rejected,
    Expired,
    Escalated,
}

impl RequestState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Approved | RequestState::Rejected | RequestState::Expired)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub request_type: String,
    pub payload: serde_json::Value,
    pub maker_staff_id: String,
    pub policy_id: Option<String>,
    pub current_stage: u32,
    pub total_stages: u32,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionKind {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStageDecision {
    pub request_id: String,
    pub policy_id: String,
    pub stage_no: u32,
    pub decision: DecisionKind,
    pub decider_id: String,
    pub decider_role: String,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationState {
    Active,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDelegation {
    pub id: String,
    pub delegator_id: String,
    pub delegate_id: String,
    pub delegated_role: String,
    pub approval_type: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub state: DelegationState,
}

impl ApprovalDelegation {
    fn covers(&self, delegate_id: &str, approval_type: &str, now: DateTime<Utc>) -> bool {
        self.state == DelegationState::Active
            && self.delegate_id == delegate_id
            && self.approval_type.as_deref().is_none_or(|t| t == approval_type)
            && self.valid_from <= now
            && now <= self.valid_to
    }
}

#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Invoked exactly once per request reaching `APPROVED`. Handlers
    /// must be idempotent against `request.id` since a retried sweep or
    /// a replayed event could call them again.
    async fn handle(&self, request: &ApprovalRequest) -> ApprovalResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionInput {
    pub decider_id: String,
    pub decider_role: String,
    pub decision: DecisionKind,
    pub reason: Option<String>,
}

#[async_trait]
pub trait ApprovalsService: Send + Sync {
    async fn register_policy(&self, policy: ApprovalPolicy) -> ApprovalResult<()>;
    async fn set_auto_policy(&self, request_type: String, policy_id: String);
    async fn register_delegation(&self, delegation: ApprovalDelegation) -> ApprovalResult<()>;
    async fn register_handler(&self, request_type: String, handler: Arc<dyn ApprovalHandler>);
    async fn submit(
        &self,
        request_type: String,
        payload: serde_json::Value,
        maker_staff_id: String,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalRequest>;
    async fn decide(
        &self,
        request_id: &str,
        input: DecisionInput,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalRequest>;
    async fn get(&self, request_id: &str) -> ApprovalResult<ApprovalRequest>;
    async fn stage_decisions(&self, request_id: &str) -> ApprovalResult<Vec<ApprovalStageDecision>>;
    async fn sweep_expired(&self, now: DateTime<Utc>) -> ApprovalResult<Vec<ApprovalRequest>>;
}

#[derive(Default)]
struct State {
    policies: Vec<ApprovalPolicy>,
    auto_policies: HashMap<String, String>,
    requests: HashMap<String, ApprovalRequest>,
    decisions: HashMap<String, Vec<ApprovalStageDecision>>,
    delegations: Vec<ApprovalDelegation>,
}

pub struct InMemoryApprovalsService {
    state: RwLock<State>,
    handlers: RwLock<HashMap<String, Arc<dyn ApprovalHandler>>>,
}

impl Default for InMemoryApprovalsService {
    fn default() -> Self {
        Self {
            state: RwLock::new(State::default()),
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

impl InMemoryApprovalsService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn match_policy<'a>(
        policies: &'a [ApprovalPolicy],
        request_type: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Option<&'a ApprovalPolicy> {
        let mut candidates: Vec<&ApprovalPolicy> = policies
            .iter()
            .filter(|policy| policy.is_effective(now))
            .filter(|policy| policy.binding_matches(request_type, payload))
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(b.version.cmp(&a.version)));
        candidates
            .into_iter()
            .find(|policy| policy.conditions_match(payload))
    }

    fn effective_roles(
        delegations: &[ApprovalDelegation],
        decider_id: &str,
        decider_role: &str,
        request_type: &str,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut roles = vec![decider_role.to_string()];
        roles.extend(
            delegations
                .iter()
                .filter(|delegation| delegation.covers(decider_id, request_type, now))
                .map(|delegation| delegation.delegated_role.clone()),
        );
        roles
    }
}

#[async_trait]
impl ApprovalsService for InMemoryApprovalsService {
    async fn register_policy(&self, policy: ApprovalPolicy) -> ApprovalResult<()> {
        if policy.stages.is_empty() {
            return Err(ApprovalError::Validation(
                "policy must define at least one stage".into(),
            ));
        }
        let mut guard = self.state.write().await;
        guard.policies.push(policy);
        Ok(())
    }

    async fn set_auto_policy(&self, request_type: String, policy_id: String) {
        let mut guard = self.state.write().await;
        guard.auto_policies.insert(request_type, policy_id);
    }

    async fn register_delegation(&self, delegation: ApprovalDelegation) -> ApprovalResult<()> {
        if delegation.valid_to < delegation.valid_from {
            return Err(ApprovalError::Validation(
                "delegation valid_to must not precede valid_from".into(),
            ));
        }
        let mut guard = self.state.write().await;
        guard.delegations.push(delegation);
        Ok(())
    }

    async fn register_handler(&self, request_type: String, handler: Arc<dyn ApprovalHandler>) {
        let mut guard = self.handlers.write().await;
        guard.insert(request_type, handler);
    }

    async fn submit(
        &self,
        request_type: String,
        payload: serde_json::Value,
        maker_staff_id: String,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalRequest> {
        let mut guard = self.state.write().await;

        let matched = Self::match_policy(&guard.policies, &request_type, &payload, now)
            .cloned()
            .or_else(|| {
                let auto_id = guard.auto_policies.get(&request_type)?;
                guard.policies.iter().find(|p| &p.id == auto_id).cloned()
            })
            .ok_or_else(|| ApprovalError::NoPolicy(request_type.clone()))?;

        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            request_type,
            payload,
            maker_staff_id,
            policy_id: Some(matched.id.clone()),
            current_stage: 0,
            total_stages: matched.stages.len() as u32,
            state: RequestState::Pending,
            created_at: now,
            decided_at: None,
        };
        guard.requests.insert(request.id.clone(), request.clone());
        guard.decisions.insert(request.id.clone(), Vec::new());
        Ok(request)
    }

    async fn decide(
        &self,
        request_id: &str,
        input: DecisionInput,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalRequest> {
        let mut guard = self.state.write().await;

        let policy_id = guard
            .requests
            .get(request_id)
            .ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))?
            .policy_id
            .clone()
            .ok_or_else(|| ApprovalError::Validation("request has no bound policy".into()))?;
        let policy = guard
            .policies
            .iter()
            .find(|p| p.id == policy_id)
            .cloned()
            .ok_or_else(|| ApprovalError::NotFound(format!("policy {policy_id}")))?;

        let request = guard
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))?;
        if request.state.is_terminal() {
            return Err(ApprovalError::Finalized);
        }

        let stage = policy
            .stages
            .get(request.current_stage as usize)
            .ok_or_else(|| ApprovalError::Validation("missing approval stage".into()))?
            .clone();

        if stage.exclude_maker && input.decider_id == request.maker_staff_id {
            return Err(ApprovalError::Auth(
                "maker may not approve their own request".into(),
            ));
        }

        let prior_for_stage: Vec<&ApprovalStageDecision> = guard
            .decisions
            .get(request_id)
            .into_iter()
            .flatten()
            .filter(|d| d.stage_no == stage.stage_no)
            .collect();

        if stage.exclude_previous_approvers
            && prior_for_stage.iter().any(|d| d.decider_id == input.decider_id)
        {
            return Err(ApprovalError::Auth(
                "decider has already decided at this stage".into(),
            ));
        }

        let effective_roles = Self::effective_roles(
            &guard.delegations,
            &input.decider_id,
            &input.decider_role,
            &request.request_type,
            now,
        );
        let authorized = stage.actor_ids.contains(&input.decider_id)
            || effective_roles.iter().any(|role| stage.roles.contains(role));
        if !authorized {
            return Err(ApprovalError::Auth(format!(
                "{} is not authorized to decide stage {}",
                input.decider_id, stage.stage_no
            )));
        }

        let decision_record = ApprovalStageDecision {
            request_id: request_id.to_string(),
            policy_id: policy.id.clone(),
            stage_no: stage.stage_no,
            decision: input.decision,
            decider_id: input.decider_id,
            decider_role: input.decider_role,
            reason: input.reason,
            decided_at: now,
        };
        guard
            .decisions
            .get_mut(request_id)
            .ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))?
            .push(decision_record.clone());

        let approvals_for_stage = guard
            .decisions
            .get(request_id)
            .into_iter()
            .flatten()
            .filter(|d| d.stage_no == stage.stage_no && d.decision == DecisionKind::Approve)
            .count() as u32;

        let updated = guard
            .requests
            .get_mut(request_id)
            .ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))?;

        match decision_record.decision {
            DecisionKind::Reject => {
                updated.state = RequestState::Rejected;
                updated.decided_at = Some(now);
            }
            DecisionKind::Approve if approvals_for_stage >= stage.min_approvals => {
                if updated.current_stage + 1 >= updated.total_stages {
                    updated.state = RequestState::Approved;
                    updated.decided_at = Some(now);
                } else {
                    updated.current_stage += 1;
                    updated.state = RequestState::Pending;
                }
            }
            DecisionKind::Approve => {}
        }
        let result = updated.clone();
        drop(guard);

        if result.state == RequestState::Approved {
            let handlers = self.handlers.read().await;
            if let Some(handler) = handlers.get(&result.request_type) {
                handler.handle(&result).await?;
            }
        }

        Ok(result)
    }

    async fn get(&self, request_id: &str) -> ApprovalResult<ApprovalRequest> {
        let guard = self.state.read().await;
        guard
            .requests
            .get(request_id)
            .cloned()
            .ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))
    }

    async fn stage_decisions(&self, request_id: &str) -> ApprovalResult<Vec<ApprovalStageDecision>> {
        let guard = self.state.read().await;
        guard
            .decisions
            .get(request_id)
            .cloned()
            .ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> ApprovalResult<Vec<ApprovalRequest>> {
        let mut guard = self.state.write().await;
        let mut changed = Vec::new();
        let policy_by_id: HashMap<String, ApprovalPolicy> = guard
            .policies
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();

        for request in guard.requests.values_mut() {
            if request.state.is_terminal() {
                continue;
            }
            let Some(policy) = request.policy_id.as_ref().and_then(|id| policy_by_id.get(id)) else {
                continue;
            };
            let age_minutes = (now - request.created_at).num_minutes();
            if let Some(expiry) = policy.expiry_minutes
                && age_minutes >= expiry
            {
                request.state = RequestState::Expired;
                request.decided_at = Some(now);
                changed.push(request.clone());
                continue;
            }
            if request.state == RequestState::Pending
                && let Some(escalation) = policy.escalation_minutes
                && age_minutes >= escalation
            {
                request.state = RequestState::Escalated;
                changed.push(request.clone());
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn two_stage_policy() -> ApprovalPolicy {
        ApprovalPolicy {
            id: "policy-1".into(),
            name: "Large payout".into(),
            approval_type: Some("LARGE_PAYOUT".into()),
            priority: 10,
            version: 1,
            state: PolicyState::Active,
            valid_from: None,
            valid_to: None,
            expiry_minutes: Some(1440),
            escalation_minutes: Some(60),
            conditions: vec![PolicyCondition {
                field: "amount".into(),
                operator: ConditionOperator::Gt,
                value: serde_json::json!(10_000),
            }],
            stages: vec![
                PolicyStage {
                    stage_no: 0,
                    min_approvals: 1,
                    roles: vec!["MANAGER".into()],
                    actor_ids: vec![],
                    exclude_maker: true,
                    exclude_previous_approvers: true,
                    timeout_minutes: None,
                },
                PolicyStage {
                    stage_no: 1,
                    min_approvals: 1,
                    roles: vec!["DIRECTOR".into()],
                    actor_ids: vec![],
                    exclude_maker: true,
                    exclude_previous_approvers: true,
                    timeout_minutes: None,
                },
            ],
            bindings: vec![],
        }
    }

    #[tokio::test]
    async fn scenario_e_two_stage_approval_reaches_approved() {
        let service = InMemoryApprovalsService::new();
        service.register_policy(two_stage_policy()).await.expect("register");
        let now = Utc::now();

        let request = service
            .submit(
                "LARGE_PAYOUT".into(),
                serde_json::json!({"amount": 50_000}),
                "maker-1".into(),
                now,
            )
            .await
            .expect("submit");
        assert_eq!(request.total_stages, 2);
        assert_eq!(request.current_stage, 0);

        let after_manager = service
            .decide(
                &request.id,
                DecisionInput {
                    decider_id: "manager-1".into(),
                    decider_role: "MANAGER".into(),
                    decision: DecisionKind::Approve,
                    reason: None,
                },
                now,
            )
            .await
            .expect("manager approves");
        assert_eq!(after_manager.state, RequestState::Pending);
        assert_eq!(after_manager.current_stage, 1);

        let after_director = service
            .decide(
                &request.id,
                DecisionInput {
                    decider_id: "director-1".into(),
                    decider_role: "DIRECTOR".into(),
                    decision: DecisionKind::Approve,
                    reason: None,
                },
                now,
            )
            .await
            .expect("director approves");
        assert_eq!(after_director.state, RequestState::Approved);
    }

    #[tokio::test]
    async fn maker_cannot_approve_own_request() {
        let service = InMemoryApprovalsService::new();
        service.register_policy(two_stage_policy()).await.expect("register");
        let now = Utc::now();
        let request = service
            .submit(
                "LARGE_PAYOUT".into(),
                serde_json::json!({"amount": 50_000}),
                "manager-1".into(),
                now,
            )
            .await
            .expect("submit");

        let err = service
            .decide(
                &request.id,
                DecisionInput {
                    decider_id: "manager-1".into(),
                    decider_role: "MANAGER".into(),
                    decision: DecisionKind::Approve,
                    reason: None,
                },
                now,
            )
            .await
            .expect_err("maker cannot approve");
        assert!(matches!(err, ApprovalError::Auth(_)));
    }

    #[tokio::test]
    async fn reject_terminates_request_at_any_stage() {
        let service = InMemoryApprovalsService::new();
        service.register_policy(two_stage_policy()).await.expect("register");
        let now = Utc::now();
        let request = service
            .submit(
                "LARGE_PAYOUT".into(),
                serde_json::json!({"amount": 50_000}),
                "maker-1".into(),
                now,
            )
            .await
            .expect("submit");

        let rejected = service
            .decide(
                &request.id,
                DecisionInput {
                    decider_id: "manager-1".into(),
                    decider_role: "MANAGER".into(),
                    decision: DecisionKind::Reject,
                    reason: Some("insufficient documentation".into()),
                },
                now,
            )
            .await
            .expect("reject");
        assert_eq!(rejected.state, RequestState::Rejected);

        let err = service
            .decide(
                &request.id,
                DecisionInput {
                    decider_id: "director-1".into(),
                    decider_role: "DIRECTOR".into(),
                    decision: DecisionKind::Approve,
                    reason: None,
                },
                now,
            )
            .await
            .expect_err("finalized requests reject further decisions");
        assert!(matches!(err, ApprovalError::Finalized));
    }

    #[tokio::test]
    async fn exclude_previous_approvers_blocks_duplicate_role_member() {
        let service = InMemoryApprovalsService::new();
        let mut policy = two_stage_policy();
        policy.stages[0].min_approvals = 2;
        policy.stages[0].roles = vec!["ROLE_A".into()];
        policy.stages[0].exclude_maker = true;
        policy.stages[0].exclude_previous_approvers = true;
        service.register_policy(policy).await.expect("register");
        let now = Utc::now();

        let request = service
            .submit(
                "LARGE_PAYOUT".into(),
                serde_json::json!({"amount": 50_000}),
                "maker-role-a".into(),
                now,
            )
            .await
            .expect("submit");

        let after_first = service
            .decide(
                &request.id,
                DecisionInput {
                    decider_id: "role-a-1".into(),
                    decider_role: "ROLE_A".into(),
                    decision: DecisionKind::Approve,
                    reason: None,
                },
                now,
            )
            .await
            .expect("first role A approval");
        assert_eq!(after_first.state, RequestState::Pending);
        assert_eq!(after_first.current_stage, 0);

        let err = service
            .decide(
                &request.id,
                DecisionInput {
                    decider_id: "role-a-1".into(),
                    decider_role: "ROLE_A".into(),
                    decision: DecisionKind::Approve,
                    reason: None,
                },
                now,
            )
            .await
            .expect_err("same approver cannot approve twice at the same stage");
        assert!(matches!(err, ApprovalError::Auth(_)));

        let after_second = service
            .decide(
                &request.id,
                DecisionInput {
                    decider_id: "role-a-2".into(),
                    decider_role: "ROLE_A".into(),
                    decision: DecisionKind::Approve,
                    reason: None,
                },
                now,
            )
            .await
            .expect("distinct second role A approver advances stage");
        assert_eq!(after_second.current_stage, 1);
    }

    #[tokio::test]
    async fn delegate_may_approve_only_within_window() {
        let service = InMemoryApprovalsService::new();
        service.register_policy(two_stage_policy()).await.expect("register");
        let now = Utc::now();
        let request = service
            .submit(
                "LARGE_PAYOUT".into(),
                serde_json::json!({"amount": 50_000}),
                "maker-1".into(),
                now,
            )
            .await
            .expect("submit");

        service
            .register_delegation(ApprovalDelegation {
                id: "delegation-1".into(),
                delegator_id: "manager-1".into(),
                delegate_id: "stand-in-1".into(),
                delegated_role: "MANAGER".into(),
                approval_type: Some("LARGE_PAYOUT".into()),
                valid_from: now - chrono::Duration::hours(1),
                valid_to: now + chrono::Duration::hours(1),
                state: DelegationState::Active,
            })
            .await
            .expect("register delegation");

        let approved = service
            .decide(
                &request.id,
                DecisionInput {
                    decider_id: "stand-in-1".into(),
                    decider_role: "STAFF".into(),
                    decision: DecisionKind::Approve,
                    reason: None,
                },
                now,
            )
            .await
            .expect("delegate may approve within window");
        assert_eq!(approved.current_stage, 1);

        let outside_window = now + chrono::Duration::hours(5);
        let request_b = service
            .submit(
                "LARGE_PAYOUT".into(),
                serde_json::json!({"amount": 20_000}),
                "maker-2".into(),
                outside_window,
            )
            .await
            .expect("submit second");
        let err = service
            .decide(
                &request_b.id,
                DecisionInput {
                    decider_id: "stand-in-1".into(),
                    decider_role: "STAFF".into(),
                    decision: DecisionKind::Approve,
                    reason: None,
                },
                outside_window,
            )
            .await
            .expect_err("delegation window has elapsed");
        assert!(matches!(err, ApprovalError::Auth(_)));
    }

    #[tokio::test]
    async fn sweep_expires_and_escalates_stale_requests() {
        let service = InMemoryApprovalsService::new();
        service.register_policy(two_stage_policy()).await.expect("register");
        let created_at = Utc::now() - chrono::Duration::minutes(90);
        let request = service
            .submit(
                "LARGE_PAYOUT".into(),
                serde_json::json!({"amount": 50_000}),
                "maker-1".into(),
                created_at,
            )
            .await
            .expect("submit");

        let now = created_at + chrono::Duration::minutes(70);
        let changed = service.sweep_expired(now).await.expect("sweep");
        assert_eq!(changed.len(), 1);
        let escalated = service.get(&request.id).await.expect("get");
        assert_eq!(escalated.state, RequestState::Escalated);
    }

    #[tokio::test]
    async fn no_matching_policy_is_rejected() {
        let service = InMemoryApprovalsService::new();
        let err = service
            .submit(
                "UNKNOWN_TYPE".into(),
                serde_json::json!({}),
                "maker-1".into(),
                Utc::now(),
            )
            .await
            .expect_err("no policy registered");
        assert!(matches!(err, ApprovalError::NoPolicy(_)));
    }

    #[test]
    fn condition_operators_evaluate_against_payload() {
        let payload = serde_json::json!({"amount": 15_000, "region": "east", "tags": ["vip"]});
        assert!(PolicyCondition {
            field: "amount".into(),
            operator: ConditionOperator::Gt,
            value: serde_json::json!(10_000),
        }
        .evaluate(&payload));
        assert!(PolicyCondition {
            field: "region".into(),
            operator: ConditionOperator::In,
            value: serde_json::json!(["east", "west"]),
        }
        .evaluate(&payload));
        assert!(PolicyCondition {
            field: "amount".into(),
            operator: ConditionOperator::Between,
            value: serde_json::json!([10_000, 20_000]),
        }
        .evaluate(&payload));
        assert!(!PolicyCondition {
            field: "missing.path".into(),
            operator: ConditionOperator::Eq,
            value: serde_json::json!(1),
        }
        .evaluate(&payload));
    }
}
