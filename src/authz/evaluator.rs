use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use super::counter::{CounterKey, CounterStatus, CounterStore};
use super::restriction::{
    ActionRestriction, ConditionConfig, FieldRestrictionConfig, RestrictionConfig, RestrictionKind,
    RestrictionRegistry,
};
use crate::models::rbac::{Action, Resource, Role, UserId};

pub const RATE_LIMIT_EXCEEDED: &str = "已超過速率限制";
pub const QUOTA_LIMIT_EXCEEDED: &str = "已超過配額限制";
pub const FIELD_WRITE_DENIED: &str = "無權修改";
pub const INVALID_RESOURCE_DATA: &str = "資源數據無效";
pub const MUST_BE_EMPTY: &str = "必須為空";

/// Outcome of a restriction check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionCheck {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Uses left in the most recently evaluated rate/quota window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
}

impl RestrictionCheck {
    pub fn allow(remaining: Option<u32>) -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining,
        }
    }

    pub fn deny(reason: impl Into<String>, remaining: Option<u32>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            remaining,
        }
    }
}

/// Evaluates dynamic restrictions layered on top of coarse RBAC.
///
/// Evaluation order per request:
/// 1. no rules for the triple -> allow (RBAC upstream already decided)
/// 2. rate limit, then quota: deny at the limit without consuming an attempt,
///    otherwise count the attempt and keep going
/// 3. field restriction (UPDATE only): deny writes to protected fields
/// 4. condition restriction (DELETE only): deny unless listed fields are empty
///
/// A rate/quota rule that passes keeps its increment even when a later rule
/// denies the request. All counters for one request move under one lock.
#[derive(Debug)]
pub struct ActionRestrictionEngine {
    registry: RestrictionRegistry,
    counters: Arc<CounterStore>,
}

impl ActionRestrictionEngine {
    pub fn new(registry: RestrictionRegistry, counters: Arc<CounterStore>) -> Self {
        Self { registry, counters }
    }

    pub fn check_restrictions(
        &self,
        role: Role,
        resource: Resource,
        action: Action,
        user_id: UserId,
        resource_data: Option<&Value>,
        update_data: Option<&Map<String, Value>>,
    ) -> RestrictionCheck {
        let rules = self.registry.get(role, resource, action);
        if rules.is_empty() {
            return RestrictionCheck::allow(None);
        }

        self.counters.transaction(|tx| {
            let mut remaining = None;

            for rule in rules {
                if let Some((limit, window)) = rule.config.counter_limit() {
                    let key = CounterKey {
                        role,
                        resource,
                        action,
                        kind: rule.kind(),
                        user_id,
                    };
                    let Some(count) = tx.increment(key, window, limit) else {
                        tracing::debug!(
                            %role, %resource, %action, user_id,
                            kind = %rule.kind(), limit,
                            "restriction limit reached"
                        );
                        return RestrictionCheck::deny(exceeded_reason(&rule.config, limit), Some(0));
                    };
                    tracing::debug!(
                        %role, %resource, %action, user_id,
                        kind = %rule.kind(), count, limit,
                        "counter incremented"
                    );
                    remaining = Some(limit - count);
                    continue;
                }

                let violation = match &rule.config {
                    RestrictionConfig::FieldRestriction(cfg) if action == Action::Update => {
                        field_write_violation(cfg, update_data)
                    }
                    RestrictionConfig::ConditionRestriction(cfg) if action == Action::Delete => {
                        precondition_violation(cfg, resource_data)
                    }
                    _ => None,
                };

                if let Some(reason) = violation {
                    tracing::debug!(
                        %role, %resource, %action, user_id,
                        kind = %rule.kind(), reason = %reason,
                        "restriction denied"
                    );
                    return RestrictionCheck::deny(reason, None);
                }
            }

            tracing::trace!(%role, %resource, %action, user_id, ?remaining, "restrictions passed");
            RestrictionCheck::allow(remaining)
        })
    }

    pub fn get_restrictions(&self, role: Role, resource: Resource, action: Action) -> &[ActionRestriction] {
        self.registry.get(role, resource, action)
    }

    pub fn has_restrictions(&self, role: Role, resource: Resource, action: Action) -> bool {
        self.registry.has(role, resource, action)
    }

    pub fn get_all_restrictions(&self) -> &[ActionRestriction] {
        self.registry.all()
    }

    pub fn get_resource_restrictions(&self, resource: Resource) -> Vec<&ActionRestriction> {
        self.registry.for_resource(resource)
    }

    pub fn get_role_restrictions(&self, role: Role) -> Vec<&ActionRestriction> {
        self.registry.for_role(role)
    }

    /// `None` when no counted rule of `kind` exists for the triple, or when
    /// the user never hit it.
    pub fn get_counter_status(
        &self,
        role: Role,
        resource: Resource,
        action: Action,
        user_id: UserId,
        kind: RestrictionKind,
    ) -> Option<CounterStatus> {
        let rule = self.registry.find(role, resource, action, kind)?;
        let (limit, _) = rule.config.counter_limit()?;
        let key = CounterKey {
            role,
            resource,
            action,
            kind,
            user_id,
        };
        self.counters.status(&key, limit)
    }

    /// Drops every counter. This is the only way counter memory is released.
    pub fn clear_counters(&self) {
        self.counters.clear();
    }

    pub fn registry(&self) -> &RestrictionRegistry {
        &self.registry
    }
}

fn exceeded_reason(config: &RestrictionConfig, limit: u32) -> String {
    match config {
        RestrictionConfig::RateLimit(cfg) => {
            format!("{RATE_LIMIT_EXCEEDED}：每 {} 秒最多 {limit} 次", cfg.window_seconds)
        }
        _ => format!("{QUOTA_LIMIT_EXCEEDED}：每月最多 {limit} 次"),
    }
}

fn field_write_violation(
    cfg: &FieldRestrictionConfig,
    update_data: Option<&Map<String, Value>>,
) -> Option<String> {
    let update_data = update_data?;
    let offending: Vec<&str> = update_data
        .keys()
        .filter(|field| cfg.restricted_fields.contains(field.as_str()))
        .map(String::as_str)
        .collect();

    if offending.is_empty() {
        None
    } else {
        Some(format!("{FIELD_WRITE_DENIED}以下欄位：{}", offending.join(", ")))
    }
}

fn precondition_violation(cfg: &ConditionConfig, resource_data: Option<&Value>) -> Option<String> {
    let Some(Value::Object(entity)) = resource_data else {
        return Some(INVALID_RESOURCE_DATA.to_string());
    };

    let occupied: Vec<&str> = cfg
        .required_empty_fields
        .iter()
        .filter(|field| !is_empty_value(entity.get(field.as_str())))
        .map(String::as_str)
        .collect();

    if occupied.is_empty() {
        None
    } else {
        Some(format!("以下欄位{MUST_BE_EMPTY}才能刪除：{}", occupied.join(", ")))
    }
}

/// Missing, null, "" and [] count as empty.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::restriction::RateLimitConfig;
    use serde_json::json;

    fn engine() -> ActionRestrictionEngine {
        ActionRestrictionEngine::new(RestrictionRegistry::builtin(), Arc::new(CounterStore::new()))
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn unconfigured_triple_is_allowed_without_remaining() {
        let engine = engine();
        let check = engine.check_restrictions(Role::Admin, Resource::Customers, Action::Delete, 1, None, None);
        assert_eq!(check, RestrictionCheck::allow(None));
    }

    #[test]
    fn emptiness_rules() {
        assert!(is_empty_value(None));
        assert!(is_empty_value(Some(&Value::Null)));
        assert!(is_empty_value(Some(&json!(""))));
        assert!(is_empty_value(Some(&json!([]))));
        assert!(!is_empty_value(Some(&json!([{"id": 1}]))));
        assert!(!is_empty_value(Some(&json!("x"))));
        assert!(!is_empty_value(Some(&json!(0))));
        assert!(!is_empty_value(Some(&json!({}))));
    }

    #[test]
    fn field_restriction_only_applies_to_update() {
        let engine = engine();
        let update = object(json!({"creditScore": 800}));

        let denied = engine.check_restrictions(
            Role::SalesRep, Resource::Customers, Action::Update, 1, None, Some(&update),
        );
        assert!(!denied.allowed);
        let reason = denied.reason.unwrap();
        assert!(reason.contains(FIELD_WRITE_DENIED));
        assert!(reason.contains("creditScore"));

        // CREATE carries a rate limit only; the payload is not inspected
        let create = engine.check_restrictions(
            Role::SalesRep, Resource::Customers, Action::Create, 1, None, Some(&update),
        );
        assert!(create.allowed);
    }

    fn viewer_report_rules(action: Action) -> Vec<ActionRestriction> {
        vec![
            ActionRestriction::new(
                Role::Viewer,
                Resource::Reports,
                action,
                RestrictionConfig::RateLimit(RateLimitConfig {
                    limit: 5,
                    window_seconds: 60,
                }),
            ),
            ActionRestriction::new(
                Role::Viewer,
                Resource::Reports,
                action,
                RestrictionConfig::FieldRestriction(FieldRestrictionConfig {
                    restricted_fields: ["owner".to_string()].into_iter().collect(),
                }),
            ),
            ActionRestriction::new(
                Role::Viewer,
                Resource::Reports,
                action,
                RestrictionConfig::ConditionRestriction(ConditionConfig {
                    required_empty_fields: ["subscribers".to_string()].into_iter().collect(),
                }),
            ),
        ]
    }

    #[test]
    fn passed_rate_rule_counts_even_when_a_later_rule_denies() {
        let registry = RestrictionRegistry::from_rules(viewer_report_rules(Action::Update)).unwrap();
        let engine = ActionRestrictionEngine::new(registry, Arc::new(CounterStore::new()));

        let bad = object(json!({"owner": 2}));
        let check = engine.check_restrictions(Role::Viewer, Resource::Reports, Action::Update, 9, None, Some(&bad));
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("owner"));

        let status = engine
            .get_counter_status(Role::Viewer, Resource::Reports, Action::Update, 9, RestrictionKind::RateLimit)
            .unwrap();
        assert_eq!(status.count, 1);
        assert_eq!(status.remaining, 4);

        let good = object(json!({"title": "Q3"}));
        let check = engine.check_restrictions(Role::Viewer, Resource::Reports, Action::Update, 9, None, Some(&good));
        assert_eq!(check, RestrictionCheck::allow(Some(3)));
    }

    #[test]
    fn field_and_condition_rules_are_skipped_on_other_actions() {
        let registry = RestrictionRegistry::from_rules(viewer_report_rules(Action::Create)).unwrap();
        let engine = ActionRestrictionEngine::new(registry, Arc::new(CounterStore::new()));

        // protected field in the payload and no resource data: neither rule applies to CREATE
        let update = object(json!({"owner": 2}));
        let check = engine.check_restrictions(Role::Viewer, Resource::Reports, Action::Create, 4, None, Some(&update));
        assert_eq!(check, RestrictionCheck::allow(Some(4)));

        let occupied = json!({"subscribers": [1, 2]});
        let check = engine.check_restrictions(
            Role::Viewer, Resource::Reports, Action::Create, 4, Some(&occupied), Some(&update),
        );
        assert_eq!(check, RestrictionCheck::allow(Some(3)));
    }

    #[test]
    fn status_stays_empty_until_a_counted_rule_passes() {
        let registry = RestrictionRegistry::from_rules(viewer_report_rules(Action::Update)).unwrap();
        let engine = ActionRestrictionEngine::new(registry, Arc::new(CounterStore::new()));

        assert!(engine
            .get_counter_status(Role::Viewer, Resource::Reports, Action::Update, 2, RestrictionKind::RateLimit)
            .is_none());
        engine.check_restrictions(Role::Viewer, Resource::Reports, Action::Update, 2, None, None);
        assert!(engine
            .get_counter_status(Role::Viewer, Resource::Reports, Action::Update, 2, RestrictionKind::RateLimit)
            .is_some());
    }

    #[test]
    fn counter_status_requires_a_counted_rule() {
        let engine = engine();
        assert!(engine
            .get_counter_status(Role::SalesRep, Resource::Customers, Action::Delete, 1, RestrictionKind::ConditionRestriction)
            .is_none());
        assert!(engine
            .get_counter_status(Role::SalesRep, Resource::Customers, Action::Create, 1, RestrictionKind::QuotaLimit)
            .is_none());
    }
}
