//! Restriction rule types and the immutable rule registry.
//!
//! A registry maps `(role, resource, action)` to the rules that further
//! constrain an action the coarse RBAC layer already allowed. It is built
//! once at startup and never mutated, so it can be shared without locking.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::counter::CounterWindow;
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Action, Resource, Role};

/// Kind of restriction. Declaration order is evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestrictionKind {
    RateLimit,
    QuotaLimit,
    FieldRestriction,
    ConditionRestriction,
}

impl RestrictionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestrictionKind::RateLimit => "RATE_LIMIT",
            RestrictionKind::QuotaLimit => "QUOTA_LIMIT",
            RestrictionKind::FieldRestriction => "FIELD_RESTRICTION",
            RestrictionKind::ConditionRestriction => "CONDITION_RESTRICTION",
        }
    }

    /// Whether rules of this kind keep a usage counter.
    pub fn is_counted(&self) -> bool {
        matches!(self, RestrictionKind::RateLimit | RestrictionKind::QuotaLimit)
    }
}

impl std::fmt::Display for RestrictionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPeriod {
    Month,
}

impl std::fmt::Display for QuotaPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaPeriod::Month => f.pad("month"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QuotaConfig {
    pub limit: u32,
    pub period: QuotaPeriod,
}

/// Fields a role may not write on this resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldRestrictionConfig {
    pub restricted_fields: BTreeSet<String>,
}

/// Fields that must be empty on the target entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConditionConfig {
    pub required_empty_fields: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestrictionConfig {
    RateLimit(RateLimitConfig),
    QuotaLimit(QuotaConfig),
    FieldRestriction(FieldRestrictionConfig),
    ConditionRestriction(ConditionConfig),
}

impl RestrictionConfig {
    pub fn kind(&self) -> RestrictionKind {
        match self {
            RestrictionConfig::RateLimit(_) => RestrictionKind::RateLimit,
            RestrictionConfig::QuotaLimit(_) => RestrictionKind::QuotaLimit,
            RestrictionConfig::FieldRestriction(_) => RestrictionKind::FieldRestriction,
            RestrictionConfig::ConditionRestriction(_) => RestrictionKind::ConditionRestriction,
        }
    }

    /// Limit and window for counted kinds, `None` otherwise.
    pub fn counter_limit(&self) -> Option<(u32, CounterWindow)> {
        match self {
            RestrictionConfig::RateLimit(cfg) => {
                Some((cfg.limit, CounterWindow::Seconds(cfg.window_seconds)))
            }
            RestrictionConfig::QuotaLimit(cfg) => match cfg.period {
                QuotaPeriod::Month => Some((cfg.limit, CounterWindow::Months(1))),
            },
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            RestrictionConfig::RateLimit(cfg) => {
                if cfg.limit == 0 {
                    return Err("rate limit must be greater than zero".to_string());
                }
                if cfg.window_seconds == 0 {
                    return Err("rate limit window must be greater than zero".to_string());
                }
            }
            RestrictionConfig::QuotaLimit(cfg) => {
                if cfg.limit == 0 {
                    return Err("quota limit must be greater than zero".to_string());
                }
            }
            RestrictionConfig::FieldRestriction(cfg) => {
                if cfg.restricted_fields.is_empty() {
                    return Err("restrictedFields must not be empty".to_string());
                }
            }
            RestrictionConfig::ConditionRestriction(cfg) => {
                if cfg.required_empty_fields.is_empty() {
                    return Err("requiredEmptyFields must not be empty".to_string());
                }
            }
        }
        Ok(())
    }
}

/// One configured rule attached to a `(role, resource, action)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRestriction {
    pub role: Role,
    pub resource: Resource,
    pub action: Action,
    #[serde(flatten)]
    pub config: RestrictionConfig,
}

impl ActionRestriction {
    pub fn new(role: Role, resource: Resource, action: Action, config: RestrictionConfig) -> Self {
        Self {
            role,
            resource,
            action,
            config,
        }
    }

    pub fn kind(&self) -> RestrictionKind {
        self.config.kind()
    }
}

type RuleKey = (Role, Resource, Action);

/// Immutable lookup table of restriction rules.
#[derive(Debug, Clone, Default)]
pub struct RestrictionRegistry {
    rules: Vec<ActionRestriction>,
    index: HashMap<RuleKey, Vec<ActionRestriction>>,
}

impl RestrictionRegistry {
    /// The rule table shipped with the CRM.
    pub fn builtin() -> Self {
        Self::build(builtin_rules())
    }

    /// Builds a registry from declarative rules, rejecting invalid tables.
    pub fn from_rules(rules: Vec<ActionRestriction>) -> AppResult<Self> {
        let mut seen: HashSet<(RuleKey, RestrictionKind)> = HashSet::new();
        for (position, rule) in rules.iter().enumerate() {
            rule.config.validate().map_err(|msg| {
                AppError::configuration(format!(
                    "restriction #{position} ({} {} {}): {msg}",
                    rule.role, rule.resource, rule.action
                ))
            })?;

            // Counter keys include the kind, so two rules of one kind would share a counter.
            if !seen.insert(((rule.role, rule.resource, rule.action), rule.kind())) {
                return Err(AppError::configuration(format!(
                    "restriction #{position}: duplicate {} rule for {} {} {}",
                    rule.kind(),
                    rule.role,
                    rule.resource,
                    rule.action
                )));
            }
        }

        Ok(Self::build(rules))
    }

    /// Parses a JSON array of rules.
    pub fn from_json_str(raw: &str) -> AppResult<Self> {
        let deserializer = &mut serde_json::Deserializer::from_str(raw);
        let rules: Vec<ActionRestriction> = serde_path_to_error::deserialize(deserializer)
            .map_err(|err| {
                AppError::configuration(format!("invalid restriction table at {}: {}", err.path(), err.inner()))
            })?;
        Self::from_rules(rules)
    }

    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::configuration(format!("failed to read {}: {err}", path.display()))
        })?;
        let registry = Self::from_json_str(&raw)?;
        tracing::info!(path = %path.display(), rules = registry.len(), "restriction table loaded");
        Ok(registry)
    }

    fn build(rules: Vec<ActionRestriction>) -> Self {
        let mut index: HashMap<RuleKey, Vec<ActionRestriction>> = HashMap::new();
        for rule in &rules {
            index
                .entry((rule.role, rule.resource, rule.action))
                .or_default()
                .push(rule.clone());
        }
        for bucket in index.values_mut() {
            bucket.sort_by_key(ActionRestriction::kind);
        }

        Self { rules, index }
    }

    /// Rules for the triple, sorted in evaluation order.
    pub fn get(&self, role: Role, resource: Resource, action: Action) -> &[ActionRestriction] {
        self.index
            .get(&(role, resource, action))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has(&self, role: Role, resource: Resource, action: Action) -> bool {
        !self.get(role, resource, action).is_empty()
    }

    /// The rule of `kind` for the triple, if one is configured.
    pub fn find(
        &self,
        role: Role,
        resource: Resource,
        action: Action,
        kind: RestrictionKind,
    ) -> Option<&ActionRestriction> {
        self.get(role, resource, action)
            .iter()
            .find(|rule| rule.kind() == kind)
    }

    pub fn all(&self) -> &[ActionRestriction] {
        &self.rules
    }

    pub fn for_resource(&self, resource: Resource) -> Vec<&ActionRestriction> {
        self.rules.iter().filter(|rule| rule.resource == resource).collect()
    }

    pub fn for_role(&self, role: Role) -> Vec<&ActionRestriction> {
        self.rules.iter().filter(|rule| rule.role == role).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn rate(limit: u32, window_seconds: u64) -> RestrictionConfig {
    RestrictionConfig::RateLimit(RateLimitConfig {
        limit,
        window_seconds,
    })
}

fn monthly_quota(limit: u32) -> RestrictionConfig {
    RestrictionConfig::QuotaLimit(QuotaConfig {
        limit,
        period: QuotaPeriod::Month,
    })
}

fn write_protected(fields: &[&str]) -> RestrictionConfig {
    RestrictionConfig::FieldRestriction(FieldRestrictionConfig {
        restricted_fields: fields.iter().map(|f| f.to_string()).collect(),
    })
}

fn must_be_empty(fields: &[&str]) -> RestrictionConfig {
    RestrictionConfig::ConditionRestriction(ConditionConfig {
        required_empty_fields: fields.iter().map(|f| f.to_string()).collect(),
    })
}

const HOUR: u64 = 3600;

fn builtin_rules() -> Vec<ActionRestriction> {
    use Action::*;
    use Resource::*;
    use Role::*;

    let rule = ActionRestriction::new;

    vec![
        // Sales reps
        rule(SalesRep, Customers, Create, rate(20, HOUR)),
        rule(SalesRep, Customers, Update, write_protected(&["creditScore", "paymentTerms", "ownerId"])),
        rule(SalesRep, Customers, Delete, must_be_empty(&["proposals", "opportunities"])),
        rule(SalesRep, Customers, Export, rate(3, HOUR)),
        rule(SalesRep, Customers, Export, monthly_quota(10)),
        rule(SalesRep, Opportunities, Create, rate(30, HOUR)),
        rule(SalesRep, Opportunities, Update, write_protected(&["ownerId", "competitorInfo"])),
        rule(SalesRep, Opportunities, Delete, must_be_empty(&["proposals"])),
        rule(SalesRep, Proposals, Create, rate(10, HOUR)),
        rule(SalesRep, Proposals, Create, monthly_quota(100)),
        rule(SalesRep, Proposals, Update, write_protected(&["discount", "approvedBy", "approvedAt"])),
        rule(SalesRep, Contacts, Create, rate(50, HOUR)),
        rule(SalesRep, Contacts, Import, monthly_quota(5)),
        // Sales managers
        rule(SalesManager, Customers, Delete, must_be_empty(&["proposals"])),
        rule(SalesManager, Customers, Export, monthly_quota(50)),
        rule(SalesManager, Proposals, Update, write_protected(&["costPrice"])),
        rule(SalesManager, Proposals, Delete, must_be_empty(&["attachments"])),
        rule(SalesManager, Reports, Export, rate(20, HOUR)),
        // Marketing
        rule(Marketing, Customers, Update, write_protected(&["revenue", "creditScore", "paymentTerms", "internalNotes", "ownerId"])),
        rule(Marketing, Customers, Export, monthly_quota(5)),
        rule(Marketing, Contacts, Import, monthly_quota(10)),
        rule(Marketing, Contacts, Import, rate(2, HOUR)),
        // Customer service
        rule(CustomerService, Customers, Update, write_protected(&["revenue", "creditScore", "paymentTerms", "ownerId"])),
        rule(CustomerService, Interactions, Create, rate(100, HOUR)),
        rule(CustomerService, Interactions, Delete, must_be_empty(&["followUps"])),
    ]
}
