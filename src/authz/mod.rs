//! Authorization module - restriction and field-level permission engines
//!
//! This module layers fine-grained rules on top of the coarse RBAC decision:
//! - Rate limits and monthly quotas per (role, resource, action, user)
//! - Write blacklists per field for UPDATE
//! - Emptiness preconditions for DELETE
//! - Read filtering per field and role
//! - Configurable enforcement modes (off/advisory/strict)

mod counter;
mod evaluator;
mod field_filter;
mod fields;
mod restriction;

pub use counter::{
    Clock, CounterEntry, CounterKey, CounterStatus, CounterStore, CounterWindow, ManualClock, SystemClock,
};
pub use evaluator::{
    is_empty_value, ActionRestrictionEngine, RestrictionCheck, FIELD_WRITE_DENIED, INVALID_RESOURCE_DATA,
    MUST_BE_EMPTY, QUOTA_LIMIT_EXCEEDED, RATE_LIMIT_EXCEEDED,
};
pub use field_filter::FieldPermissionEngine;
pub use fields::{FieldConfig, FieldSensitivityRegistry, ResourceFieldConfig, SensitivityLevel};
pub use restriction::{
    ActionRestriction, ConditionConfig, FieldRestrictionConfig, QuotaConfig, QuotaPeriod, RateLimitConfig,
    RestrictionConfig, RestrictionKind, RestrictionRegistry,
};

use crate::errors::AppError;

/// Authorization enforcement mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthzMode {
    /// No restriction checks, counters untouched (development mode)
    Off,
    /// Log denials but allow requests (rollout mode)
    Advisory,
    /// Reject denied requests with 403 (production mode)
    #[default]
    Strict,
}

impl AuthzMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "off" => Some(AuthzMode::Off),
            "advisory" => Some(AuthzMode::Advisory),
            "strict" => Some(AuthzMode::Strict),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthzMode::Off => "off",
            AuthzMode::Advisory => "advisory",
            AuthzMode::Strict => "strict",
        }
    }
}

/// Applies `mode` to an engine decision.
///
/// Strict turns a denial into [`AppError::Forbidden`] carrying the reason;
/// advisory logs it and lets the request through.
pub fn enforce(mode: AuthzMode, check: RestrictionCheck) -> Result<RestrictionCheck, AppError> {
    if check.allowed {
        return Ok(check);
    }

    let reason = check.reason.clone().unwrap_or_default();
    match mode {
        AuthzMode::Strict => Err(AppError::forbidden(reason)),
        AuthzMode::Advisory => {
            tracing::warn!(reason = %reason, "restriction denied (advisory, allowing)");
            Ok(RestrictionCheck::allow(check.remaining))
        }
        AuthzMode::Off => Ok(RestrictionCheck::allow(None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_mode_maps_denial_to_forbidden() {
        let denied = RestrictionCheck::deny(RATE_LIMIT_EXCEEDED, Some(0));
        let err = enforce(AuthzMode::Strict, denied).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(reason) if reason == RATE_LIMIT_EXCEEDED));
    }

    #[test]
    fn advisory_mode_lets_denials_through() {
        let denied = RestrictionCheck::deny(MUST_BE_EMPTY, None);
        let check = enforce(AuthzMode::Advisory, denied).unwrap();
        assert!(check.allowed);
        assert!(check.reason.is_none());
    }

    #[test]
    fn mode_parsing_is_case_insensitive() {
        assert_eq!(AuthzMode::parse("Advisory"), Some(AuthzMode::Advisory));
        assert_eq!(AuthzMode::parse(" OFF "), Some(AuthzMode::Off));
        assert_eq!(AuthzMode::parse("lenient"), None);
    }

    #[test]
    fn strict_is_the_default_mode() {
        assert_eq!(AuthzMode::default(), AuthzMode::Strict);
        assert_eq!(crate::config::AppConfig::default().authz_mode, AuthzMode::Strict);
    }
}
