//! Restriction decision routes
//!
//! Handlers in other services call `/check` before mutating state. In strict
//! mode a denial comes back as 403 with the engine's reason as the message.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};

use crate::app::AppState;
use crate::authz::{self, ActionRestriction, AuthzMode, CounterStatus, RestrictionCheck, RestrictionKind};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Action, Resource, Role, UserId};

// =============================================================================
// REQUESTS
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub role: Role,
    pub resource: Resource,
    pub action: Action,
    #[schema(value_type = u64, example = 5)]
    pub user_id: UserId,
    /// Current state of the target entity, required by DELETE preconditions
    #[serde(default)]
    #[schema(value_type = Object)]
    pub resource_data: Option<Value>,
    /// Fields the caller intends to write on UPDATE
    #[serde(default)]
    #[schema(value_type = Object)]
    pub update_data: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RestrictionFilter {
    pub role: Option<Role>,
    pub resource: Option<Resource>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CounterQuery {
    pub role: Role,
    pub resource: Resource,
    pub action: Action,
    #[param(value_type = u64)]
    pub user_id: UserId,
    pub kind: RestrictionKind,
}

// =============================================================================
// DECISIONS
// =============================================================================

/// Evaluate restrictions for one request
#[utoipa::path(
    post,
    path = "/api/restrictions/check",
    tag = "Restrictions",
    request_body = CheckRequest,
    responses(
        (status = 200, description = "Action permitted", body = RestrictionCheck),
        (status = 403, description = "Action denied; message carries the reason"),
    )
)]
pub async fn check_restrictions(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> AppResult<Json<RestrictionCheck>> {
    if state.mode == AuthzMode::Off {
        return Ok(Json(RestrictionCheck::allow(None)));
    }

    let check = state.restrictions.check_restrictions(
        req.role,
        req.resource,
        req.action,
        req.user_id,
        req.resource_data.as_ref(),
        req.update_data.as_ref(),
    );

    authz::enforce(state.mode, check).map(Json)
}

// =============================================================================
// REGISTRY
// =============================================================================

/// List configured restrictions, optionally filtered by role and resource
#[utoipa::path(
    get,
    path = "/api/restrictions",
    tag = "Restrictions",
    params(RestrictionFilter),
    responses((status = 200, description = "Configured restrictions"))
)]
pub async fn list_restrictions(
    State(state): State<AppState>,
    Query(filter): Query<RestrictionFilter>,
) -> Json<Vec<ActionRestriction>> {
    let engine = &state.restrictions;
    let rules: Vec<&ActionRestriction> = match (filter.role, filter.resource) {
        (Some(role), Some(resource)) => engine
            .get_role_restrictions(role)
            .into_iter()
            .filter(|rule| rule.resource == resource)
            .collect(),
        (Some(role), None) => engine.get_role_restrictions(role),
        (None, Some(resource)) => engine.get_resource_restrictions(resource),
        (None, None) => engine.get_all_restrictions().iter().collect(),
    };

    Json(rules.into_iter().cloned().collect())
}

/// Restrictions for one (role, resource, action), in evaluation order
#[utoipa::path(
    get,
    path = "/api/restrictions/{role}/{resource}/{action}",
    tag = "Restrictions",
    params(
        ("role" = Role, Path, description = "Acting role"),
        ("resource" = Resource, Path, description = "Target resource"),
        ("action" = Action, Path, description = "Attempted action"),
    ),
    responses((status = 200, description = "Restrictions, empty when the action is unrestricted"))
)]
pub async fn get_restrictions(
    State(state): State<AppState>,
    Path((role, resource, action)): Path<(Role, Resource, Action)>,
) -> Json<Vec<ActionRestriction>> {
    Json(state.restrictions.get_restrictions(role, resource, action).to_vec())
}

// =============================================================================
// COUNTERS
// =============================================================================

/// Usage of a rate or quota counter
#[utoipa::path(
    get,
    path = "/api/restrictions/counters",
    tag = "Restrictions",
    params(CounterQuery),
    responses(
        (status = 200, description = "Counter status", body = CounterStatus),
        (status = 400, description = "Kind does not keep a counter"),
        (status = 404, description = "No counted rule or no usage recorded"),
    )
)]
pub async fn counter_status(
    State(state): State<AppState>,
    Query(query): Query<CounterQuery>,
) -> AppResult<Json<CounterStatus>> {
    if !query.kind.is_counted() {
        return Err(AppError::bad_request(format!("{} rules keep no counter", query.kind)));
    }

    state
        .restrictions
        .get_counter_status(query.role, query.resource, query.action, query.user_id, query.kind)
        .map(Json)
        .ok_or_else(|| AppError::not_found("no counter recorded"))
}

/// Drop every rate and quota counter
#[utoipa::path(
    delete,
    path = "/api/restrictions/counters",
    tag = "Restrictions",
    responses((status = 204, description = "Counters cleared"))
)]
pub async fn clear_counters(State(state): State<AppState>) -> StatusCode {
    state.restrictions.clear_counters();
    StatusCode::NO_CONTENT
}
