use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::app::AppState;
use crate::authz::{ResourceFieldConfig, SensitivityLevel};
use crate::errors::AppResult;
use crate::models::rbac::{Resource, Role};

#[derive(Debug, Deserialize, ToSchema)]
pub struct FilterRequest {
    pub role: Role,
    pub resource: Resource,
    /// Object, array of objects, or any other value (returned unchanged)
    #[schema(value_type = Object)]
    pub data: Value,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RoleQuery {
    pub role: Role,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OptionalRoleQuery {
    pub role: Option<Role>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResourceFieldsResponse {
    pub resource: Resource,
    pub role: Role,
    pub accessible: Vec<String>,
    pub restricted: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ResourceFieldConfig>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldInfoResponse {
    pub resource: Resource,
    pub field: String,
    pub sensitivity: SensitivityLevel,
    pub sensitive: bool,
    /// Present when a role was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readable: Option<bool>,
}

/// Strip fields the role may not read from a response payload
#[utoipa::path(
    post,
    path = "/api/fields/filter",
    tag = "Fields",
    request_body = FilterRequest,
    responses((status = 200, description = "Payload with unreadable fields removed"))
)]
pub async fn filter_response(
    State(state): State<AppState>,
    Json(req): Json<FilterRequest>,
) -> AppResult<Json<Value>> {
    Ok(Json(state.fields.filter_response_fields(req.role, req.resource, &req.data)))
}

/// Accessible and restricted configured fields of a resource for a role
#[utoipa::path(
    get,
    path = "/api/fields/{resource}",
    tag = "Fields",
    params(("resource" = Resource, Path, description = "Resource"), RoleQuery),
    responses((status = 200, description = "Field access split", body = ResourceFieldsResponse))
)]
pub async fn resource_fields(
    State(state): State<AppState>,
    Path(resource): Path<Resource>,
    Query(query): Query<RoleQuery>,
) -> AppResult<Json<ResourceFieldsResponse>> {
    let engine = &state.fields;
    Ok(Json(ResourceFieldsResponse {
        resource,
        role: query.role,
        accessible: engine.get_accessible_fields(query.role, resource),
        restricted: engine.get_restricted_fields(query.role, resource),
        config: engine.get_resource_field_config(resource).cloned(),
    }))
}

/// Sensitivity of one field, and readability for a role if given
#[utoipa::path(
    get,
    path = "/api/fields/{resource}/{field}",
    tag = "Fields",
    params(
        ("resource" = Resource, Path, description = "Resource"),
        ("field" = String, Path, description = "Field name"),
        OptionalRoleQuery,
    ),
    responses((status = 200, description = "Field sensitivity", body = FieldInfoResponse))
)]
pub async fn field_info(
    State(state): State<AppState>,
    Path((resource, field)): Path<(Resource, String)>,
    Query(query): Query<OptionalRoleQuery>,
) -> AppResult<Json<FieldInfoResponse>> {
    let engine = &state.fields;
    Ok(Json(FieldInfoResponse {
        sensitivity: engine.get_field_sensitivity(resource, &field),
        sensitive: engine.is_sensitive_field(resource, &field),
        readable: query.role.map(|role| engine.can_access_field(role, resource, &field)),
        resource,
        field,
    }))
}
