use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::authz::{CounterStatus, FieldConfig, ResourceFieldConfig, RestrictionCheck, RestrictionKind, SensitivityLevel};
use crate::models::rbac::{Action, Resource, Role};
use crate::routes::{fields, health, restrictions};

#[derive(OpenApi)]
#[openapi(
	paths(
		health::health,
		restrictions::check_restrictions,
		restrictions::list_restrictions,
		restrictions::get_restrictions,
		restrictions::counter_status,
		restrictions::clear_counters,
		fields::filter_response,
		fields::resource_fields,
		fields::field_info,
	),
	components(
		schemas(
			Role,
			Resource,
			Action,
			RestrictionKind,
			RestrictionCheck,
			CounterStatus,
			SensitivityLevel,
			FieldConfig,
			ResourceFieldConfig,
			health::HealthResponse,
			restrictions::CheckRequest,
			fields::FilterRequest,
			fields::ResourceFieldsResponse,
			fields::FieldInfoResponse,
		)
	),
	tags(
		(name = "Health", description = "Service health"),
		(name = "Restrictions", description = "Rate, quota, field-write and precondition checks"),
		(name = "Fields", description = "Field-level read filtering")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;
	ensure_servers(&mut doc, port);
	Ok(serde_json::from_value(doc)?)
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let has_servers = doc
		.get("servers")
		.and_then(Value::as_array)
		.map(|servers| !servers.is_empty())
		.unwrap_or(false);

	if !has_servers {
		doc["servers"] = json!([{"url": format!("http://localhost:{port}"), "description": "Local"}]);
	}
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}
