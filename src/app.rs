use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{ActionRestrictionEngine, AuthzMode, CounterStore, FieldPermissionEngine};
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::routes::{fields, health, restrictions};

#[derive(Clone)]
pub struct AppState {
    pub restrictions: Arc<ActionRestrictionEngine>,
    pub fields: Arc<FieldPermissionEngine>,
    pub mode: AuthzMode,
}

impl AppState {
    pub fn new(restrictions: ActionRestrictionEngine, fields: FieldPermissionEngine, mode: AuthzMode) -> Self {
        Self {
            restrictions: Arc::new(restrictions),
            fields: Arc::new(fields),
            mode,
        }
    }

    /// Loads both registries as configured and starts with empty counters.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let restrictions = ActionRestrictionEngine::new(
            config.restriction_registry()?,
            Arc::new(CounterStore::new()),
        );
        let fields = FieldPermissionEngine::new(config.field_registry()?);

        tracing::info!(
            rules = restrictions.get_all_restrictions().len(),
            field_resources = fields.registry().len(),
            mode = config.authz_mode.as_str(),
            "authorization engines ready"
        );

        Ok(Self::new(restrictions, fields, config.authz_mode))
    }
}

pub fn create_app(config: &AppConfig) -> Result<Router, AppError> {
    let state = AppState::from_config(config)?;
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let restriction_routes = Router::new()
        .route("/", get(restrictions::list_restrictions))
        .route("/check", post(restrictions::check_restrictions))
        .route(
            "/counters",
            get(restrictions::counter_status).delete(restrictions::clear_counters),
        )
        .route("/:role/:resource/:action", get(restrictions::get_restrictions));

    let field_routes = Router::new()
        .route("/filter", post(fields::filter_response))
        .route("/:resource", get(fields::resource_fields))
        .route("/:resource/:field", get(fields::field_info));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/api/restrictions", restriction_routes)
        .nest("/api/fields", field_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
