use std::fs;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tempfile::tempdir;

use crm_authz::authz::{
    ActionRestrictionEngine, CounterStore, FieldPermissionEngine, FieldSensitivityRegistry, RestrictionKind,
    RestrictionRegistry,
};
use crm_authz::errors::AppError;
use crm_authz::models::rbac::{Action, Resource, Role};
use crm_authz::{AppConfig, AppState};

#[test]
fn restriction_table_loads_from_json_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("restrictions.json");
    fs::write(
        &path,
        json!([
            {"role": "VIEWER", "resource": "REPORTS", "action": "EXPORT",
             "kind": "QUOTA_LIMIT", "config": {"limit": 2, "period": "month"}},
            {"role": "VIEWER", "resource": "REPORTS", "action": "UPDATE",
             "kind": "FIELD_RESTRICTION", "config": {"restrictedFields": ["owner"]}}
        ])
        .to_string(),
    )?;

    let engine = ActionRestrictionEngine::new(RestrictionRegistry::load(&path)?, Arc::new(CounterStore::new()));
    assert_eq!(engine.get_all_restrictions().len(), 2);

    assert!(engine.check_restrictions(Role::Viewer, Resource::Reports, Action::Export, 1, None, None).allowed);
    assert!(engine.check_restrictions(Role::Viewer, Resource::Reports, Action::Export, 1, None, None).allowed);
    assert!(!engine.check_restrictions(Role::Viewer, Resource::Reports, Action::Export, 1, None, None).allowed);

    let status = engine
        .get_counter_status(Role::Viewer, Resource::Reports, Action::Export, 1, RestrictionKind::QuotaLimit)
        .expect("quota counter recorded");
    assert_eq!(status.remaining, 0);

    // built-in rules are not merged into a loaded table
    assert!(!engine.has_restrictions(Role::SalesRep, Resource::Customers, Action::Create));
    Ok(())
}

#[test]
fn field_table_loads_from_json_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("fields.json");
    fs::write(
        &path,
        json!([{"resource": "REPORTS", "fields": [
            {"name": "budget", "sensitivity": "CONFIDENTIAL", "allowedRoles": ["ADMIN", "SALES_MANAGER"]}
        ]}])
        .to_string(),
    )?;

    let engine = FieldPermissionEngine::new(FieldSensitivityRegistry::load(&path)?);
    assert!(engine.can_access_field(Role::SalesManager, Resource::Reports, "budget"));
    assert!(!engine.can_access_field(Role::SalesRep, Resource::Reports, "budget"));
    // CUSTOMERS is unconfigured in this table and therefore public
    assert!(engine.can_access_field(Role::Viewer, Resource::Customers, "creditScore"));
    Ok(())
}

#[test]
fn missing_file_is_a_configuration_error() {
    let err = RestrictionRegistry::load("/nonexistent/restrictions.json").unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)));
}

#[test]
fn app_state_honours_configured_files() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("restrictions.json");
    fs::write(&path, "[]")?;

    let config = AppConfig {
        restrictions_file: Some(path),
        ..AppConfig::default()
    };
    let state = AppState::from_config(&config)?;
    assert!(state.restrictions.get_all_restrictions().is_empty());
    assert!(state.fields.registry().len() > 0);
    Ok(())
}

#[test]
fn invalid_rule_in_file_fails_state_construction() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("restrictions.json");
    fs::write(
        &path,
        json!([{"role": "VIEWER", "resource": "REPORTS", "action": "CREATE",
                "kind": "RATE_LIMIT", "config": {"limit": 5, "windowSeconds": 0}}])
        .to_string(),
    )?;

    let config = AppConfig {
        restrictions_file: Some(path),
        ..AppConfig::default()
    };
    assert!(matches!(AppState::from_config(&config), Err(AppError::Configuration(_))));
    Ok(())
}

#[test]
fn blank_table_path_falls_back_to_builtin() {
    std::env::set_var("CRM_AUTHZ_BLANK_TABLE_PATH", "  ");
    assert_eq!(crm_authz::config::non_empty_path("CRM_AUTHZ_BLANK_TABLE_PATH"), None);

    std::env::set_var("CRM_AUTHZ_SET_TABLE_PATH", "/etc/crm/restrictions.json");
    assert_eq!(
        crm_authz::config::non_empty_path("CRM_AUTHZ_SET_TABLE_PATH"),
        Some(std::path::PathBuf::from("/etc/crm/restrictions.json"))
    );
    assert_eq!(crm_authz::config::non_empty_path("CRM_AUTHZ_UNSET_TABLE_PATH"), None);
}
