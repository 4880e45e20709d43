//! Field sensitivity table for read-side filtering.
//!
//! Readability is decided by each field's explicit `allowed_roles`. The
//! sensitivity label is descriptive only; two fields at the same level can
//! admit different roles.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Resource, Role};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensitivityLevel {
    #[default]
    Public,
    Internal,
    Confidential,
    Restricted,
}

impl SensitivityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensitivityLevel::Public => "PUBLIC",
            SensitivityLevel::Internal => "INTERNAL",
            SensitivityLevel::Confidential => "CONFIDENTIAL",
            SensitivityLevel::Restricted => "RESTRICTED",
        }
    }
}

impl std::fmt::Display for SensitivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    pub name: String,
    pub sensitivity: SensitivityLevel,
    #[schema(value_type = Vec<Role>)]
    pub allowed_roles: BTreeSet<Role>,
}

impl FieldConfig {
    pub fn new(name: impl Into<String>, sensitivity: SensitivityLevel, allowed_roles: &[Role]) -> Self {
        Self {
            name: name.into(),
            sensitivity,
            allowed_roles: allowed_roles.iter().copied().collect(),
        }
    }

    pub fn allows(&self, role: Role) -> bool {
        self.allowed_roles.contains(&role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResourceFieldConfig {
    pub resource: Resource,
    pub fields: Vec<FieldConfig>,
}

impl ResourceFieldConfig {
    pub fn field(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldSensitivityRegistry {
    resources: HashMap<Resource, ResourceFieldConfig>,
}

impl FieldSensitivityRegistry {
    pub fn builtin() -> Self {
        Self::build(builtin_configs())
    }

    pub fn from_configs(configs: Vec<ResourceFieldConfig>) -> AppResult<Self> {
        let mut resources = HashSet::new();
        for config in &configs {
            if !resources.insert(config.resource) {
                return Err(AppError::configuration(format!(
                    "resource {} is configured more than once",
                    config.resource
                )));
            }

            let mut names = HashSet::new();
            for field in &config.fields {
                if field.name.is_empty() {
                    return Err(AppError::configuration(format!(
                        "resource {} has a field with an empty name",
                        config.resource
                    )));
                }
                if !names.insert(field.name.as_str()) {
                    return Err(AppError::configuration(format!(
                        "field {}.{} is configured more than once",
                        config.resource, field.name
                    )));
                }
            }
        }

        Ok(Self::build(configs))
    }

    pub fn from_json_str(raw: &str) -> AppResult<Self> {
        let deserializer = &mut serde_json::Deserializer::from_str(raw);
        let configs: Vec<ResourceFieldConfig> = serde_path_to_error::deserialize(deserializer)
            .map_err(|err| {
                AppError::configuration(format!("invalid field sensitivity table at {}: {}", err.path(), err.inner()))
            })?;
        Self::from_configs(configs)
    }

    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::configuration(format!("failed to read {}: {err}", path.display()))
        })?;
        let registry = Self::from_json_str(&raw)?;
        tracing::info!(path = %path.display(), resources = registry.len(), "field sensitivity table loaded");
        Ok(registry)
    }

    fn build(configs: Vec<ResourceFieldConfig>) -> Self {
        Self {
            resources: configs.into_iter().map(|cfg| (cfg.resource, cfg)).collect(),
        }
    }

    pub fn get(&self, resource: Resource) -> Option<&ResourceFieldConfig> {
        self.resources.get(&resource)
    }

    pub fn field(&self, resource: Resource, name: &str) -> Option<&FieldConfig> {
        self.get(resource)?.field(name)
    }

    /// Configured resources in declaration order of [`Resource`].
    pub fn resources(&self) -> Vec<&ResourceFieldConfig> {
        let mut configs: Vec<_> = self.resources.values().collect();
        configs.sort_by_key(|cfg| cfg.resource);
        configs
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

fn builtin_configs() -> Vec<ResourceFieldConfig> {
    use Role::*;
    use SensitivityLevel::*;

    let field = FieldConfig::new;

    vec![
        ResourceFieldConfig {
            resource: Resource::Customers,
            fields: vec![
                field("email", Internal, &[Admin, SalesManager, SalesRep, CustomerService]),
                field("phone", Internal, &[Admin, SalesManager, SalesRep, CustomerService, Marketing]),
                field("address", Internal, &[Admin, SalesManager, SalesRep, CustomerService]),
                field("revenue", Confidential, &[Admin, SalesManager, SalesRep]),
                field("internalNotes", Confidential, &[Admin, SalesManager, SalesRep]),
                field("paymentTerms", Confidential, &[Admin, SalesManager]),
                field("creditScore", Restricted, &[Admin]),
            ],
        },
        ResourceFieldConfig {
            resource: Resource::Contacts,
            fields: vec![
                field("email", Internal, &[Admin, SalesManager, SalesRep, CustomerService, Marketing]),
                field("phone", Internal, &[Admin, SalesManager, SalesRep, CustomerService]),
                field("mobile", Confidential, &[Admin, SalesManager, SalesRep]),
                field("birthday", Confidential, &[Admin, SalesManager]),
            ],
        },
        ResourceFieldConfig {
            resource: Resource::Opportunities,
            fields: vec![
                field("amount", Confidential, &[Admin, SalesManager, SalesRep]),
                field("probability", Internal, &[Admin, SalesManager, SalesRep, Marketing]),
                field("internalNotes", Confidential, &[Admin, SalesManager, SalesRep]),
                field("competitorInfo", Confidential, &[Admin, SalesManager]),
            ],
        },
        ResourceFieldConfig {
            resource: Resource::Proposals,
            fields: vec![
                field("totalAmount", Confidential, &[Admin, SalesManager, SalesRep]),
                field("discount", Confidential, &[Admin, SalesManager, SalesRep]),
                field("profitMargin", Restricted, &[Admin, SalesManager]),
                field("costPrice", Restricted, &[Admin]),
            ],
        },
        ResourceFieldConfig {
            resource: Resource::Products,
            fields: vec![
                field("costPrice", Confidential, &[Admin, SalesManager]),
                field("margin", Confidential, &[Admin, SalesManager]),
                field("supplierInfo", Internal, &[Admin, SalesManager, SalesRep]),
            ],
        },
        ResourceFieldConfig {
            resource: Resource::Users,
            fields: vec![
                field("email", Internal, &[Admin, SalesManager, SalesRep, Marketing, CustomerService]),
                field("phone", Internal, &[Admin, SalesManager]),
                field("lastLoginAt", Internal, &[Admin, SalesManager]),
                field("salary", Restricted, &[Admin]),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_passes_validation() {
        let registry = FieldSensitivityRegistry::from_configs(builtin_configs()).expect("builtin must validate");
        assert_eq!(registry.len(), FieldSensitivityRegistry::builtin().len());
    }

    #[test]
    fn admin_can_read_every_configured_field() {
        let registry = FieldSensitivityRegistry::builtin();
        for config in registry.resources() {
            for field in &config.fields {
                assert!(field.allows(Role::Admin), "{}.{} hides from ADMIN", config.resource, field.name);
            }
        }
    }

    #[test]
    fn same_level_fields_keep_their_own_role_sets() {
        let registry = FieldSensitivityRegistry::builtin();
        let email = registry.field(Resource::Customers, "email").unwrap();
        let phone = registry.field(Resource::Customers, "phone").unwrap();
        assert_eq!(email.sensitivity, phone.sensitivity);
        assert!(!email.allows(Role::Marketing));
        assert!(phone.allows(Role::Marketing));
    }

    #[test]
    fn sensitivity_levels_are_ordered() {
        assert!(SensitivityLevel::Public < SensitivityLevel::Internal);
        assert!(SensitivityLevel::Internal < SensitivityLevel::Confidential);
        assert!(SensitivityLevel::Confidential < SensitivityLevel::Restricted);
        assert_eq!(SensitivityLevel::default(), SensitivityLevel::Public);
    }

    #[test]
    fn sensitivity_displays_in_wire_form() {
        assert_eq!(SensitivityLevel::Restricted.to_string(), "RESTRICTED");
        for level in [SensitivityLevel::Public, SensitivityLevel::Internal, SensitivityLevel::Confidential] {
            assert_eq!(serde_json::to_value(level).unwrap(), level.to_string());
        }
    }

    #[test]
    fn duplicate_field_names_are_rejected() {
        let raw = r#"[{"resource": "REPORTS", "fields": [
            {"name": "owner", "sensitivity": "INTERNAL", "allowedRoles": ["ADMIN"]},
            {"name": "owner", "sensitivity": "PUBLIC", "allowedRoles": []}
        ]}]"#;
        let err = FieldSensitivityRegistry::from_json_str(raw).unwrap_err();
        assert!(matches!(err, AppError::Configuration(msg) if msg.contains("REPORTS.owner")));
    }
}
