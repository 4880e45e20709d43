use serde_json::{Map, Value};

use super::fields::{FieldSensitivityRegistry, ResourceFieldConfig, SensitivityLevel};
use crate::models::rbac::{Resource, Role};

/// Read-side field filtering. Holds no mutable state.
///
/// Unconfigured resources and unconfigured fields are public.
#[derive(Debug, Clone, Default)]
pub struct FieldPermissionEngine {
    registry: FieldSensitivityRegistry,
}

impl FieldPermissionEngine {
    pub fn new(registry: FieldSensitivityRegistry) -> Self {
        Self { registry }
    }

    pub fn can_access_field(&self, role: Role, resource: Resource, field: &str) -> bool {
        self.registry
            .field(resource, field)
            .map_or(true, |config| config.allows(role))
    }

    /// Shallow copy of `data` without the fields `role` may not read.
    pub fn filter_fields(&self, role: Role, resource: Resource, data: Option<&Map<String, Value>>) -> Map<String, Value> {
        let Some(data) = data else {
            return Map::new();
        };

        let Some(config) = self.registry.get(resource) else {
            return data.clone();
        };

        data.iter()
            .filter(|(key, _)| config.field(key).map_or(true, |field| field.allows(role)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Filters every element; elements that are not objects become `{}`.
    pub fn filter_fields_array(&self, role: Role, resource: Resource, items: Option<&[Value]>) -> Vec<Value> {
        items
            .unwrap_or_default()
            .iter()
            .map(|item| Value::Object(self.filter_fields(role, resource, item.as_object())))
            .collect()
    }

    /// Configured fields `role` may read, in configuration order.
    pub fn get_accessible_fields(&self, role: Role, resource: Resource) -> Vec<String> {
        self.partition_fields(role, resource).0
    }

    /// Configured fields hidden from `role`.
    pub fn get_restricted_fields(&self, role: Role, resource: Resource) -> Vec<String> {
        self.partition_fields(role, resource).1
    }

    fn partition_fields(&self, role: Role, resource: Resource) -> (Vec<String>, Vec<String>) {
        let Some(config) = self.registry.get(resource) else {
            return (Vec::new(), Vec::new());
        };

        let (accessible, restricted): (Vec<_>, Vec<_>) =
            config.fields.iter().partition(|field| field.allows(role));
        (
            accessible.into_iter().map(|field| field.name.clone()).collect(),
            restricted.into_iter().map(|field| field.name.clone()).collect(),
        )
    }

    pub fn get_resource_field_config(&self, resource: Resource) -> Option<&ResourceFieldConfig> {
        self.registry.get(resource)
    }

    pub fn get_field_sensitivity(&self, resource: Resource, field: &str) -> SensitivityLevel {
        self.registry
            .field(resource, field)
            .map(|config| config.sensitivity)
            .unwrap_or_default()
    }

    pub fn is_sensitive_field(&self, resource: Resource, field: &str) -> bool {
        self.registry.field(resource, field).is_some()
    }

    /// Filters arrays element-wise and objects field-wise; other values pass through.
    pub fn filter_response_fields(&self, role: Role, resource: Resource, data: &Value) -> Value {
        match data {
            Value::Array(items) => Value::Array(self.filter_fields_array(role, resource, Some(items.as_slice()))),
            Value::Object(map) => Value::Object(self.filter_fields(role, resource, Some(map))),
            other => other.clone(),
        }
    }

    pub fn registry(&self) -> &FieldSensitivityRegistry {
        &self.registry
    }
}
