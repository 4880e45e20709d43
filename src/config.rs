use std::path::PathBuf;

use crate::authz::{AuthzMode, FieldSensitivityRegistry, RestrictionRegistry};
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub authz_mode: AuthzMode,
    /// JSON restriction table; the built-in table is used when unset.
    pub restrictions_file: Option<PathBuf>,
    /// JSON field sensitivity table; the built-in table is used when unset.
    pub field_sensitivity_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            authz_mode: AuthzMode::default(),
            restrictions_file: None,
            field_sensitivity_file: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let port = std::env::var("APP_PORT")
            .map(|val| val.parse::<u16>())
            .unwrap_or(Ok(8000))
            .map_err(|_| AppError::configuration("APP_PORT must be a valid port number"))?;

        let authz_mode = match std::env::var("AUTHZ_MODE") {
            Ok(val) => AuthzMode::parse(&val).ok_or_else(|| {
                AppError::configuration(format!("AUTHZ_MODE must be off, advisory or strict (got {val})"))
            })?,
            Err(_) => AuthzMode::default(),
        };

        Ok(Self {
            port,
            authz_mode,
            restrictions_file: non_empty_path("RESTRICTIONS_FILE"),
            field_sensitivity_file: non_empty_path("FIELD_SENSITIVITY_FILE"),
        })
    }

    pub fn restriction_registry(&self) -> Result<RestrictionRegistry, AppError> {
        match &self.restrictions_file {
            Some(path) => RestrictionRegistry::load(path),
            None => Ok(RestrictionRegistry::builtin()),
        }
    }

    pub fn field_registry(&self) -> Result<FieldSensitivityRegistry, AppError> {
        match &self.field_sensitivity_file {
            Some(path) => FieldSensitivityRegistry::load(path),
            None => Ok(FieldSensitivityRegistry::builtin()),
        }
    }
}

/// Path from `var`; unset and blank values both mean "use the built-in table".
pub fn non_empty_path(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .filter(|val| !val.trim().is_empty())
        .map(PathBuf::from)
}
