//! Error types and the external error envelope for ADCM
//!
//! This module defines:
//! - `AdcmError`: the typed error every core operation returns
//! - `ErrorEnvelope`: the `{ code, desc, level }` body handed to API callers
//! - `ErrorLevel`: severity carried by the envelope

use serde::{Deserialize, Serialize};

/// Result alias used by the core crates
pub type Result<T, E = AdcmError> = std::result::Result<T, E>;

/// Application-specific error types
///
/// Variants are grouped by cause: validation, invariant conflict, gating,
/// not found, runtime and external.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AdcmError {
    // Validation
    #[error("validation error: {0}")]
    Validation(String),

    #[error("config value error: {0}")]
    ConfigValue(String),

    #[error("wrong name: {0}")]
    WrongName(String),

    #[error("invalid host-component map: {0}")]
    InvalidHc(String),

    // Invariant conflict
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    NameCollision(String),

    #[error("host conflict: {0}")]
    HostConflict(String),

    #[error("host {0} belongs to another cluster or an incompatible bundle")]
    ForeignHost(String),

    #[error("host {0} has components mapped in this cluster")]
    HostHasComponents(String),

    #[error("host update error: {0}")]
    HostUpdate(String),

    #[error("host group conflict: {0}")]
    HostGroupConflict(String),

    #[error("{0} is referenced by a bind")]
    BindExists(String),

    #[error("bind conflict: {0}")]
    BindConflict(String),

    #[error("bundle conflict: {0}")]
    BundleConflict(String),

    #[error("license for prototype {0} is not accepted")]
    LicenseNotAccepted(String),

    // Gating
    #[error("{0} is locked")]
    Locked(String),

    #[error("maintenance mode is not available: {0}")]
    MaintenanceModeNotAvailable(String),

    #[error("action is not available: {0}")]
    ActionNotAvailable(String),

    #[error("{0} has issues")]
    ActionHasIssues(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("task error: {0}")]
    Task(String),

    #[error("upgrade error: {0}")]
    Upgrade(String),

    // Not found
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    // Runtime
    #[error("plugin {plugin} failed: {cause}")]
    PluginRuntime { plugin: String, cause: String },

    #[error("internal error: {0}")]
    Unhandled(String),

    // External
    #[error("store error: {0}")]
    Storage(String),

    #[error("runner error: {0}")]
    Runner(String),
}

impl AdcmError {
    /// Build a `NotFound` error for an object kind and id
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        AdcmError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// SCREAMING_SNAKE_CASE code of the envelope
    pub fn code(&self) -> String {
        match self {
            AdcmError::Validation(_) => "VALIDATION_ERROR".to_string(),
            AdcmError::ConfigValue(_) => "CONFIG_VALUE_ERROR".to_string(),
            AdcmError::WrongName(_) => "WRONG_NAME".to_string(),
            AdcmError::InvalidHc(_) => "INVALID_HC".to_string(),
            AdcmError::Conflict(_) => "CONFLICT".to_string(),
            AdcmError::NameCollision(_) => "CREATE_CONFLICT".to_string(),
            AdcmError::HostConflict(_) => "HOST_CONFLICT".to_string(),
            AdcmError::ForeignHost(_) => "FOREIGN_HOST".to_string(),
            AdcmError::HostHasComponents(_) => "HOST_CONFLICT".to_string(),
            AdcmError::HostUpdate(_) => "HOST_UPDATE_ERROR".to_string(),
            AdcmError::HostGroupConflict(_) => "HOST_GROUP_CONFLICT".to_string(),
            AdcmError::BindExists(_) => "BIND_EXISTS".to_string(),
            AdcmError::BindConflict(_) => "BIND_ERROR".to_string(),
            AdcmError::BundleConflict(_) => "BUNDLE_CONFLICT".to_string(),
            AdcmError::LicenseNotAccepted(_) => "LICENSE_ERROR".to_string(),
            AdcmError::Locked(_) => "LOCK_ERROR".to_string(),
            AdcmError::MaintenanceModeNotAvailable(_) => {
                "MAINTENANCE_MODE_NOT_AVAILABLE".to_string()
            }
            AdcmError::ActionNotAvailable(_) => "ACTION_NOT_AVAILABLE".to_string(),
            AdcmError::ActionHasIssues(_) => "ACTION_HAS_ISSUES".to_string(),
            AdcmError::Forbidden(_) => "FORBIDDEN".to_string(),
            AdcmError::Task(_) => "TASK_ERROR".to_string(),
            AdcmError::Upgrade(_) => "UPGRADE_ERROR".to_string(),
            AdcmError::NotFound { kind, .. } => {
                format!("{}_NOT_FOUND", kind.to_uppercase().replace([' ', '-'], "_"))
            }
            AdcmError::PluginRuntime { .. } => "PLUGIN_RUNTIME_ERROR".to_string(),
            AdcmError::Unhandled(_) => "UNHANDLED_EXCEPTION".to_string(),
            AdcmError::Storage(_) => "STORE_ERROR".to_string(),
            AdcmError::Runner(_) => "RUNNER_ERROR".to_string(),
        }
    }

    /// HTTP status the REST translator answers with
    pub fn http_status(&self) -> u16 {
        match self {
            AdcmError::Validation(_)
            | AdcmError::ConfigValue(_)
            | AdcmError::WrongName(_)
            | AdcmError::InvalidHc(_) => 400,
            AdcmError::Forbidden(_) => 403,
            AdcmError::NotFound { .. } => 404,
            AdcmError::Conflict(_)
            | AdcmError::NameCollision(_)
            | AdcmError::HostConflict(_)
            | AdcmError::ForeignHost(_)
            | AdcmError::HostHasComponents(_)
            | AdcmError::HostUpdate(_)
            | AdcmError::HostGroupConflict(_)
            | AdcmError::BindExists(_)
            | AdcmError::BindConflict(_)
            | AdcmError::BundleConflict(_)
            | AdcmError::LicenseNotAccepted(_)
            | AdcmError::Locked(_)
            | AdcmError::MaintenanceModeNotAvailable(_)
            | AdcmError::ActionNotAvailable(_)
            | AdcmError::ActionHasIssues(_)
            | AdcmError::Task(_)
            | AdcmError::Upgrade(_) => 409,
            AdcmError::PluginRuntime { .. }
            | AdcmError::Unhandled(_)
            | AdcmError::Storage(_)
            | AdcmError::Runner(_) => 500,
        }
    }

    /// Severity reported in the envelope
    pub fn level(&self) -> ErrorLevel {
        match self {
            AdcmError::ActionNotAvailable(_) | AdcmError::ActionHasIssues(_) => {
                ErrorLevel::Warning
            }
            _ => ErrorLevel::Error,
        }
    }

    /// True for errors caused by concerns rather than by the caller's input
    pub fn is_gating(&self) -> bool {
        matches!(
            self,
            AdcmError::Locked(_)
                | AdcmError::MaintenanceModeNotAvailable(_)
                | AdcmError::ActionNotAvailable(_)
                | AdcmError::ActionHasIssues(_)
        )
    }

    /// Render the error as the external envelope
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code(),
            desc: self.to_string(),
            level: self.level(),
        }
    }
}

impl From<anyhow::Error> for AdcmError {
    fn from(value: anyhow::Error) -> Self {
        match value.downcast::<AdcmError>() {
            Ok(err) => err,
            Err(other) => AdcmError::Unhandled(format!("{:#}", other)),
        }
    }
}

impl From<serde_json::Error> for AdcmError {
    fn from(value: serde_json::Error) -> Self {
        AdcmError::Validation(value.to_string())
    }
}

/// Severity of an envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Error,
    Warning,
}

/// Structured error body: `{ code, desc, level }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub desc: String,
    pub level: ErrorLevel,
}

impl ErrorEnvelope {
    /// Build an envelope for any error; typed core errors keep their code
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<AdcmError>() {
            Some(e) => e.envelope(),
            None => AdcmError::Unhandled(format!("{:#}", err)).envelope(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AdcmError::Locked("cluster 1".into()).code(), "LOCK_ERROR");
        assert_eq!(
            AdcmError::not_found("cluster", 7).code(),
            "CLUSTER_NOT_FOUND"
        );
        assert_eq!(
            AdcmError::not_found("config host group", 7).code(),
            "CONFIG_HOST_GROUP_NOT_FOUND"
        );
        assert_eq!(
            AdcmError::MaintenanceModeNotAvailable("x".into()).code(),
            "MAINTENANCE_MODE_NOT_AVAILABLE"
        );
        assert_eq!(AdcmError::NameCollision("x".into()).code(), "CREATE_CONFLICT");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(AdcmError::ConfigValue("x".into()).http_status(), 400);
        assert_eq!(AdcmError::Forbidden("x".into()).http_status(), 403);
        assert_eq!(AdcmError::not_found("host", 1).http_status(), 404);
        assert_eq!(AdcmError::Locked("x".into()).http_status(), 409);
        assert_eq!(AdcmError::Task("x".into()).http_status(), 409);
        assert_eq!(AdcmError::Unhandled("x".into()).http_status(), 500);
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = AdcmError::Locked("cluster c1".into()).envelope();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["code"], "LOCK_ERROR");
        assert_eq!(json["desc"], "cluster c1 is locked");
        assert_eq!(json["level"], "error");
    }

    #[test]
    fn test_anyhow_roundtrip_keeps_code() {
        let err: anyhow::Error = AdcmError::HostConflict("h1".into()).into();
        assert_eq!(ErrorEnvelope::from_anyhow(&err).code, "HOST_CONFLICT");

        let plain = anyhow::anyhow!("disk on fire");
        assert_eq!(ErrorEnvelope::from_anyhow(&plain).code, "UNHANDLED_EXCEPTION");

        let back: AdcmError = anyhow::Error::from(AdcmError::Task("t".into())).into();
        assert_eq!(back, AdcmError::Task("t".into()));
    }

    #[test]
    fn test_gating_classification() {
        assert!(AdcmError::Locked("x".into()).is_gating());
        assert!(AdcmError::ActionHasIssues("x".into()).is_gating());
        assert!(!AdcmError::Validation("x".into()).is_gating());
        assert_eq!(
            AdcmError::ActionNotAvailable("x".into()).level(),
            ErrorLevel::Warning
        );
    }
}
