use thiserror::Error;

/// Failures surfaced by [`TenantConnectionManager::resolve`](super::TenantConnectionManager::resolve).
///
/// Cloneable so that every caller awaiting one shared connection attempt
/// receives the same failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenantError {
    #[error("Invalid principal id")]
    InvalidPrincipal,

    #[error("Principal not found: {0}")]
    PrincipalNotFound(String),

    #[error("No tenant store configured for principal: {0}")]
    TenantConfigMissing(String),

    #[error("Tenant store unavailable for principal {principal}: {reason}")]
    TenantUnavailable { principal: String, reason: String },

    #[error("Directory lookup failed: {0}")]
    DirectoryLookupFailed(String),
}

impl TenantError {
    pub(crate) fn unavailable(principal: &str, reason: impl Into<String>) -> Self {
        TenantError::TenantUnavailable {
            principal: principal.to_string(),
            reason: reason.into(),
        }
    }
}
