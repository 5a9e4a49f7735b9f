//! Error types for tenant provisioning.

use shard_core::KeyError;
use shardgrid_catalog::CatalogError;
use thiserror::Error;

use crate::interfaces::{ProvisionerError, TransportError};

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid tenant name {0:?}: must normalize to [a-z0-9][a-z0-9_-]*")]
    InvalidTenantName(String),

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("tenant database {0} already exists for a different tenant")]
    TenantAlreadyExists(String),

    #[error("provisioning failed: {0}")]
    Provisioner(#[from] ProvisionerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("registration attempt aborted: {0}")]
    Aborted(String),
}

impl ProvisionError {
    /// Whether resubmitting the same request may succeed.
    ///
    /// Validation and conflict failures are definitive; timeouts and
    /// transport faults leave the outcome unknown. A constraint violation
    /// while seeding means another attempt for the same tenant wrote the
    /// profile row in between, and replaying the seed converges.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisionError::Provisioner(e) => matches!(e, ProvisionerError::Timeout(_)),
            ProvisionError::Transport(e) => {
                e.is_ambiguous() || matches!(e, TransportError::Constraint(_))
            }
            ProvisionError::Catalog(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_core::{RawKey, Shard};

    #[test]
    fn conflicts_are_not_retryable() {
        let err = ProvisionError::Catalog(CatalogError::MappingConflict {
            key: RawKey::from_bytes(vec![0x80, 0, 0, 1]),
            existing: Shard::new("tenants1", "a"),
            requested: Shard::new("tenants1", "b"),
        });
        assert!(!err.is_retryable());
        assert!(!ProvisionError::TenantAlreadyExists("tenants1/acme".into()).is_retryable());
    }

    #[test]
    fn timeouts_are_retryable() {
        assert!(ProvisionError::from(TransportError::QueryTimeout("60s".into())).is_retryable());
        assert!(ProvisionError::from(ProvisionerError::Timeout("deploy".into())).is_retryable());
        assert!(!ProvisionError::from(ProvisionerError::Failed("quota".into())).is_retryable());
    }

    #[test]
    fn seed_constraint_violation_is_retryable() {
        assert!(ProvisionError::from(TransportError::Constraint("UNIQUE".into())).is_retryable());
        assert!(!ProvisionError::from(TransportError::Statement("syntax".into())).is_retryable());
        assert!(!ProvisionError::from(TransportError::InvalidRequest("../x".into())).is_retryable());
    }
}
