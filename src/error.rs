//! Error types for the Alfresco operator

use thiserror::Error;

use crate::controller::ClientError;

/// Main error type for Alfresco operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error outside the managed-object client
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Workload creation failed for a component during materialize
    #[error("materialize failed for component '{component}': {source}")]
    Materialize {
        /// Component key in the parent spec
        component: String,
        /// Underlying client failure
        source: ClientError,
    },

    /// Validation error for the parent resource
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a materialize error for a component
    pub fn materialize(component: impl Into<String>, source: ClientError) -> Self {
        Self::Materialize {
            component: component.into(),
            source,
        }
    }
}
