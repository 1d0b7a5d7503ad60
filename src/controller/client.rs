//! Cluster API collaborators
//!
//! The reconciler never touches `kube::Api` directly. It goes through
//! [`WorkloadClient`] for Deployments and Services, and the controller goes
//! through [`AlfrescoClient`] for its own resource. Both have real kube-rs
//! implementations here; tests use mocks or the in-memory cluster.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Alfresco, AlfrescoStatus};
use crate::Error;

// =============================================================================
// Errors
// =============================================================================

/// Kind of a managed object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// apps/v1 Deployment
    Deployment,
    /// v1 Service
    Service,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deployment => write!(f, "Deployment"),
            Self::Service => write!(f, "Service"),
        }
    }
}

/// Outcome classes of a cluster call the reconciler cares about
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ClientError {
    /// The object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Object kind
        kind: ObjectKind,
        /// Object name
        name: String,
    },

    /// The object already exists
    #[error("{kind} {name} already exists")]
    Conflict {
        /// Object kind
        kind: ObjectKind,
        /// Object name
        name: String,
    },

    /// Any other failure
    #[error("{kind} {name}: {message}")]
    Other {
        /// Object kind
        kind: ObjectKind,
        /// Object name
        name: String,
        /// Error text from the API
        message: String,
    },
}

impl ClientError {
    /// Create a not-found error
    pub fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
        }
    }

    /// Create an error for any other failure
    pub fn other(kind: ObjectKind, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }

    /// True for "object does not exist"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for "object already exists"
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Classify a kube error by HTTP status
    pub fn from_kube(kind: ObjectKind, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(ae) if ae.code == 409 => Self::conflict(kind, name),
            other => Self::other(kind, name, other.to_string()),
        }
    }
}

// =============================================================================
// Workload client
// =============================================================================

/// Create/read/replace/delete for the objects managed per component
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Create a Deployment
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClientError>;

    /// Read a Deployment
    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Deployment, ClientError>;

    /// Replace a Deployment (full object, `resourceVersion` carried)
    async fn replace_deployment(
        &self,
        name: &str,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClientError>;

    /// Delete a Deployment
    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<(), ClientError>;

    /// Create a Service
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), ClientError>;

    /// Read a Service
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Service, ClientError>;

    /// Replace a Service (full object, `resourceVersion` carried)
    async fn replace_service(
        &self,
        name: &str,
        namespace: &str,
        service: &Service,
    ) -> Result<(), ClientError>;

    /// Delete a Service
    async fn delete_service(&self, name: &str, namespace: &str) -> Result<(), ClientError>;
}

/// Object name for error reporting when the object has none set
fn object_name(meta: &ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

/// Real workload client backed by the API server
pub struct KubeWorkloadClient {
    client: Client,
}

impl KubeWorkloadClient {
    /// Create a new KubeWorkloadClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClientError> {
        self.deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await
            .map(|_| ())
            .map_err(|e| {
                ClientError::from_kube(ObjectKind::Deployment, object_name(&deployment.metadata), e)
            })
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, ClientError> {
        self.deployments(namespace)
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(ObjectKind::Deployment, name, e))
    }

    async fn replace_deployment(
        &self,
        name: &str,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClientError> {
        self.deployments(namespace)
            .replace(name, &PostParams::default(), deployment)
            .await
            .map(|_| ())
            .map_err(|e| ClientError::from_kube(ObjectKind::Deployment, name, e))
    }

    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<(), ClientError> {
        self.deployments(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| ClientError::from_kube(ObjectKind::Deployment, name, e))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), ClientError> {
        self.services(namespace)
            .create(&PostParams::default(), service)
            .await
            .map(|_| ())
            .map_err(|e| {
                ClientError::from_kube(ObjectKind::Service, object_name(&service.metadata), e)
            })
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Service, ClientError> {
        self.services(namespace)
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(ObjectKind::Service, name, e))
    }

    async fn replace_service(
        &self,
        name: &str,
        namespace: &str,
        service: &Service,
    ) -> Result<(), ClientError> {
        self.services(namespace)
            .replace(name, &PostParams::default(), service)
            .await
            .map(|_| ())
            .map_err(|e| ClientError::from_kube(ObjectKind::Service, name, e))
    }

    async fn delete_service(&self, name: &str, namespace: &str) -> Result<(), ClientError> {
        self.services(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| ClientError::from_kube(ObjectKind::Service, name, e))
    }
}

// =============================================================================
// Alfresco client
// =============================================================================

/// Operations on the Alfresco resource itself
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AlfrescoClient: Send + Sync {
    /// Add a finalizer if it is not already present
    async fn add_finalizer(&self, name: &str, namespace: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer; a missing resource is not an error
    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Patch the status subresource
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &AlfrescoStatus,
    ) -> Result<(), Error>;
}

/// Real Alfresco client backed by the API server
pub struct AlfrescoClientImpl {
    client: Client,
    field_manager: String,
}

impl AlfrescoClientImpl {
    /// Create a new client; `field_manager` names this operator in patches
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, namespace: &str) -> Api<Alfresco> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl AlfrescoClient for AlfrescoClientImpl {
    async fn add_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.api(namespace);

        let resource = api.get(name).await?;
        let mut finalizers = resource.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }

    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.api(namespace);

        let resource = match api.get(name).await {
            Ok(r) => r,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let finalizers: Vec<String> = resource
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        match api
            .patch(
                name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &AlfrescoStatus,
    ) -> Result<(), Error> {
        let status_patch = serde_json::json!({
            "status": status
        });

        self.api(namespace)
            .patch_status(
                name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&status_patch),
            )
            .await?;

        Ok(())
    }
}
