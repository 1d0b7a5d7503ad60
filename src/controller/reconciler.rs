//! Component reconciler
//!
//! Drives every component of an Alfresco resource toward its desired
//! Deployment and Service. Three entry points match the resource lifecycle:
//!
//! - [`Reconciler::materialize`] on first sight: create both objects
//! - [`Reconciler::converge`] on change or resync: overwrite live objects
//! - [`Reconciler::retire`] on deletion: delete both objects
//!
//! Components are processed one at a time in key order. A failure on one
//! component or one object kind never stops the others. Create conflicts and
//! delete not-founds count as success, so every pass can be repeated.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument};

use super::client::{ClientError, ObjectKind, WorkloadClient};
use crate::crd::{Alfresco, AlfrescoSpec, ComponentSpec};
use crate::workload::{compile_workload, synthesize, ManagedObjects};
use crate::Error;

// =============================================================================
// Inputs
// =============================================================================

/// What the reconciler needs to know about the parent Alfresco resource
#[derive(Clone, Debug, PartialEq)]
pub struct ParentResource {
    /// Resource name
    pub name: String,
    /// Namespace of the resource and all of its objects
    pub namespace: String,
    /// Declared components
    pub spec: AlfrescoSpec,
    /// Controller reference set on every managed object
    pub owner_reference: OwnerReference,
}

impl ParentResource {
    /// Extract the parent view of an Alfresco resource.
    ///
    /// Fails if the resource has no namespace or no uid, since neither the
    /// objects nor their owner reference could be built.
    pub fn from_resource(resource: &Alfresco) -> Result<Self, Error> {
        let name = resource.name_any();
        let namespace = resource
            .namespace()
            .ok_or_else(|| Error::validation(format!("Alfresco {} has no namespace", name)))?;
        let uid = resource
            .uid()
            .ok_or_else(|| Error::validation(format!("Alfresco {} has no uid", name)))?;
        let owner = owner_reference(
            &Alfresco::api_version(&()),
            &Alfresco::kind(&()),
            &name,
            &uid,
        );

        Ok(Self {
            name,
            namespace,
            spec: resource.spec.clone(),
            owner_reference: owner,
        })
    }

    /// Desired objects for one component
    pub fn desired_objects(&self, key: &str, spec: &ComponentSpec) -> ManagedObjects {
        let definition = compile_workload(
            key,
            spec,
            &self.namespace,
            std::slice::from_ref(&self.owner_reference),
        );
        synthesize(&definition)
    }
}

/// Build a controller owner reference to an Alfresco resource
pub fn owner_reference(api_version: &str, kind: &str, name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Which entry point produced a report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    /// Initial creation
    Materialize,
    /// Update or resync
    Converge,
    /// Deletion
    Retire,
}

/// What happened to one managed object during a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectOutcome {
    /// Created
    Created,
    /// Create found the object already present
    AlreadyExists,
    /// Live object overwritten in place
    Replaced,
    /// Deleted and created again
    Recreated,
    /// Deleted
    Deleted,
    /// Delete found nothing to remove
    AlreadyAbsent,
    /// Not attempted
    Skipped,
    /// Failed with the given error
    Failed(String),
}

impl ObjectOutcome {
    /// True for [`ObjectOutcome::Failed`]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl std::fmt::Display for ObjectOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::AlreadyExists => write!(f, "AlreadyExists"),
            Self::Replaced => write!(f, "Replaced"),
            Self::Recreated => write!(f, "Recreated"),
            Self::Deleted => write!(f, "Deleted"),
            Self::AlreadyAbsent => write!(f, "AlreadyAbsent"),
            Self::Skipped => write!(f, "Skipped"),
            Self::Failed(msg) => write!(f, "Failed: {}", msg),
        }
    }
}

/// Per-component result of a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentReport {
    /// Component key
    pub component: String,
    /// Name of the Deployment and Service
    pub name: String,
    /// Deployment outcome
    pub deployment: ObjectOutcome,
    /// Service outcome
    pub service: ObjectOutcome,
}

impl ComponentReport {
    /// True if either object failed
    pub fn has_failure(&self) -> bool {
        self.deployment.is_failure() || self.service.is_failure()
    }
}

/// Result of one pass over all components
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassReport {
    /// Entry point
    pub pass: Pass,
    /// One entry per component, in processing order
    pub components: Vec<ComponentReport>,
}

impl PassReport {
    fn new(pass: Pass) -> Self {
        Self {
            pass,
            components: Vec::new(),
        }
    }

    /// Number of components with at least one failed object
    pub fn failed_count(&self) -> usize {
        self.components.iter().filter(|c| c.has_failure()).count()
    }

    /// True if no object failed
    pub fn is_clean(&self) -> bool {
        self.failed_count() == 0
    }

    /// Report entry for a component key
    pub fn component(&self, key: &str) -> Option<&ComponentReport> {
        self.components.iter().find(|c| c.component == key)
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Applies desired component objects through a [`WorkloadClient`]
pub struct Reconciler {
    client: Arc<dyn WorkloadClient>,
}

impl Reconciler {
    /// Create a reconciler over the given client
    pub fn new(client: Arc<dyn WorkloadClient>) -> Self {
        Self { client }
    }

    /// Create every component's Deployment and Service.
    ///
    /// A Deployment create failure other than a conflict skips that
    /// component's Service and is returned once all components were
    /// attempted. Service failures are logged and reported only.
    #[instrument(skip(self, parent), fields(alfresco = %parent.name, namespace = %parent.namespace))]
    pub async fn materialize(&self, parent: &ParentResource) -> Result<PassReport, Error> {
        let mut report = PassReport::new(Pass::Materialize);
        let mut fatal: Option<Error> = None;

        for (key, spec) in &parent.spec.components {
            let name = spec.object_name(key).to_string();
            let objects = parent.desired_objects(key, spec);

            let deployment = match self
                .client
                .create_deployment(&parent.namespace, &objects.deployment)
                .await
            {
                Ok(()) => {
                    info!(component = %key, %name, "created Deployment");
                    ObjectOutcome::Created
                }
                Err(e) if e.is_conflict() => {
                    info!(component = %key, %name, "Deployment already exists");
                    ObjectOutcome::AlreadyExists
                }
                Err(e) => {
                    error!(component = %key, %name, error = %e, "failed to create Deployment");
                    let outcome = ObjectOutcome::Failed(e.to_string());
                    if fatal.is_none() {
                        fatal = Some(Error::materialize(key.as_str(), e));
                    }
                    report.components.push(ComponentReport {
                        component: key.clone(),
                        name,
                        deployment: outcome,
                        service: ObjectOutcome::Skipped,
                    });
                    continue;
                }
            };

            let service = self
                .create_service(&parent.namespace, key, &name, &objects.service)
                .await;

            report.components.push(ComponentReport {
                component: key.clone(),
                name,
                deployment,
                service,
            });
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Bring every component's live objects in line with the spec.
    ///
    /// Deployments are overwritten unconditionally. Services are overwritten
    /// in place when their ports match and recreated otherwise. Missing
    /// objects are created. Never fails; errors land in the report.
    #[instrument(skip(self, parent), fields(alfresco = %parent.name, namespace = %parent.namespace))]
    pub async fn converge(&self, parent: &ParentResource) -> PassReport {
        let mut report = PassReport::new(Pass::Converge);

        for (key, spec) in &parent.spec.components {
            let name = spec.object_name(key).to_string();
            let objects = parent.desired_objects(key, spec);

            let deployment = self
                .converge_deployment(&parent.namespace, key, &name, &objects.deployment)
                .await;
            let service = self
                .converge_service(&parent.namespace, key, &name, &objects.service)
                .await;

            report.components.push(ComponentReport {
                component: key.clone(),
                name,
                deployment,
                service,
            });
        }

        report
    }

    /// Delete every component's Deployment and Service. Never fails.
    #[instrument(skip(self, parent), fields(alfresco = %parent.name, namespace = %parent.namespace))]
    pub async fn retire(&self, parent: &ParentResource) -> PassReport {
        let mut report = PassReport::new(Pass::Retire);

        for (key, spec) in &parent.spec.components {
            let name = spec.object_name(key).to_string();

            let deployment = delete_outcome(
                key,
                &name,
                ObjectKind::Deployment,
                self.client.delete_deployment(&name, &parent.namespace).await,
            );
            let service = delete_outcome(
                key,
                &name,
                ObjectKind::Service,
                self.client.delete_service(&name, &parent.namespace).await,
            );

            report.components.push(ComponentReport {
                component: key.clone(),
                name,
                deployment,
                service,
            });
        }

        report
    }

    async fn create_service(
        &self,
        namespace: &str,
        key: &str,
        name: &str,
        service: &Service,
    ) -> ObjectOutcome {
        match self.client.create_service(namespace, service).await {
            Ok(()) => {
                info!(component = %key, %name, "created Service");
                ObjectOutcome::Created
            }
            Err(e) if e.is_conflict() => {
                info!(component = %key, %name, "Service already exists");
                ObjectOutcome::AlreadyExists
            }
            Err(e) => {
                error!(component = %key, %name, error = %e, "failed to create Service");
                ObjectOutcome::Failed(e.to_string())
            }
        }
    }

    async fn converge_deployment(
        &self,
        namespace: &str,
        key: &str,
        name: &str,
        desired: &Deployment,
    ) -> ObjectOutcome {
        let mut live = match self.client.get_deployment(name, namespace).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                info!(component = %key, %name, "Deployment missing, creating");
                return match self.client.create_deployment(namespace, desired).await {
                    Ok(()) => {
                        info!(component = %key, %name, "created Deployment");
                        ObjectOutcome::Created
                    }
                    Err(e) if e.is_conflict() => {
                        info!(component = %key, %name, "Deployment already exists");
                        ObjectOutcome::AlreadyExists
                    }
                    Err(e) => {
                        error!(component = %key, %name, error = %e, "failed to create Deployment");
                        ObjectOutcome::Failed(e.to_string())
                    }
                };
            }
            Err(e) => {
                error!(component = %key, %name, error = %e, "failed to read Deployment");
                return ObjectOutcome::Failed(e.to_string());
            }
        };

        live.spec = desired.spec.clone();
        live.metadata.labels = desired.metadata.labels.clone();

        match self.client.replace_deployment(name, namespace, &live).await {
            Ok(()) => {
                info!(component = %key, %name, "replaced Deployment");
                ObjectOutcome::Replaced
            }
            Err(e) => {
                error!(component = %key, %name, error = %e, "failed to replace Deployment");
                ObjectOutcome::Failed(e.to_string())
            }
        }
    }

    async fn converge_service(
        &self,
        namespace: &str,
        key: &str,
        name: &str,
        desired: &Service,
    ) -> ObjectOutcome {
        let live = match self.client.get_service(name, namespace).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                info!(component = %key, %name, "Service missing, creating");
                return self.create_service(namespace, key, name, desired).await;
            }
            Err(e) => {
                error!(component = %key, %name, error = %e, "failed to read Service");
                return ObjectOutcome::Failed(e.to_string());
            }
        };

        if ports_changed(&live, desired) {
            info!(component = %key, %name, "Service ports changed, recreating");
            return self.recreate_service(namespace, key, name, desired).await;
        }

        let updated = service_in_place(live, desired);
        match self.client.replace_service(name, namespace, &updated).await {
            Ok(()) => {
                info!(component = %key, %name, "replaced Service");
                ObjectOutcome::Replaced
            }
            Err(e) => {
                error!(component = %key, %name, error = %e, "failed to replace Service");
                ObjectOutcome::Failed(e.to_string())
            }
        }
    }

    async fn recreate_service(
        &self,
        namespace: &str,
        key: &str,
        name: &str,
        desired: &Service,
    ) -> ObjectOutcome {
        match self.client.delete_service(name, namespace).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(component = %key, %name, "Service already gone before recreate");
            }
            Err(e) => {
                error!(component = %key, %name, error = %e, "failed to delete Service for recreate");
                return ObjectOutcome::Failed(e.to_string());
            }
        }

        match self.client.create_service(namespace, desired).await {
            Ok(()) => {
                info!(component = %key, %name, "recreated Service");
                ObjectOutcome::Recreated
            }
            Err(e) => {
                error!(component = %key, %name, error = %e, "failed to recreate Service");
                ObjectOutcome::Failed(e.to_string())
            }
        }
    }
}

fn delete_outcome(
    key: &str,
    name: &str,
    kind: ObjectKind,
    result: Result<(), ClientError>,
) -> ObjectOutcome {
    match result {
        Ok(()) => {
            info!(component = %key, %name, %kind, "deleted");
            ObjectOutcome::Deleted
        }
        Err(e) if e.is_not_found() => {
            info!(component = %key, %name, %kind, "already deleted");
            ObjectOutcome::AlreadyAbsent
        }
        Err(e) => {
            error!(component = %key, %name, %kind, error = %e, "failed to delete");
            ObjectOutcome::Failed(e.to_string())
        }
    }
}

// =============================================================================
// Service diffing
// =============================================================================

fn service_ports(service: &Service) -> &[ServicePort] {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_deref())
        .unwrap_or_default()
}

/// Numeric target port. The API server defaults an absent target port to
/// the port itself; a named target port that is not a number has none.
fn target_port_number(port: &ServicePort) -> Option<i32> {
    match &port.target_port {
        Some(IntOrString::Int(n)) => Some(*n),
        Some(IntOrString::String(s)) => s.parse().ok(),
        None => Some(port.port),
    }
}

/// True if the port lists differ in length or in any `(port, targetPort)`
/// pair, compared position by position
pub fn ports_changed(live: &Service, desired: &Service) -> bool {
    let live_ports = service_ports(live);
    let desired_ports = service_ports(desired);

    live_ports.len() != desired_ports.len()
        || live_ports.iter().zip(desired_ports).any(|(l, d)| {
            l.port != d.port || target_port_number(l) != target_port_number(d)
        })
}

/// The live Service with the desired spec and labels, keeping the fields the
/// API server allocated and will not let us change
fn service_in_place(mut live: Service, desired: &Service) -> Service {
    let allocated = live.spec.take().unwrap_or_default();
    let mut spec = desired.spec.clone().unwrap_or_default();

    spec.cluster_ip = allocated.cluster_ip;
    spec.cluster_ips = allocated.cluster_ips;
    spec.ip_families = allocated.ip_families;
    spec.ip_family_policy = allocated.ip_family_policy;

    live.spec = Some(spec);
    live.metadata.labels = desired.metadata.labels.clone();
    live
}
