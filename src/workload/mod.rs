//! Workload compilation for Alfresco components
//!
//! Pure translation from a [`ComponentSpec`](crate::crd::ComponentSpec) to
//! Kubernetes objects, in two stages:
//!
//! - [`compile_workload`]: component declaration -> [`WorkloadDefinition`]
//! - [`synthesize`]: definition -> [`ManagedObjects`] (Deployment + Service)
//!
//! Nothing here talks to the cluster. The reconciler applies the output.

mod compiler;
mod probe;
mod security;
mod synthesizer;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSecurityContext, Service, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::Serialize;

pub use compiler::compile_workload;
pub use probe::{build_probe, ProbeCheck, ProbeTiming};
pub use security::{is_postgres_image, security_profile_for_image, SecurityProfile, POSTGRES_UID};
pub use synthesizer::{service_port_name, synthesize};

/// Label selecting a component's pods
pub const LABEL_APP: &str = "app";

/// Label naming the component an object belongs to
pub const LABEL_COMPONENT: &str = "alfresco-component";

/// Label set shared by every object of a component.
///
/// Always keyed by the component's map key, never by the override name.
pub fn component_labels(component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), component.to_string()),
        (LABEL_COMPONENT.to_string(), component.to_string()),
    ])
}

/// Canonical, cluster-independent description of one component's workload
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadDefinition {
    /// Key of the component in the parent spec map
    pub component: String,
    /// Name of the Deployment and Service
    pub name: String,
    /// Namespace of the parent resource
    pub namespace: String,
    /// Desired replica count
    pub replicas: i32,
    /// The single application container
    pub container: Container,
    /// Pod-level security context
    pub pod_security_context: Option<PodSecurityContext>,
    /// PVC-backed volumes
    pub volumes: Vec<Volume>,
    /// Service account for the pods
    pub service_account_name: Option<String>,
    /// Labels applied to both objects and the pod template
    pub labels: BTreeMap<String, String>,
    /// Owner references back to the parent resource
    pub owner_references: Vec<OwnerReference>,
    /// Declared ports, exposed identically on container and Service
    pub ports: Vec<i32>,
    /// Service type
    pub service_type: String,
}

/// The Deployment and Service managed for one component
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ManagedObjects {
    /// Workload controller
    pub deployment: Deployment,
    /// Network endpoint
    pub service: Service,
}
