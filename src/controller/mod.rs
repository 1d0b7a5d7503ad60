//! Controller for the Alfresco CRD
//!
//! - `client`: cluster API collaborators (real and mockable)
//! - `memory`: in-memory workload client for deterministic tests
//! - `reconciler`: materialize / converge / retire over all components
//! - `alfresco`: `kube::runtime` reconcile and error policy

mod alfresco;
mod client;
mod memory;
mod reconciler;

pub use alfresco::{error_policy, reconcile, status_from_report, Context, FINALIZER};
pub use client::{
    AlfrescoClient, AlfrescoClientImpl, ClientError, KubeWorkloadClient, ObjectKind,
    WorkloadClient,
};
pub use memory::{CallResult, InMemoryCluster, Operation, RecordedCall};
pub use reconciler::{
    owner_reference, ports_changed, ComponentReport, ObjectOutcome, ParentResource, Pass,
    PassReport, Reconciler,
};
