//! In-memory workload client
//!
//! A [`WorkloadClient`] over plain maps, for deterministic tests of the
//! reconciler without an API server. It behaves like the API server where the
//! reconciler depends on it:
//!
//! - create on an existing name returns `Conflict`
//! - read, replace and delete on a missing name return `NotFound`
//! - replace with a stale `resourceVersion` returns `Conflict`
//! - Services get a cluster IP on create, and a replace that changes it is
//!   rejected
//!
//! Every call is recorded with its outcome, and failures can be injected per
//! operation, kind and name.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;

use super::client::{ClientError, ObjectKind, WorkloadClient};

/// Client operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create
    Create,
    /// Read
    Get,
    /// Replace
    Replace,
    /// Delete
    Delete,
}

/// Outcome of a recorded call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallResult {
    /// Succeeded
    Ok,
    /// Object did not exist
    NotFound,
    /// Object already existed, or a stale write
    Conflict,
    /// Injected or validation failure
    Failed,
}

impl CallResult {
    fn of<T>(result: &Result<T, ClientError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(ClientError::NotFound { .. }) => Self::NotFound,
            Err(ClientError::Conflict { .. }) => Self::Conflict,
            Err(ClientError::Other { .. }) => Self::Failed,
        }
    }
}

/// One call made against the in-memory cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    /// Operation
    pub operation: Operation,
    /// Object kind
    pub kind: ObjectKind,
    /// Namespace
    pub namespace: String,
    /// Object name
    pub name: String,
    /// What the call returned
    pub result: CallResult,
}

type ObjectKey = (String, String);
type FailureKey = (Operation, ObjectKind, String);

#[derive(Default)]
struct State {
    deployments: BTreeMap<ObjectKey, Deployment>,
    services: BTreeMap<ObjectKey, Service>,
    calls: Vec<RecordedCall>,
    failures: HashMap<FailureKey, String>,
    resource_version: u64,
    next_ip: u32,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn allocate_cluster_ip(&mut self) -> String {
        self.next_ip += 1;
        format!("10.96.{}.{}", self.next_ip / 250, self.next_ip % 250 + 1)
    }

    fn injected(&self, operation: Operation, kind: ObjectKind, name: &str) -> Option<ClientError> {
        self.failures
            .get(&(operation, kind, name.to_string()))
            .map(|message| ClientError::other(kind, name, message.clone()))
    }

    fn record<T>(
        &mut self,
        operation: Operation,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        result: &Result<T, ClientError>,
    ) {
        self.calls.push(RecordedCall {
            operation,
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            result: CallResult::of(result),
        });
    }
}

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn stamp(meta: &mut ObjectMeta, namespace: &str, resource_version: String) {
    meta.namespace = Some(namespace.to_string());
    meta.resource_version = Some(resource_version);
}

/// Workload client backed by in-process maps
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `operation` on `kind`/`name` fail with `message` until
    /// cleared
    pub fn fail(&self, operation: Operation, kind: ObjectKind, name: &str, message: &str) {
        self.state
            .lock()
            .failures
            .insert((operation, kind, name.to_string()), message.to_string());
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Store a Deployment directly, as if created out of band. Not recorded.
    pub fn insert_deployment(&self, namespace: &str, mut deployment: Deployment) {
        let mut state = self.state.lock();
        let rv = state.next_resource_version();
        stamp(&mut deployment.metadata, namespace, rv);
        let name = deployment.metadata.name.clone().unwrap_or_default();
        state.deployments.insert(key(namespace, &name), deployment);
    }

    /// Store a Service directly, as if created out of band. Not recorded.
    ///
    /// A cluster IP is allocated if the Service has none.
    pub fn insert_service(&self, namespace: &str, mut service: Service) {
        let mut state = self.state.lock();
        let rv = state.next_resource_version();
        stamp(&mut service.metadata, namespace, rv);
        let spec = service.spec.get_or_insert_with(Default::default);
        if spec.cluster_ip.is_none() {
            let ip = state.allocate_cluster_ip();
            spec.cluster_ips = Some(vec![ip.clone()]);
            spec.cluster_ip = Some(ip);
        }
        let name = service.metadata.name.clone().unwrap_or_default();
        state.services.insert(key(namespace, &name), service);
    }

    /// Current Deployment, if present
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state.lock().deployments.get(&key(namespace, name)).cloned()
    }

    /// Current Service, if present
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state.lock().services.get(&key(namespace, name)).cloned()
    }

    /// Number of stored Deployments
    pub fn deployment_count(&self) -> usize {
        self.state.lock().deployments.len()
    }

    /// Number of stored Services
    pub fn service_count(&self) -> usize {
        self.state.lock().services.len()
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Calls of one operation on one kind, in order
    pub fn calls_for(&self, operation: Operation, kind: ObjectKind) -> Vec<RecordedCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation && c.kind == kind)
            .cloned()
            .collect()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

#[async_trait]
impl WorkloadClient for InMemoryCluster {
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let kind = ObjectKind::Deployment;

        let result = if let Some(err) = state.injected(Operation::Create, kind, &name) {
            Err(err)
        } else if state.deployments.contains_key(&key(namespace, &name)) {
            Err(ClientError::conflict(kind, &name))
        } else {
            let mut stored = deployment.clone();
            let rv = state.next_resource_version();
            stamp(&mut stored.metadata, namespace, rv);
            state.deployments.insert(key(namespace, &name), stored);
            Ok(())
        };

        state.record(Operation::Create, kind, namespace, &name, &result);
        result
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, ClientError> {
        let mut state = self.state.lock();
        let kind = ObjectKind::Deployment;

        let result = match state.injected(Operation::Get, kind, name) {
            Some(err) => Err(err),
            None => state
                .deployments
                .get(&key(namespace, name))
                .cloned()
                .ok_or_else(|| ClientError::not_found(kind, name)),
        };

        state.record(Operation::Get, kind, namespace, name, &result);
        result
    }

    async fn replace_deployment(
        &self,
        name: &str,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        let kind = ObjectKind::Deployment;

        let is_stale = state
            .deployments
            .get(&key(namespace, name))
            .map(|live| stale(&live.metadata, &deployment.metadata));

        let result = match state.injected(Operation::Replace, kind, name) {
            Some(err) => Err(err),
            None => match is_stale {
                None => Err(ClientError::not_found(kind, name)),
                Some(true) => Err(ClientError::conflict(kind, name)),
                Some(false) => {
                    let mut stored = deployment.clone();
                    let rv = state.next_resource_version();
                    stamp(&mut stored.metadata, namespace, rv);
                    state.deployments.insert(key(namespace, name), stored);
                    Ok(())
                }
            },
        };

        state.record(Operation::Replace, kind, namespace, name, &result);
        result
    }

    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        let kind = ObjectKind::Deployment;

        let result = match state.injected(Operation::Delete, kind, name) {
            Some(err) => Err(err),
            None => state
                .deployments
                .remove(&key(namespace, name))
                .map(|_| ())
                .ok_or_else(|| ClientError::not_found(kind, name)),
        };

        state.record(Operation::Delete, kind, namespace, name, &result);
        result
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        let name = service.metadata.name.clone().unwrap_or_default();
        let kind = ObjectKind::Service;

        let result = if let Some(err) = state.injected(Operation::Create, kind, &name) {
            Err(err)
        } else if state.services.contains_key(&key(namespace, &name)) {
            Err(ClientError::conflict(kind, &name))
        } else {
            let mut stored = service.clone();
            let rv = state.next_resource_version();
            stamp(&mut stored.metadata, namespace, rv);
            let ip = state.allocate_cluster_ip();
            let spec = stored.spec.get_or_insert_with(Default::default);
            spec.cluster_ips = Some(vec![ip.clone()]);
            spec.cluster_ip = Some(ip);
            state.services.insert(key(namespace, &name), stored);
            Ok(())
        };

        state.record(Operation::Create, kind, namespace, &name, &result);
        result
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Service, ClientError> {
        let mut state = self.state.lock();
        let kind = ObjectKind::Service;

        let result = match state.injected(Operation::Get, kind, name) {
            Some(err) => Err(err),
            None => state
                .services
                .get(&key(namespace, name))
                .cloned()
                .ok_or_else(|| ClientError::not_found(kind, name)),
        };

        state.record(Operation::Get, kind, namespace, name, &result);
        result
    }

    async fn replace_service(
        &self,
        name: &str,
        namespace: &str,
        service: &Service,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        let kind = ObjectKind::Service;

        let check = state.services.get(&key(namespace, name)).map(|live| {
            (
                stale(&live.metadata, &service.metadata),
                cluster_ip(live) != cluster_ip(service),
            )
        });

        let result = match state.injected(Operation::Replace, kind, name) {
            Some(err) => Err(err),
            None => match check {
                None => Err(ClientError::not_found(kind, name)),
                Some((true, _)) => Err(ClientError::conflict(kind, name)),
                Some((false, true)) => Err(ClientError::other(
                    kind,
                    name,
                    "spec.clusterIP: Invalid value: field is immutable",
                )),
                Some((false, false)) => {
                    let mut stored = service.clone();
                    let rv = state.next_resource_version();
                    stamp(&mut stored.metadata, namespace, rv);
                    state.services.insert(key(namespace, name), stored);
                    Ok(())
                }
            },
        };

        state.record(Operation::Replace, kind, namespace, name, &result);
        result
    }

    async fn delete_service(&self, name: &str, namespace: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        let kind = ObjectKind::Service;

        let result = match state.injected(Operation::Delete, kind, name) {
            Some(err) => Err(err),
            None => state
                .services
                .remove(&key(namespace, name))
                .map(|_| ())
                .ok_or_else(|| ClientError::not_found(kind, name)),
        };

        state.record(Operation::Delete, kind, namespace, name, &result);
        result
    }
}

/// A write is stale when it carries a resourceVersion that is not current
fn stale(live: &ObjectMeta, incoming: &ObjectMeta) -> bool {
    incoming
        .resource_version
        .as_ref()
        .is_some_and(|rv| live.resource_version.as_ref() != Some(rv))
}

fn cluster_ip(service: &Service) -> Option<&str> {
    service.spec.as_ref().and_then(|s| s.cluster_ip.as_deref())
}
