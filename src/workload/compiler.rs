//! Workload compiler
//!
//! Turns one component declaration into a [`WorkloadDefinition`]. Pure: no
//! cluster access, no failure modes. Malformed optional pieces (probes without
//! a check, partial volume entries) are dropped rather than rejected.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaimVolumeSource, ResourceRequirements,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;

use super::probe::build_probe;
use super::security::security_profile_for_image;
use super::{component_labels, WorkloadDefinition};
use crate::crd::{ComponentSpec, ResourceSpec, VolumeSpec};

/// Compile a component declaration into its workload definition.
///
/// `key` is the component's key in the parent spec map; it names the
/// container and drives the labels. The object name is `spec.name` when set.
pub fn compile_workload(
    key: &str,
    spec: &ComponentSpec,
    namespace: &str,
    owner_references: &[OwnerReference],
) -> WorkloadDefinition {
    let security = security_profile_for_image(&spec.image);
    let (volumes, volume_mounts) = bind_volumes(key, &spec.volumes);

    let container = Container {
        name: key.to_string(),
        image: Some(spec.image.clone()),
        // Arguments only, so the image entrypoint is kept.
        args: non_empty(spec.command.clone()),
        env: non_empty(env_vars(&spec.environment)),
        ports: non_empty(container_ports(&spec.ports)),
        resources: spec.resources.as_ref().and_then(resource_requirements),
        security_context: security.container,
        readiness_probe: build_probe(spec.readiness_probe.as_ref()),
        liveness_probe: build_probe(spec.liveness_probe.as_ref()),
        volume_mounts: non_empty(volume_mounts),
        ..Default::default()
    };

    WorkloadDefinition {
        component: key.to_string(),
        name: spec.object_name(key).to_string(),
        namespace: namespace.to_string(),
        replicas: spec.replicas,
        container,
        pod_security_context: security.pod,
        volumes,
        service_account_name: spec.service_account_name.clone(),
        labels: component_labels(key),
        owner_references: owner_references.to_vec(),
        ports: spec.ports.clone(),
        service_type: spec.service_type.clone(),
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn env_vars(environment: &BTreeMap<String, String>) -> Vec<EnvVar> {
    environment
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect()
}

fn container_ports(ports: &[i32]) -> Vec<ContainerPort> {
    ports
        .iter()
        .map(|&port| ContainerPort {
            container_port: port,
            ..Default::default()
        })
        .collect()
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(name, qty)| (name.clone(), Quantity(qty.clone())))
            .collect(),
    )
}

fn resource_requirements(resources: &ResourceSpec) -> Option<ResourceRequirements> {
    if resources.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        limits: quantities(&resources.limits),
        requests: quantities(&resources.requests),
        ..Default::default()
    })
}

fn bind_volumes(key: &str, specs: &[VolumeSpec]) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();

    for (index, spec) in specs.iter().enumerate() {
        let Some(binding) = spec.binding() else {
            debug!(component = %key, index, "skipping incomplete volume entry");
            continue;
        };

        volumes.push(Volume {
            name: binding.name.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: binding.claim_name.to_string(),
                read_only: None,
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: binding.name.to_string(),
            mount_path: binding.mount_path.to_string(),
            ..Default::default()
        });
    }

    (volumes, mounts)
}
