//! Resource synthesizer
//!
//! Builds the Deployment and Service for a compiled workload. Both objects
//! share name, namespace, labels and owner references; both select pods by
//! `app=<component>`.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{ManagedObjects, WorkloadDefinition, LABEL_APP};

/// Name of the Service port exposing `port`
pub fn service_port_name(port: i32) -> String {
    format!("port-{}", port)
}

/// Synthesize the Deployment and Service for a workload definition.
///
/// Deterministic: the same definition always yields the same objects.
pub fn synthesize(def: &WorkloadDefinition) -> ManagedObjects {
    ManagedObjects {
        deployment: build_deployment(def),
        service: build_service(def),
    }
}

fn object_meta(def: &WorkloadDefinition) -> ObjectMeta {
    ObjectMeta {
        name: Some(def.name.clone()),
        namespace: Some(def.namespace.clone()),
        labels: Some(def.labels.clone()),
        owner_references: if def.owner_references.is_empty() {
            None
        } else {
            Some(def.owner_references.clone())
        },
        ..Default::default()
    }
}

fn selector(def: &WorkloadDefinition) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_APP.to_string(), def.component.clone())])
}

fn build_deployment(def: &WorkloadDefinition) -> Deployment {
    let volumes = if def.volumes.is_empty() {
        None
    } else {
        Some(def.volumes.clone())
    };

    Deployment {
        metadata: object_meta(def),
        spec: Some(DeploymentSpec {
            replicas: Some(def.replicas),
            selector: LabelSelector {
                match_labels: Some(selector(def)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(def.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![def.container.clone()],
                    security_context: def.pod_security_context.clone(),
                    service_account_name: def.service_account_name.clone(),
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_service(def: &WorkloadDefinition) -> Service {
    let ports: Vec<ServicePort> = def
        .ports
        .iter()
        .map(|&port| ServicePort {
            name: Some(service_port_name(port)),
            port,
            target_port: Some(IntOrString::Int(port)),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: object_meta(def),
        spec: Some(ServiceSpec {
            selector: Some(selector(def)),
            ports: if ports.is_empty() { None } else { Some(ports) },
            type_: Some(def.service_type.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ComponentSpec, VolumeSpec};
    use crate::workload::compile_workload;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "alfresco.community.com/v1".to_string(),
            kind: "Alfresco".to_string(),
            name: "acs".to_string(),
            uid: "uid-1234".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn objects(key: &str, spec: &ComponentSpec) -> ManagedObjects {
        synthesize(&compile_workload(key, spec, "acs", &[owner()]))
    }

    /// Story: postgres:15 on 5432 yields a port-5432 Service and a
    /// Deployment running as UID/GID 999.
    #[test]
    fn story_postgres_component() {
        let spec = ComponentSpec {
            image: "postgres:15".to_string(),
            ports: vec![5432],
            replicas: 1,
            ..Default::default()
        };
        let objs = objects("postgres", &spec);

        let svc_spec = objs.service.spec.unwrap();
        let ports = svc_spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("port-5432"));
        assert_eq!(ports[0].port, 5432);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(5432)));
        assert_eq!(svc_spec.type_.as_deref(), Some("ClusterIP"));

        let pod = objs.deployment.spec.unwrap().template.spec.unwrap();
        let pod_sc = pod.security_context.unwrap();
        assert_eq!(pod_sc.run_as_user, Some(999));
        assert_eq!(pod_sc.run_as_group, Some(999));
        let container_sc = pod.containers[0].security_context.clone().unwrap();
        assert_eq!(container_sc.run_as_user, Some(999));
        assert_eq!(container_sc.run_as_group, Some(999));
    }

    #[test]
    fn selector_matches_template_labels() {
        let spec = ComponentSpec {
            name: Some("acs-share".to_string()),
            image: "alfresco/alfresco-share:23.2.0".to_string(),
            replicas: 3,
            ..Default::default()
        };
        let objs = objects("share", &spec);
        let deploy_spec = objs.deployment.spec.unwrap();

        assert_eq!(deploy_spec.replicas, Some(3));
        let match_labels = deploy_spec.selector.match_labels.unwrap();
        assert_eq!(match_labels.get("app").map(String::as_str), Some("share"));

        let template_labels = deploy_spec.template.metadata.unwrap().labels.unwrap();
        for (k, v) in &match_labels {
            assert_eq!(template_labels.get(k), Some(v));
        }

        assert_eq!(
            objs.service.spec.unwrap().selector.unwrap(),
            match_labels
        );
    }

    #[test]
    fn both_objects_share_identity_and_owner() {
        let spec = ComponentSpec {
            name: Some("acs-repo".to_string()),
            image: "alfresco/alfresco-content-repository-community:23.2.0".to_string(),
            ..Default::default()
        };
        let objs = objects("alfresco", &spec);

        for meta in [&objs.deployment.metadata, &objs.service.metadata] {
            assert_eq!(meta.name.as_deref(), Some("acs-repo"));
            assert_eq!(meta.namespace.as_deref(), Some("acs"));
            assert_eq!(
                meta.labels.as_ref().and_then(|l| l.get("alfresco-component")),
                Some(&"alfresco".to_string())
            );
            let owners = meta.owner_references.as_ref().unwrap();
            assert_eq!(owners.len(), 1);
            assert_eq!(owners[0].controller, Some(true));
            assert_eq!(owners[0].block_owner_deletion, Some(true));
            assert_eq!(owners[0].uid, "uid-1234");
        }
    }

    #[test]
    fn service_type_and_multiple_ports() {
        let spec = ComponentSpec {
            image: "alfresco/alfresco-content-app:4.4.0".to_string(),
            ports: vec![80, 443],
            service_type: "LoadBalancer".to_string(),
            ..Default::default()
        };
        let svc_spec = objects("content-app", &spec).service.spec.unwrap();

        assert_eq!(svc_spec.type_.as_deref(), Some("LoadBalancer"));
        let names: Vec<_> = svc_spec
            .ports
            .unwrap()
            .into_iter()
            .filter_map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["port-80", "port-443"]);
    }

    #[test]
    fn pod_spec_carries_volumes_and_service_account() {
        let spec = ComponentSpec {
            image: "alfresco/alfresco-content-repository-community:23.2.0".to_string(),
            service_account_name: Some("alfresco".to_string()),
            volumes: vec![VolumeSpec {
                name: Some("data".to_string()),
                mount_path: Some("/usr/local/tomcat/alf_data".to_string()),
                existing_claim: Some("acs-data".to_string()),
            }],
            ..Default::default()
        };
        let pod = objects("alfresco", &spec)
            .deployment
            .spec
            .unwrap()
            .template
            .spec
            .unwrap();

        assert_eq!(pod.service_account_name.as_deref(), Some("alfresco"));
        assert_eq!(pod.volumes.unwrap()[0].name, "data");
        assert!(pod.security_context.is_none());
    }

    #[test]
    fn synthesis_is_deterministic() {
        let spec: ComponentSpec = serde_json::from_value(serde_json::json!({
            "image": "alfresco/alfresco-content-repository-community:23.2.0",
            "replicas": 2,
            "environment": {"JAVA_OPTS": "-Xmx2g", "DB_HOST": "postgres"},
            "ports": [8080, 8443],
            "command": ["--verbose"],
            "resources": {"limits": {"memory": "4Gi"}},
            "readinessProbe": {"httpGet": {"path": "/ready", "port": 8080}},
            "livenessProbe": {"tcpSocket": {"port": 8080}},
            "volumes": [{"name": "data", "mountPath": "/data", "existingClaim": "acs-data"}]
        }))
        .unwrap();

        let first = serde_json::to_vec(&objects("alfresco", &spec)).unwrap();
        let second = serde_json::to_vec(&objects("alfresco", &spec)).unwrap();
        assert_eq!(first, second);
    }
}
