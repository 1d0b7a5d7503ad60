//! Component specification types
//!
//! One `ComponentSpec` per entry in the `Alfresco` spec map. These are the wire
//! types read from the cluster; the workload compiler turns them into
//! Kubernetes primitives.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default replica count when `replicas` is omitted
pub const DEFAULT_REPLICAS: i32 = 1;

/// Default Service type when `serviceType` is omitted
pub const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";

fn default_replicas() -> i32 {
    DEFAULT_REPLICAS
}

fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}

// =============================================================================
// Component
// =============================================================================

/// Declarative specification of one Alfresco component (repository, share,
/// postgres, solr, ...).
///
/// Compiled into exactly one Deployment and one Service.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Object name override. Defaults to the component's key in the spec map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Container image
    pub image: String,

    /// Desired replica count. Non-positive values are passed through as-is.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Environment variables (name -> value)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Ports exposed by the container and the Service (same number on both)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<i32>,

    /// Service type (ClusterIP, NodePort, LoadBalancer)
    #[serde(default = "default_service_type", alias = "service_type")]
    pub service_type: String,

    /// Container arguments. Never overrides the image entrypoint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Resource limits and requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,

    /// Readiness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ProbeSpec>,

    /// Liveness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<ProbeSpec>,

    /// Volumes backed by existing PersistentVolumeClaims
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,

    /// Service account for the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

impl Default for ComponentSpec {
    fn default() -> Self {
        Self {
            name: None,
            image: String::new(),
            replicas: DEFAULT_REPLICAS,
            environment: BTreeMap::new(),
            ports: Vec::new(),
            service_type: default_service_type(),
            command: Vec::new(),
            resources: None,
            readiness_probe: None,
            liveness_probe: None,
            volumes: Vec::new(),
            service_account_name: None,
        }
    }
}

impl ComponentSpec {
    /// Name of the managed Deployment and Service for this component.
    ///
    /// Stable across create/update/delete for a given key and spec.
    pub fn object_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(key)
    }
}

/// Resource limits and requests (resource name -> quantity string)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceSpec {
    /// Resource limits (e.g. `cpu: "2"`, `memory: "4Gi"`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,

    /// Resource requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

impl ResourceSpec {
    /// True when neither limits nor requests are set
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.requests.is_empty()
    }
}

// =============================================================================
// Probes
// =============================================================================

/// Default seconds before the first probe
pub const DEFAULT_INITIAL_DELAY_SECONDS: i32 = 10;
/// Default seconds between probes
pub const DEFAULT_PERIOD_SECONDS: i32 = 10;
/// Default consecutive failures before the probe fails
pub const DEFAULT_FAILURE_THRESHOLD: i32 = 3;
/// Default probe timeout in seconds
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 1;
/// Default consecutive successes before the probe passes
pub const DEFAULT_SUCCESS_THRESHOLD: i32 = 1;

/// Health check declaration.
///
/// Exactly one of `httpGet`, `exec`, `tcpSocket` is expected. When several are
/// present the first in that order wins; when none is present the probe is
/// dropped.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSpec {
    /// HTTP GET check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGetProbe>,

    /// Command executed inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecProbe>,

    /// TCP connect check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_socket: Option<TcpSocketProbe>,

    /// Seconds after container start before probes begin (default 10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,

    /// Seconds between probe attempts (default 10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,

    /// Consecutive failures before marking unhealthy (default 3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,

    /// Seconds before the probe times out (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,

    /// Consecutive successes before marking healthy (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<i32>,
}

/// HTTP GET probe target
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HttpGetProbe {
    /// Request path
    pub path: String,
    /// Container port
    pub port: i32,
}

/// Exec probe command
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ExecProbe {
    /// Command and arguments
    pub command: Vec<String>,
}

/// TCP socket probe target
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TcpSocketProbe {
    /// Container port
    pub port: i32,
}

// =============================================================================
// Volumes
// =============================================================================

/// Volume backed by an existing PersistentVolumeClaim.
///
/// All three fields are optional on the wire; an entry missing any of them is
/// skipped by the compiler rather than rejected.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Volume name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Mount path inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,

    /// Name of the existing PVC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_claim: Option<String>,
}

/// A fully specified volume entry
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeBinding<'a> {
    /// Volume name
    pub name: &'a str,
    /// Mount path inside the container
    pub mount_path: &'a str,
    /// Name of the existing PVC
    pub claim_name: &'a str,
}

impl VolumeSpec {
    /// Returns the binding if `name`, `mountPath` and `existingClaim` are all
    /// present and non-empty.
    pub fn binding(&self) -> Option<VolumeBinding<'_>> {
        fn present(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.is_empty())
        }

        Some(VolumeBinding {
            name: present(&self.name)?,
            mount_path: present(&self.mount_path)?,
            claim_name: present(&self.existing_claim)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_omitted() {
        let spec: ComponentSpec = serde_json::from_value(serde_json::json!({
            "image": "alfresco/alfresco-content-repository-community:23.2.0"
        }))
        .unwrap();

        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.service_type, "ClusterIP");
        assert!(spec.ports.is_empty());
        assert!(spec.command.is_empty());
        assert!(spec.readiness_probe.is_none());
        assert_eq!(spec, ComponentSpec {
            image: "alfresco/alfresco-content-repository-community:23.2.0".to_string(),
            ..Default::default()
        });
    }

    #[test]
    fn parses_full_component() {
        let spec: ComponentSpec = serde_json::from_value(serde_json::json!({
            "name": "acs-repo",
            "image": "alfresco/alfresco-content-repository-community:23.2.0",
            "replicas": 2,
            "environment": {"JAVA_OPTS": "-Xmx2g"},
            "ports": [8080],
            "serviceType": "NodePort",
            "command": ["--verbose"],
            "resources": {"limits": {"memory": "4Gi"}, "requests": {"cpu": "500m"}},
            "readinessProbe": {"httpGet": {"path": "/alfresco/api/-default-/public/alfresco/versions/1/probes/-ready-", "port": 8080}},
            "volumes": [{"name": "data", "mountPath": "/usr/local/tomcat/alf_data", "existingClaim": "acs-data"}],
            "serviceAccountName": "alfresco"
        }))
        .unwrap();

        assert_eq!(spec.object_name("alfresco"), "acs-repo");
        assert_eq!(spec.replicas, 2);
        assert_eq!(spec.service_type, "NodePort");
        assert_eq!(spec.ports, vec![8080]);
        let resources = spec.resources.unwrap();
        assert_eq!(resources.limits.get("memory").map(String::as_str), Some("4Gi"));
        assert_eq!(resources.requests.get("cpu").map(String::as_str), Some("500m"));
        assert_eq!(spec.readiness_probe.unwrap().http_get.unwrap().port, 8080);
        assert_eq!(spec.service_account_name.as_deref(), Some("alfresco"));
    }

    #[test]
    fn snake_case_service_type_is_accepted() {
        let spec: ComponentSpec = serde_json::from_value(serde_json::json!({
            "image": "nginx",
            "service_type": "LoadBalancer"
        }))
        .unwrap();
        assert_eq!(spec.service_type, "LoadBalancer");
    }

    #[test]
    fn object_name_falls_back_to_key() {
        let spec = ComponentSpec::default();
        assert_eq!(spec.object_name("share"), "share");
    }

    #[test]
    fn probe_timing_absent_stays_absent() {
        let probe: ProbeSpec =
            serde_json::from_value(serde_json::json!({"tcpSocket": {"port": 5432}})).unwrap();
        assert!(probe.initial_delay_seconds.is_none());
        assert!(probe.period_seconds.is_none());
        assert_eq!(probe.tcp_socket.unwrap().port, 5432);
    }

    #[test]
    fn volume_binding_requires_all_fields() {
        let full = VolumeSpec {
            name: Some("data".into()),
            mount_path: Some("/data".into()),
            existing_claim: Some("pvc-data".into()),
        };
        assert_eq!(
            full.binding(),
            Some(VolumeBinding {
                name: "data",
                mount_path: "/data",
                claim_name: "pvc-data",
            })
        );

        let missing_claim = VolumeSpec {
            existing_claim: None,
            ..full.clone()
        };
        assert!(missing_claim.binding().is_none());

        let empty_path = VolumeSpec {
            mount_path: Some(String::new()),
            ..full
        };
        assert!(empty_path.binding().is_none());
    }
}
