//! Alfresco Custom Resource Definition
//!
//! An `Alfresco` resource declares a set of named components. Each component is
//! compiled into one Deployment and one Service owned by the resource.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Metadata, ObjectValidation, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::ComponentSpec;

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of an Alfresco resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub enum AlfrescoPhase {
    /// Workloads have not been created yet
    #[default]
    Pending,
    /// Every component's Deployment and Service were applied
    Ready,
    /// At least one component failed to apply; others were applied
    Degraded,
    /// Workload creation failed and will be retried
    Failed,
}

impl std::fmt::Display for AlfrescoPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// CRD
// =============================================================================

/// Specification for an Alfresco deployment: component key -> component spec
///
/// ```yaml
/// apiVersion: alfresco.community.com/v1
/// kind: Alfresco
/// metadata:
///   name: acs
/// spec:
///   postgres:
///     image: postgres:15
///     ports: [5432]
///   alfresco:
///     image: alfresco/alfresco-content-repository-community:23.2.0
///     ports: [8080]
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "alfresco.community.com",
    version = "v1",
    kind = "Alfresco",
    plural = "alfrescos",
    shortname = "alf",
    namespaced,
    status = "AlfrescoStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.message"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct AlfrescoSpec {
    /// Components keyed by name
    #[serde(flatten)]
    pub components: BTreeMap<String, ComponentSpec>,
}

impl JsonSchema for AlfrescoSpec {
    fn schema_name() -> String {
        "AlfrescoSpec".to_string()
    }

    // The spec is the component map itself, so the apiserver must see it as an
    // object whose values are components. Component objects keep unknown keys
    // so the `service_type` spelling survives pruning.
    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        let mut component = ComponentSpec::json_schema(gen).into_object();
        component.extensions.insert(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        );

        Schema::Object(SchemaObject {
            instance_type: Some(InstanceType::Object.into()),
            metadata: Some(Box::new(Metadata {
                description: Some("Alfresco components keyed by name".to_string()),
                ..Default::default()
            })),
            object: Some(Box::new(ObjectValidation {
                additional_properties: Some(Box::new(Schema::Object(component))),
                ..Default::default()
            })),
            ..Default::default()
        })
    }
}

/// Status for an Alfresco resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlfrescoStatus {
    /// Current phase
    #[serde(default)]
    pub phase: AlfrescoPhase,

    /// Generation of the spec last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable summary of the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Per-component outcome of the last pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentStatus>,
}

/// Outcome of the last pass for one component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Component key
    pub component: String,
    /// Name of the managed Deployment and Service
    pub name: String,
    /// Deployment outcome
    pub deployment: String,
    /// Service outcome
    pub service: String,
}
