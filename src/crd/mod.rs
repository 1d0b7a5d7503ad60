//! Custom Resource Definitions for the Alfresco operator

mod alfresco;
mod component;

pub use alfresco::{Alfresco, AlfrescoPhase, AlfrescoSpec, AlfrescoStatus, ComponentStatus};
pub use component::{
    ComponentSpec, ExecProbe, HttpGetProbe, ProbeSpec, ResourceSpec, TcpSocketProbe,
    VolumeBinding, VolumeSpec, DEFAULT_FAILURE_THRESHOLD, DEFAULT_INITIAL_DELAY_SECONDS,
    DEFAULT_PERIOD_SECONDS, DEFAULT_REPLICAS, DEFAULT_SERVICE_TYPE, DEFAULT_SUCCESS_THRESHOLD,
    DEFAULT_TIMEOUT_SECONDS,
};
