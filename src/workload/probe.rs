//! Probe builder
//!
//! Maps a declared `ProbeSpec` onto a Kubernetes `Probe`. The check variant is
//! resolved through [`ProbeCheck`]; timing fields are shared by all variants.

use k8s_openapi::api::core::v1::{ExecAction, HTTPGetAction, Probe, TCPSocketAction};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::{
    ProbeSpec, DEFAULT_FAILURE_THRESHOLD, DEFAULT_INITIAL_DELAY_SECONDS, DEFAULT_PERIOD_SECONDS,
    DEFAULT_SUCCESS_THRESHOLD, DEFAULT_TIMEOUT_SECONDS,
};

/// The single active check of a probe
#[derive(Clone, Debug, PartialEq)]
pub enum ProbeCheck {
    /// HTTP GET against a container port
    HttpGet {
        /// Request path
        path: String,
        /// Container port
        port: i32,
    },
    /// Command executed in the container
    Exec {
        /// Command and arguments
        command: Vec<String>,
    },
    /// TCP connect to a container port
    TcpSocket {
        /// Container port
        port: i32,
    },
}

impl ProbeCheck {
    /// Resolve the check declared by a probe spec.
    ///
    /// Priority when several variants are set: HTTP, then exec, then TCP.
    pub fn from_spec(spec: &ProbeSpec) -> Option<Self> {
        if let Some(http) = &spec.http_get {
            return Some(Self::HttpGet {
                path: http.path.clone(),
                port: http.port,
            });
        }
        if let Some(exec) = &spec.exec {
            return Some(Self::Exec {
                command: exec.command.clone(),
            });
        }
        spec.tcp_socket
            .as_ref()
            .map(|tcp| Self::TcpSocket { port: tcp.port })
    }
}

/// Timing fields with defaults applied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeTiming {
    /// Seconds before the first probe
    pub initial_delay_seconds: i32,
    /// Seconds between probes
    pub period_seconds: i32,
    /// Consecutive failures before unhealthy
    pub failure_threshold: i32,
    /// Probe timeout
    pub timeout_seconds: i32,
    /// Consecutive successes before healthy
    pub success_threshold: i32,
}

impl From<&ProbeSpec> for ProbeTiming {
    fn from(spec: &ProbeSpec) -> Self {
        Self {
            initial_delay_seconds: spec
                .initial_delay_seconds
                .unwrap_or(DEFAULT_INITIAL_DELAY_SECONDS),
            period_seconds: spec.period_seconds.unwrap_or(DEFAULT_PERIOD_SECONDS),
            failure_threshold: spec.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            timeout_seconds: spec.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            success_threshold: spec.success_threshold.unwrap_or(DEFAULT_SUCCESS_THRESHOLD),
        }
    }
}

/// Build a Kubernetes probe from an optional declaration.
///
/// Returns `None` for an absent declaration or one without a recognized check.
pub fn build_probe(spec: Option<&ProbeSpec>) -> Option<Probe> {
    let spec = spec?;
    let check = ProbeCheck::from_spec(spec)?;
    let timing = ProbeTiming::from(spec);

    let mut probe = Probe {
        initial_delay_seconds: Some(timing.initial_delay_seconds),
        period_seconds: Some(timing.period_seconds),
        failure_threshold: Some(timing.failure_threshold),
        timeout_seconds: Some(timing.timeout_seconds),
        success_threshold: Some(timing.success_threshold),
        ..Default::default()
    };

    match check {
        ProbeCheck::HttpGet { path, port } => {
            probe.http_get = Some(HTTPGetAction {
                path: Some(path),
                port: IntOrString::Int(port),
                ..Default::default()
            });
        }
        ProbeCheck::Exec { command } => {
            probe.exec = Some(ExecAction {
                command: Some(command),
            });
        }
        ProbeCheck::TcpSocket { port } => {
            probe.tcp_socket = Some(TCPSocketAction {
                port: IntOrString::Int(port),
                host: None,
            });
        }
    }

    Some(probe)
}
