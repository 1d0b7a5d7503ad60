//! Command-line and environment configuration

use std::time::Duration;

use clap::Parser;

use crate::telemetry::{LogFormat, TelemetryConfig};

/// Default field manager for server-side apply and patches
pub const DEFAULT_FIELD_MANAGER: &str = "alfresco-operator";

/// Alfresco operator - compiles Alfresco resources into Deployments and Services
#[derive(Parser, Debug, Clone)]
#[command(name = "alfresco-operator", version, about, long_about = None)]
pub struct Config {
    /// Print the Alfresco CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Namespace to watch
    #[arg(long, env = "ALFRESCO_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Watch Alfresco resources in every namespace
    #[arg(long, conflicts_with = "namespace")]
    pub all_namespaces: bool,

    /// Field manager name used for patches
    #[arg(long, env = "ALFRESCO_FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    pub field_manager: String,

    /// Seconds between resyncs of a healthy resource
    #[arg(long, env = "ALFRESCO_RESYNC_SECS", default_value_t = 300)]
    pub resync_secs: u64,

    /// Seconds before retrying a failed reconciliation
    #[arg(long, env = "ALFRESCO_ERROR_REQUEUE_SECS", default_value_t = 30)]
    pub error_requeue_secs: u64,

    /// Do not install or update the CRD on startup
    #[arg(long)]
    pub skip_crd_install: bool,

    /// Log output format
    #[arg(long, env = "ALFRESCO_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Log filter directive (overrides RUST_LOG)
    #[arg(long)]
    pub log_filter: Option<String>,
}

impl Config {
    /// Namespace to watch, or `None` for all namespaces
    pub fn watch_namespace(&self) -> Option<&str> {
        if self.all_namespaces {
            None
        } else {
            Some(&self.namespace)
        }
    }

    /// Requeue interval after a successful pass
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    /// Requeue interval after a failed pass
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// Telemetry settings
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            format: self.log_format,
            filter: self.log_filter.clone(),
        }
    }
}
