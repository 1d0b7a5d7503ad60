//! Alfresco operator - compiles Alfresco component specs into Kubernetes workloads
//!
//! An `Alfresco` resource declares a map of named components (repository,
//! share, postgres, solr, ...). The operator keeps one Deployment and one
//! Service per component in line with that declaration.
//!
//! # Modules
//!
//! - [`crd`] - The Alfresco Custom Resource Definition and component types
//! - [`workload`] - Pure compilation of components into Deployments and Services
//! - [`controller`] - Reconciler, cluster clients and the controller entry points
//! - [`config`] - Command-line and environment configuration
//! - [`telemetry`] - Logging initialization
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
