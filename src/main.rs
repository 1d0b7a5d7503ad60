//! Alfresco Operator - runs the Alfresco controller

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use alfresco_operator::config::Config;
use alfresco_operator::controller::{error_policy, reconcile, Context};
use alfresco_operator::crd::Alfresco;
use alfresco_operator::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    if config.crd {
        let crd = serde_yaml::to_string(&Alfresco::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(config.telemetry())?;

    run_controller(config).await
}

/// Ensure the Alfresco CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply, so
/// the schema always matches the operator version.
async fn ensure_crds_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    tracing::info!("Installing Alfresco CRD...");
    crds.patch(
        "alfrescos.alfresco.community.com",
        &params,
        &Patch::Apply(&Alfresco::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Alfresco CRD: {}", e))?;

    tracing::info!("Alfresco CRD installed/updated");
    Ok(())
}

async fn run_controller(config: Config) -> anyhow::Result<()> {
    tracing::info!("Alfresco controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if config.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        ensure_crds_installed(&client, &config.field_manager).await?;
    }

    let (alfrescos, deployments, services) = match config.watch_namespace() {
        Some(namespace) => {
            tracing::info!(namespace, "watching Alfresco resources");
            (
                Api::<Alfresco>::namespaced(client.clone(), namespace),
                Api::<Deployment>::namespaced(client.clone(), namespace),
                Api::<Service>::namespaced(client.clone(), namespace),
            )
        }
        None => {
            tracing::info!("watching Alfresco resources in all namespaces");
            (
                Api::<Alfresco>::all(client.clone()),
                Api::<Deployment>::all(client.clone()),
                Api::<Service>::all(client.clone()),
            )
        }
    };

    let ctx = Arc::new(Context::new(
        client,
        &config.field_manager,
        config.resync_interval(),
        config.error_requeue(),
    ));

    // Changes to owned Deployments and Services requeue their Alfresco
    Controller::new(alfrescos, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .owns(services, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Alfresco reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Alfresco reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Alfresco controller shutting down");
    Ok(())
}
