//! Alfresco controller
//!
//! Maps the lifecycle of an `Alfresco` resource onto the reconciler:
//!
//! 1. being deleted: retire all components, then release the finalizer
//! 2. no finalizer yet: add it so deletion waits for cleanup
//! 3. never reconciled (`status.observedGeneration` unset): materialize
//! 4. otherwise: converge
//!
//! The pass report is written back as the resource status.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::client::{AlfrescoClient, AlfrescoClientImpl, KubeWorkloadClient, WorkloadClient};
use super::reconciler::{ParentResource, PassReport, Reconciler};
use crate::crd::{Alfresco, AlfrescoPhase, AlfrescoStatus, ComponentStatus};
use crate::Error;

/// Finalizer that holds deletion until components are retired
pub const FINALIZER: &str = "alfresco.community.com/cleanup";

/// Requeue after adding the finalizer
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Shared controller state
pub struct Context {
    /// Client for the Alfresco resource itself
    pub alfresco: Arc<dyn AlfrescoClient>,
    /// Client for managed Deployments and Services
    pub workloads: Arc<dyn WorkloadClient>,
    /// Requeue interval after a successful pass
    pub resync_interval: Duration,
    /// Requeue interval after a failed pass
    pub error_requeue: Duration,
}

impl Context {
    /// Create a controller context backed by the given Kubernetes client
    pub fn new(
        client: Client,
        field_manager: &str,
        resync_interval: Duration,
        error_requeue: Duration,
    ) -> Self {
        Self {
            alfresco: Arc::new(AlfrescoClientImpl::new(client.clone(), field_manager)),
            workloads: Arc::new(KubeWorkloadClient::new(client)),
            resync_interval,
            error_requeue,
        }
    }

    /// Create a context for testing with custom clients
    #[cfg(test)]
    pub fn for_testing(
        alfresco: Arc<dyn AlfrescoClient>,
        workloads: Arc<dyn WorkloadClient>,
    ) -> Self {
        Self {
            alfresco,
            workloads,
            resync_interval: Duration::from_secs(300),
            error_requeue: Duration::from_secs(30),
        }
    }
}

/// Reconcile an Alfresco resource
///
/// Returns the requeue action, or an error if the pass must be retried
/// through [`error_policy`].
#[instrument(skip(alfresco, ctx), fields(alfresco = %alfresco.name_any()))]
pub async fn reconcile(alfresco: Arc<Alfresco>, ctx: Arc<Context>) -> Result<Action, Error> {
    let parent = ParentResource::from_resource(&alfresco)?;
    let reconciler = Reconciler::new(ctx.workloads.clone());

    if alfresco.metadata.deletion_timestamp.is_some() {
        if !has_finalizer(&alfresco) {
            debug!("being deleted without our finalizer, nothing to do");
            return Ok(Action::await_change());
        }

        info!("Alfresco deleted, retiring components");
        let report = reconciler.retire(&parent).await;
        if !report.is_clean() {
            warn!(
                failed = report.failed_count(),
                "some objects could not be deleted, leaving them to garbage collection"
            );
        }
        ctx.alfresco
            .remove_finalizer(&parent.name, &parent.namespace, FINALIZER)
            .await?;
        return Ok(Action::await_change());
    }

    if !has_finalizer(&alfresco) {
        info!("adding cleanup finalizer");
        ctx.alfresco
            .add_finalizer(&parent.name, &parent.namespace, FINALIZER)
            .await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let generation = alfresco.metadata.generation;
    let observed = alfresco
        .status
        .as_ref()
        .and_then(|s| s.observed_generation);

    let report = if observed.is_none() {
        info!(components = parent.spec.components.len(), "materializing components");
        match reconciler.materialize(&parent).await {
            Ok(report) => report,
            Err(e) => {
                let status = AlfrescoStatus {
                    phase: AlfrescoPhase::Failed,
                    observed_generation: None,
                    message: Some(e.to_string()),
                    components: Vec::new(),
                };
                patch_status_if_changed(&alfresco, &parent, &ctx, status).await?;
                return Err(e);
            }
        }
    } else {
        debug!(?generation, ?observed, "converging components");
        reconciler.converge(&parent).await
    };

    let status = status_from_report(&report, generation);
    patch_status_if_changed(&alfresco, &parent, &ctx, status).await?;

    Ok(Action::requeue(ctx.resync_interval))
}

/// Error policy for the controller
///
/// Logs the failure and requeues after the configured interval.
pub fn error_policy(alfresco: Arc<Alfresco>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        alfresco = %alfresco.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ctx.error_requeue)
}

fn has_finalizer(alfresco: &Alfresco) -> bool {
    alfresco.finalizers().iter().any(|f| f == FINALIZER)
}

/// Status reflecting a completed pass
pub fn status_from_report(report: &PassReport, generation: Option<i64>) -> AlfrescoStatus {
    let total = report.components.len();
    let failed = report.failed_count();

    let (phase, message) = if failed == 0 {
        (AlfrescoPhase::Ready, format!("{} components applied", total))
    } else {
        (
            AlfrescoPhase::Degraded,
            format!("{} of {} components failed", failed, total),
        )
    };

    AlfrescoStatus {
        phase,
        // Set even when degraded so the next pass converges instead of
        // materializing again.
        observed_generation: Some(generation.unwrap_or_default()),
        message: Some(message),
        components: report
            .components
            .iter()
            .map(|c| ComponentStatus {
                component: c.component.clone(),
                name: c.name.clone(),
                deployment: c.deployment.to_string(),
                service: c.service.to_string(),
            })
            .collect(),
    }
}

async fn patch_status_if_changed(
    alfresco: &Alfresco,
    parent: &ParentResource,
    ctx: &Context,
    status: AlfrescoStatus,
) -> Result<(), Error> {
    if alfresco.status.as_ref() == Some(&status) {
        debug!("status unchanged");
        return Ok(());
    }
    ctx.alfresco
        .patch_status(&parent.name, &parent.namespace, &status)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::client::MockAlfrescoClient;
    use crate::controller::memory::{InMemoryCluster, Operation};
    use crate::controller::reconciler::{ComponentReport, ObjectOutcome, Pass};
    use crate::controller::ObjectKind;
    use crate::crd::{AlfrescoSpec, ComponentSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Captured status patches, so tests check what was written rather than
    /// how the mock was called.
    #[derive(Clone, Default)]
    struct StatusCapture {
        updates: Arc<Mutex<Vec<AlfrescoStatus>>>,
    }

    impl StatusCapture {
        fn record(&self, status: AlfrescoStatus) {
            self.updates.lock().unwrap().push(status);
        }

        fn last(&self) -> Option<AlfrescoStatus> {
            self.updates.lock().unwrap().last().cloned()
        }

        fn count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }
    }

    fn capturing_client(capture: &StatusCapture) -> MockAlfrescoClient {
        let capture = capture.clone();
        let mut mock = MockAlfrescoClient::new();
        mock.expect_patch_status().returning(move |_, _, status| {
            capture.record(status.clone());
            Ok(())
        });
        mock
    }

    fn resource(finalized: bool, status: Option<AlfrescoStatus>) -> Arc<Alfresco> {
        let spec = AlfrescoSpec {
            components: BTreeMap::from([
                (
                    "postgres".to_string(),
                    ComponentSpec {
                        image: "postgres:15".to_string(),
                        ports: vec![5432],
                        ..Default::default()
                    },
                ),
                (
                    "share".to_string(),
                    ComponentSpec {
                        image: "alfresco/alfresco-share:23.2.0".to_string(),
                        ports: vec![8080],
                        ..Default::default()
                    },
                ),
            ]),
        };
        let mut alfresco = Alfresco::new("acs", spec);
        alfresco.metadata.namespace = Some("alfresco".to_string());
        alfresco.metadata.uid = Some("uid-1234".to_string());
        alfresco.metadata.generation = Some(3);
        if finalized {
            alfresco.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        }
        alfresco.status = status;
        Arc::new(alfresco)
    }

    fn observed(generation: i64) -> Option<AlfrescoStatus> {
        Some(AlfrescoStatus {
            phase: AlfrescoPhase::Ready,
            observed_generation: Some(generation),
            ..Default::default()
        })
    }

    fn deleting(alfresco: Arc<Alfresco>) -> Arc<Alfresco> {
        let mut alfresco = (*alfresco).clone();
        alfresco.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        Arc::new(alfresco)
    }

    // =========================================================================
    // Story: a new resource gets a finalizer first, then its components
    // =========================================================================

    #[tokio::test]
    async fn story_new_resource_gets_finalizer_then_components() {
        let cluster = Arc::new(InMemoryCluster::new());
        let added = Arc::new(Mutex::new(Vec::<String>::new()));

        let mut mock = MockAlfrescoClient::new();
        let record = added.clone();
        mock.expect_add_finalizer()
            .times(1)
            .returning(move |_, _, finalizer| {
                record.lock().unwrap().push(finalizer.to_string());
                Ok(())
            });
        let ctx = Arc::new(Context::for_testing(Arc::new(mock), cluster.clone()));

        let action = reconcile(resource(false, None), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(FINALIZER_REQUEUE));
        assert_eq!(*added.lock().unwrap(), vec![FINALIZER.to_string()]);
        // Nothing is created until the finalizer is in place
        assert!(cluster.calls().is_empty());

        let capture = StatusCapture::default();
        let ctx = Arc::new(Context::for_testing(
            Arc::new(capturing_client(&capture)),
            cluster.clone(),
        ));

        let action = reconcile(resource(true, None), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        assert_eq!(cluster.deployment_count(), 2);
        assert_eq!(cluster.service_count(), 2);
        // Materialize only creates, it never reads
        assert!(cluster.calls_for(Operation::Get, ObjectKind::Deployment).is_empty());

        let status = capture.last().unwrap();
        assert_eq!(status.phase, AlfrescoPhase::Ready);
        assert_eq!(status.observed_generation, Some(3));
        assert_eq!(status.components.len(), 2);
        assert_eq!(status.components[0].deployment, "Created");
    }

    #[tokio::test]
    async fn observed_resource_converges() {
        let cluster = Arc::new(InMemoryCluster::new());
        let capture = StatusCapture::default();
        let ctx = Arc::new(Context::for_testing(
            Arc::new(capturing_client(&capture)),
            cluster.clone(),
        ));

        reconcile(resource(true, observed(2)), ctx).await.unwrap();

        // Converge reads first, then creates what is missing
        assert_eq!(cluster.calls_for(Operation::Get, ObjectKind::Deployment).len(), 2);
        assert_eq!(cluster.deployment_count(), 2);
        assert_eq!(capture.last().unwrap().observed_generation, Some(3));
    }

    #[tokio::test]
    async fn unchanged_status_is_not_patched() {
        let cluster = Arc::new(InMemoryCluster::new());
        let capture = StatusCapture::default();
        let ctx = Arc::new(Context::for_testing(
            Arc::new(capturing_client(&capture)),
            cluster.clone(),
        ));

        // First converge creates everything; the second only replaces
        reconcile(resource(true, observed(3)), ctx.clone()).await.unwrap();
        reconcile(resource(true, capture.last()), ctx.clone())
            .await
            .unwrap();
        assert_eq!(capture.count(), 2);

        // Third pass produces the same status as the second
        reconcile(resource(true, capture.last()), ctx).await.unwrap();
        assert_eq!(capture.count(), 2);
    }

    /// Story: a rejected Deployment marks the resource Failed, keeps it
    /// unobserved so the retry materializes again, and errors for requeue.
    #[tokio::test]
    async fn story_materialize_failure_marks_failed_and_errors() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.fail(Operation::Create, ObjectKind::Deployment, "share", "quota exceeded");
        let capture = StatusCapture::default();
        let ctx = Arc::new(Context::for_testing(
            Arc::new(capturing_client(&capture)),
            cluster.clone(),
        ));

        let err = reconcile(resource(true, None), ctx.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Materialize { .. }));

        let status = capture.last().unwrap();
        assert_eq!(status.phase, AlfrescoPhase::Failed);
        assert!(status.observed_generation.is_none());
        assert!(status.message.unwrap().contains("share"));

        let action = error_policy(resource(true, None), &err, ctx.clone());
        assert_eq!(action, Action::requeue(Duration::from_secs(30)));

        // Once the cause is gone the retry materializes again
        cluster.clear_failures();
        reconcile(resource(true, None), ctx).await.unwrap();
        assert_eq!(capture.last().unwrap().phase, AlfrescoPhase::Ready);
        assert!(cluster.deployment("alfresco", "share").is_some());
    }

    // =========================================================================
    // Story: deletion retires components and releases the finalizer
    // =========================================================================

    #[tokio::test]
    async fn story_deletion_retires_then_releases_finalizer() {
        let cluster = Arc::new(InMemoryCluster::new());
        let alfresco = resource(true, observed(3));
        let parent = ParentResource::from_resource(&alfresco).unwrap();
        Reconciler::new(cluster.clone())
            .materialize(&parent)
            .await
            .unwrap();

        let removed = Arc::new(Mutex::new(Vec::<String>::new()));
        let record = removed.clone();
        let mut mock = MockAlfrescoClient::new();
        mock.expect_remove_finalizer()
            .times(1)
            .returning(move |name, _, finalizer| {
                record.lock().unwrap().push(format!("{}/{}", name, finalizer));
                Ok(())
            });
        mock.expect_patch_status().never();
        let ctx = Arc::new(Context::for_testing(Arc::new(mock), cluster.clone()));

        let action = reconcile(deleting(alfresco), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(cluster.deployment_count(), 0);
        assert_eq!(cluster.service_count(), 0);
        assert_eq!(
            *removed.lock().unwrap(),
            vec![format!("acs/{}", FINALIZER)]
        );
    }

    #[tokio::test]
    async fn deletion_releases_finalizer_even_when_cleanup_fails() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.fail(Operation::Delete, ObjectKind::Service, "postgres", "forbidden");

        let mut mock = MockAlfrescoClient::new();
        mock.expect_remove_finalizer()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let ctx = Arc::new(Context::for_testing(Arc::new(mock), cluster));

        let action = reconcile(deleting(resource(true, observed(3))), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn deletion_without_finalizer_does_nothing() {
        let cluster = Arc::new(InMemoryCluster::new());
        let ctx = Arc::new(Context::for_testing(
            Arc::new(MockAlfrescoClient::new()),
            cluster.clone(),
        ));

        let action = reconcile(deleting(resource(false, None)), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn finalizer_errors_propagate() {
        let mut mock = MockAlfrescoClient::new();
        mock.expect_add_finalizer()
            .returning(|_, _, _| Err(Error::validation("apiserver unavailable")));
        let ctx = Arc::new(Context::for_testing(
            Arc::new(mock),
            Arc::new(InMemoryCluster::new()),
        ));

        assert!(reconcile(resource(false, None), ctx).await.is_err());
    }

    #[tokio::test]
    async fn resource_without_uid_is_rejected() {
        let mut alfresco = (*resource(true, None)).clone();
        alfresco.metadata.uid = None;
        let ctx = Arc::new(Context::for_testing(
            Arc::new(MockAlfrescoClient::new()),
            Arc::new(InMemoryCluster::new()),
        ));

        let err = reconcile(Arc::new(alfresco), ctx).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    // =========================================================================
    // Status mapping
    // =========================================================================

    #[test]
    fn degraded_status_counts_failures() {
        let report = PassReport {
            pass: Pass::Converge,
            components: vec![
                ComponentReport {
                    component: "postgres".to_string(),
                    name: "postgres".to_string(),
                    deployment: ObjectOutcome::Replaced,
                    service: ObjectOutcome::Failed("forbidden".to_string()),
                },
                ComponentReport {
                    component: "share".to_string(),
                    name: "acs-share".to_string(),
                    deployment: ObjectOutcome::Replaced,
                    service: ObjectOutcome::Replaced,
                },
            ],
        };

        let status = status_from_report(&report, Some(7));
        assert_eq!(status.phase, AlfrescoPhase::Degraded);
        assert_eq!(status.observed_generation, Some(7));
        assert_eq!(status.message.as_deref(), Some("1 of 2 components failed"));
        assert_eq!(status.components[0].service, "Failed: forbidden");
        assert_eq!(status.components[1].name, "acs-share");
    }

    #[test]
    fn clean_status_is_ready() {
        let report = PassReport {
            pass: Pass::Materialize,
            components: vec![],
        };
        let status = status_from_report(&report, None);
        assert_eq!(status.phase, AlfrescoPhase::Ready);
        assert_eq!(status.observed_generation, Some(0));
    }
}
