//! # Labeller Controllers
//!
//! Wires one `kube` controller per configured kind to its [`Labeller`].
//!
//! Before anything is watched, every kind is listed once. Kinds that are
//! already fully labelled get no controller at all, which is what lets a
//! restarted process watch fewer kinds than its predecessor. The remaining
//! controllers share a cancellation token that a labeller trips once every
//! kind reports completion.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::PartialObjectMeta;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::{metadata_watcher, reflector, watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::completion::{CompletionTracker, KindArbiter};
use crate::config::{LabellerConfig, LabelledKind};
use crate::error::LabellerError;
use crate::labeller::apply::namespaced_api;
use crate::labeller::{
    is_fully_labelled, ApplyWriter, Eligibility, KubeApplyClient, KubeMetadataPatchClient,
    Labeller, MergePatchWriter, MetadataLister, ObjectLister, Outcome, SyncHandler,
};
use crate::ownership::{has_owner_ref, is_installed_alongside};

/// Calls the namespaced, cluster-scoped or metadata-only instantiation of a
/// generic function for the object type behind a [`LabelledKind`]. Trailing
/// tokens such as `.await` are appended to the chosen call.
macro_rules! dispatch_kind {
    ($kind:expr, $namespaced:ident, $cluster:ident, $metadata:ident, ($($arg:expr),* $(,)?) $($post:tt)*) => {
        match $kind {
            LabelledKind::Deployments => $namespaced::<Deployment>($($arg),*) $($post)*,
            LabelledKind::ServiceAccounts => $namespaced::<ServiceAccount>($($arg),*) $($post)*,
            LabelledKind::Services => $namespaced::<Service>($($arg),*) $($post)*,
            LabelledKind::Roles => $namespaced::<Role>($($arg),*) $($post)*,
            LabelledKind::RoleBindings => $namespaced::<RoleBinding>($($arg),*) $($post)*,
            LabelledKind::ConfigMaps => $namespaced::<ConfigMap>($($arg),*) $($post)*,
            LabelledKind::ClusterRoles => $cluster::<ClusterRole>($($arg),*) $($post)*,
            LabelledKind::ClusterRoleBindings => $cluster::<ClusterRoleBinding>($($arg),*) $($post)*,
            LabelledKind::CustomResourceDefinitions => {
                $metadata::<CustomResourceDefinition>($($arg),*) $($post)*
            }
        }
    };
}

/// How a labelling run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every kind is labelled; the process should exit so it restarts narrowed
    TerminationRequested,
    /// Every kind was already labelled on startup, nothing was watched
    NothingToWatch,
    /// All controllers stopped on their own
    Stopped,
}

/// Shared state handed to every reconciliation of one kind
pub struct LabelContext {
    pub handler: Arc<dyn SyncHandler>,
    pub termination: CancellationToken,
    pub retry: Duration,
}

/// Settings shared by every controller of a run
#[derive(Clone)]
struct WatchSettings {
    retry: Duration,
    concurrency: u16,
    termination: CancellationToken,
}

/// Scope predicate for objects of `kind`
#[must_use]
pub fn eligibility_for(kind: LabelledKind) -> Eligibility {
    match kind {
        LabelledKind::CustomResourceDefinitions => Arc::new(is_installed_alongside),
        _ => Arc::new(has_owner_ref),
    }
}

/// One-off completion check. Listing failures count as incomplete.
pub async fn kind_is_complete<K, L>(kind: &str, lister: &L, eligible: &Eligibility) -> bool
where
    K: Resource,
    L: ObjectLister<K> + ?Sized,
{
    match lister.list_all().await {
        Ok(items) => is_fully_labelled(&items, eligible.as_ref()),
        Err(e) => {
            warn!(kind = %kind, error = %e, "Failed to list objects while narrowing watches");
            false
        }
    }
}

/// Run a reconciliation through the type-erased handler
pub async fn reconcile<K>(object: Arc<K>, ctx: Arc<LabelContext>) -> Result<Action, LabellerError>
where
    K: Send + Sync + 'static,
{
    match ctx.handler.sync(&*object).await? {
        Outcome::TerminationRequested => ctx.termination.cancel(),
        Outcome::KindComplete => {
            debug!(kind = %ctx.handler.kind(), "Kind labelled, waiting on other kinds");
        }
        Outcome::Labelled | Outcome::Unchanged => {}
    }
    Ok(Action::await_change())
}

/// Log the failure and hand the object back to the controller's retry queue
pub fn error_policy<K>(object: Arc<K>, err: &LabellerError, ctx: Arc<LabelContext>) -> Action
where
    K: Resource,
{
    error!(
        kind = %ctx.handler.kind(),
        namespace = %object.namespace().unwrap_or_default(),
        name = %object.name_any(),
        error = %err,
        retryable = !err.is_programmer_error(),
        "Ownership labelling failed"
    );
    Action::requeue(ctx.retry)
}

/// Label every configured kind until all of them are done
#[instrument(skip_all, fields(namespace = ?config.namespace))]
pub async fn run_labellers(client: Client, config: &LabellerConfig) -> RunOutcome {
    let tracker = CompletionTracker::new(config.kinds.iter().map(|kind| kind.resource()));
    let settings = WatchSettings {
        retry: Duration::from_secs(config.retry_seconds),
        concurrency: config.concurrency,
        termination: CancellationToken::new(),
    };
    let namespace = config.namespace.as_deref();

    let mut handles = Vec::new();
    for &kind in &config.kinds {
        if startup_complete(&client, namespace, kind).await {
            tracker.mark_complete(kind.resource());
            info!(
                kind = %kind,
                namespaced = kind.is_namespaced(),
                "Kind already labelled, not watching it"
            );
            continue;
        }
        handles.push(spawn_kind(
            client.clone(),
            namespace,
            kind,
            tracker.arbiter_for(kind.resource()),
            settings.clone(),
        ));
    }

    if handles.is_empty() {
        info!("Every configured kind is labelled, nothing to watch");
        return RunOutcome::NothingToWatch;
    }
    info!(outstanding = ?tracker.outstanding(), "Starting ownership labellers");

    let termination = settings.termination.clone();
    tokio::select! {
        () = termination.cancelled() => RunOutcome::TerminationRequested,
        _ = futures::future::join_all(handles) => {
            warn!("All labelling controllers stopped");
            RunOutcome::Stopped
        }
    }
}

async fn startup_complete(client: &Client, namespace: Option<&str>, kind: LabelledKind) -> bool {
    let eligible = eligibility_for(kind);
    dispatch_kind!(
        kind,
        namespaced_complete,
        cluster_complete,
        metadata_complete,
        (client, namespace, kind.resource(), &eligible)
        .await
    )
}

async fn namespaced_complete<K>(
    client: &Client,
    namespace: Option<&str>,
    name: &str,
    eligible: &Eligibility,
) -> bool
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    let api: Api<K> = namespaced_api(client.clone(), namespace);
    kind_is_complete::<K, _>(name, &api, eligible).await
}

async fn cluster_complete<K>(
    client: &Client,
    _namespace: Option<&str>,
    name: &str,
    eligible: &Eligibility,
) -> bool
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    let api: Api<K> = Api::all(client.clone());
    kind_is_complete::<K, _>(name, &api, eligible).await
}

async fn metadata_complete<K>(
    client: &Client,
    _namespace: Option<&str>,
    name: &str,
    eligible: &Eligibility,
) -> bool
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    let lister = MetadataLister::new(Api::<K>::all(client.clone()));
    kind_is_complete::<PartialObjectMeta<K>, _>(name, &lister, eligible).await
}

fn spawn_kind(
    client: Client,
    namespace: Option<&str>,
    kind: LabelledKind,
    arbiter: KindArbiter,
    settings: WatchSettings,
) -> JoinHandle<()> {
    dispatch_kind!(
        kind,
        spawn_namespaced,
        spawn_cluster,
        spawn_metadata,
        (client, namespace, kind, arbiter, settings)
    )
}

fn spawn_namespaced<K>(
    client: Client,
    namespace: Option<&str>,
    kind: LabelledKind,
    arbiter: KindArbiter,
    settings: WatchSettings,
) -> JoinHandle<()>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    tokio::spawn(run_apply_kind(
        namespaced_api::<K>(client.clone(), namespace),
        KubeApplyClient::namespaced(client),
        kind,
        arbiter,
        settings,
    ))
}

fn spawn_cluster<K>(
    client: Client,
    _namespace: Option<&str>,
    kind: LabelledKind,
    arbiter: KindArbiter,
    settings: WatchSettings,
) -> JoinHandle<()>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    tokio::spawn(run_apply_kind(
        Api::<K>::all(client.clone()),
        KubeApplyClient::cluster(client),
        kind,
        arbiter,
        settings,
    ))
}

fn spawn_metadata<K>(
    client: Client,
    _namespace: Option<&str>,
    kind: LabelledKind,
    arbiter: KindArbiter,
    settings: WatchSettings,
) -> JoinHandle<()>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    tokio::spawn(run_metadata_kind(
        Api::<K>::all(client),
        kind,
        arbiter,
        settings,
    ))
}

/// Watch full objects of `K` and label them through server-side apply
async fn run_apply_kind<K>(
    api: Api<K>,
    applier: KubeApplyClient<K>,
    kind: LabelledKind,
    arbiter: KindArbiter,
    settings: WatchSettings,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let controller = Controller::new(api, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(settings.concurrency));

    let labeller = Labeller::new(
        kind.resource(),
        eligibility_for(kind),
        controller.store(),
        ApplyWriter::new(applier),
        Arc::new(arbiter),
    );
    let context = Arc::new(LabelContext {
        handler: Arc::new(labeller),
        termination: settings.termination,
        retry: settings.retry,
    });

    info!(kind = %kind, "Starting apply labeller");
    controller
        .run(reconcile::<K>, error_policy::<K>, context)
        .for_each(|result| async move {
            if let Err(e) = result {
                debug!(kind = %kind, error = %e, "Labeller controller event failed");
            }
        })
        .await;
    info!(kind = %kind, "Apply labeller shutting down");
}

/// Watch metadata of `K` only and label it through merge patches
async fn run_metadata_kind<K>(
    api: Api<K>,
    kind: LabelledKind,
    arbiter: KindArbiter,
    settings: WatchSettings,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store::<PartialObjectMeta<K>>();
    let events = metadata_watcher(api.clone(), watcher::Config::default().any_semantic())
        .default_backoff()
        .reflect(writer)
        .applied_objects();

    let controller = Controller::for_stream(events, reader.clone())
        .with_config(controller::Config::default().concurrency(settings.concurrency));

    let labeller = Labeller::new(
        kind.resource(),
        eligibility_for(kind),
        reader,
        MergePatchWriter::new(KubeMetadataPatchClient::new(api)),
        Arc::new(arbiter),
    );
    let context = Arc::new(LabelContext {
        handler: Arc::new(labeller),
        termination: settings.termination,
        retry: settings.retry,
    });

    info!(kind = %kind, "Starting metadata patch labeller");
    controller
        .run(
            reconcile::<PartialObjectMeta<K>>,
            error_policy::<PartialObjectMeta<K>>,
            context,
        )
        .for_each(|result| async move {
            if let Err(e) = result {
                debug!(kind = %kind, error = %e, "Labeller controller event failed");
            }
        })
        .await;
    info!(kind = %kind, "Metadata patch labeller shutting down");
}
