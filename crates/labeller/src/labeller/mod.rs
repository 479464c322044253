//! # Ownership Labelling Protocol
//!
//! Every observed object event is pushed through [`Labeller::reconcile`]:
//!
//! - an eligible object without the marker gets it, through whichever
//!   [`MarkerWriter`] the kind was wired with (server-side apply or a metadata
//!   merge patch);
//! - any other object triggers a fresh listing of the whole kind. Once every
//!   eligible object of the kind is marked, the [`CompletionArbiter`] is asked
//!   whether all kinds are done, in which case the caller is told to restart
//!   the process so its successor can watch a narrower set of kinds.
//!
//! No per-object state survives between calls.

pub mod apply;
pub mod lister;
pub mod merge_patch;
pub mod patch;

use std::any::Any;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use tracing::{error, info, warn};

use crate::completion::CompletionArbiter;
use crate::error::{LabellerError, Result};
use crate::ownership::{is_marked, MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE};

pub use apply::{ApplyClient, ApplyDescriptor, ApplyWriter, KubeApplyClient};
pub use lister::{MetadataLister, ObjectLister};
pub use patch::{KubeMetadataPatchClient, MergePatchClient, MergePatchWriter};

/// Scope predicate deciding whether an object should carry the marker at all
pub type Eligibility = Arc<dyn Fn(&ObjectMeta) -> bool + Send + Sync>;

/// Result of a single reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The marker was submitted for this object
    Labelled,
    /// Nothing to do, and the kind still has unmarked objects (or could not be listed)
    Unchanged,
    /// Every eligible object of this kind is marked, other kinds are outstanding
    KindComplete,
    /// Every tracked kind is marked; the process should exit and be restarted
    TerminationRequested,
}

/// Submits the ownership marker for one object
#[async_trait]
pub trait MarkerWriter<K>: Send + Sync {
    async fn write_marker(&self, object: &K) -> Result<()>;
}

/// The marker as a label map
#[must_use]
pub fn marker_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        MANAGED_LABEL_KEY.to_string(),
        MANAGED_LABEL_VALUE.to_string(),
    )])
}

/// Completion signal over a full listing: every item is either out of scope or marked
pub fn is_fully_labelled<'a, K, I>(
    items: I,
    eligible: &(dyn Fn(&ObjectMeta) -> bool + Send + Sync),
) -> bool
where
    K: Resource + 'a,
    I: IntoIterator<Item = &'a K>,
{
    items
        .into_iter()
        .all(|item| !eligible(item.meta()) || is_marked(item.meta()))
}

/// Labels the objects of one kind and detects when the kind is done
pub struct Labeller<K, L, W> {
    kind: String,
    eligible: Eligibility,
    lister: L,
    writer: W,
    arbiter: Arc<dyn CompletionArbiter>,
    _object: PhantomData<fn() -> K>,
}

impl<K, L, W> Labeller<K, L, W>
where
    K: Resource + Send + Sync,
    L: ObjectLister<K>,
    W: MarkerWriter<K>,
{
    pub fn new(
        kind: impl Into<String>,
        eligible: Eligibility,
        lister: L,
        writer: W,
        arbiter: Arc<dyn CompletionArbiter>,
    ) -> Self {
        Self {
            kind: kind.into(),
            eligible,
            lister,
            writer,
            arbiter,
            _object: PhantomData,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Label `object` if it needs it, otherwise check whether the kind is done.
    ///
    /// Submission errors are returned unchanged so the caller can retry.
    /// Listing errors during the completion check are logged and swallowed.
    pub async fn reconcile(&self, object: &K) -> Result<Outcome> {
        let meta = object.meta();
        if !(self.eligible)(meta) || is_marked(meta) {
            return Ok(self.check_completion().await);
        }

        info!(
            kind = %self.kind,
            namespace = %meta.namespace.as_deref().unwrap_or_default(),
            name = %meta.name.as_deref().unwrap_or_default(),
            "Applying ownership label"
        );
        self.writer.write_marker(object).await?;
        Ok(Outcome::Labelled)
    }

    async fn check_completion(&self) -> Outcome {
        let items = match self.lister.list_all().await {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    kind = %self.kind,
                    error = %e,
                    "Failed to list all objects to check for labelling completion"
                );
                return Outcome::Unchanged;
            }
        };

        if !is_fully_labelled(&items, self.eligible.as_ref()) {
            return Outcome::Unchanged;
        }

        if self.arbiter.all_kinds_complete() {
            info!(
                kind = %self.kind,
                "Detected that every object is labelled, exiting to re-start the process"
            );
            Outcome::TerminationRequested
        } else {
            Outcome::KindComplete
        }
    }
}

/// Type-erased entry point for event payloads of unknown concrete type
#[async_trait]
pub trait SyncHandler: Send + Sync {
    fn kind(&self) -> &str;

    async fn sync(&self, payload: &(dyn Any + Send + Sync)) -> Result<Outcome>;
}

#[async_trait]
impl<K, L, W> SyncHandler for Labeller<K, L, W>
where
    K: Resource + Send + Sync + 'static,
    L: ObjectLister<K>,
    W: MarkerWriter<K>,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn sync(&self, payload: &(dyn Any + Send + Sync)) -> Result<Outcome> {
        let Some(object) = payload.downcast_ref::<K>() else {
            let err = LabellerError::TypeMismatch {
                expected: std::any::type_name::<K>(),
            };
            error!(kind = %self.kind, error = %err, "Casting failed");
            return Err(err);
        };
        self.reconcile(object).await
    }
}
