//! # Completion Arbitration
//!
//! A labeller only knows whether its own kind is fully labelled. Whether the
//! whole process is done, and may therefore restart with a narrower watch set,
//! is decided here across every tracked kind.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Decides whether every kind tracked by the process has finished labelling.
///
/// Invoked by a labeller only once its own kind is complete.
#[cfg_attr(test, automock)]
pub trait CompletionArbiter: Send + Sync {
    fn all_kinds_complete(&self) -> bool;
}

impl<F> CompletionArbiter for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn all_kinds_complete(&self) -> bool {
        self()
    }
}

/// Per-kind completion flags for the fixed set of kinds a process watches
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    kinds: Arc<BTreeMap<String, AtomicBool>>,
}

impl CompletionTracker {
    #[must_use]
    pub fn new<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kinds = kinds
            .into_iter()
            .map(|kind| (kind.into(), AtomicBool::new(false)))
            .collect();
        Self {
            kinds: Arc::new(kinds),
        }
    }

    /// Record `kind` as complete. Unknown kinds are ignored.
    pub fn mark_complete(&self, kind: &str) {
        if let Some(flag) = self.kinds.get(kind) {
            if !flag.swap(true, Ordering::SeqCst) {
                info!(kind = %kind, "Every object of kind is labelled");
            }
        } else {
            debug!(kind = %kind, "Ignoring completion for untracked kind");
        }
    }

    #[must_use]
    pub fn is_complete(&self, kind: &str) -> bool {
        self.kinds
            .get(kind)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn all_complete(&self) -> bool {
        self.kinds.values().all(|flag| flag.load(Ordering::SeqCst))
    }

    /// Kinds that still have unlabelled objects
    #[must_use]
    pub fn outstanding(&self) -> Vec<&str> {
        self.kinds
            .iter()
            .filter(|(_, flag)| !flag.load(Ordering::SeqCst))
            .map(|(kind, _)| kind.as_str())
            .collect()
    }

    /// Arbiter handle handed to the labeller of `kind`
    #[must_use]
    pub fn arbiter_for(&self, kind: &str) -> KindArbiter {
        KindArbiter {
            tracker: self.clone(),
            kind: kind.to_string(),
        }
    }
}

/// Reports its own kind complete, then answers for the whole tracker
#[derive(Debug, Clone)]
pub struct KindArbiter {
    tracker: CompletionTracker,
    kind: String,
}

impl CompletionArbiter for KindArbiter {
    fn all_kinds_complete(&self) -> bool {
        self.tracker.mark_complete(&self.kind);
        self.tracker.all_complete()
    }
}
