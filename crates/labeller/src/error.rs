use thiserror::Error;

/// Errors surfaced by a single labelling attempt
#[derive(Error, Debug)]
pub enum LabellerError {
    /// The dispatched payload was not the object type this labeller handles
    #[error("casting failed: wrong payload type, expected {expected}")]
    TypeMismatch { expected: &'static str },

    /// A metadata snapshot could not be serialized
    #[error("failed to serialize snapshot for {name}: {source}")]
    Serialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The merge patch between two snapshots could not be computed
    #[error("failed to create patch: {0}")]
    Patch(String),

    /// The informer cache shut down before it finished its initial listing
    #[error("object cache unavailable: {0}")]
    Cache(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Type alias for labeller results
pub type Result<T, E = LabellerError> = std::result::Result<T, E>;

impl LabellerError {
    /// Wiring errors that no amount of retrying will fix
    #[must_use]
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            LabellerError::TypeMismatch { .. }
                | LabellerError::Serialization { .. }
                | LabellerError::Patch(_)
        )
    }
}
