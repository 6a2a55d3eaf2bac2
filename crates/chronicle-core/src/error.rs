//! Error taxonomy shared across Chronicle crates.
//!
//! Four failure classes cover the whole pipeline:
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | [`ChronicleError::InvalidInput`] | Caller-supplied text is empty or malformed; rejected before any external call |
//! | [`ChronicleError::Upstream`] | An embedding or language-model call failed; surfaced, never silently retried here |
//! | [`ChronicleError::Timeout`] | An external call exceeded its deadline |
//! | [`ChronicleError::DimensionMismatch`] | Embedding vectors of unequal length were compared |
//! | [`ChronicleError::NotFound`] | A referenced chunk/document/source is missing |
//!
//! Citation extraction never produces an error for "no markers found" or
//! "marker unmatched" — those are expected outcomes reflected in coverage
//! scores. A missing chunk during validation yields a failed validation
//! report, not a fault, so one bad citation cannot abort a batch.

use thiserror::Error;

/// Convenience alias used throughout both crates.
pub type Result<T> = std::result::Result<T, ChronicleError>;

/// All errors produced by Chronicle's core pipeline.
#[derive(Debug, Clone, Error)]
pub enum ChronicleError {
    /// Caller-supplied input was empty or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external collaborator (embedding model, language model,
    /// similarity index) failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// An external call did not complete within its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Two embedding vectors of different lengths were compared.
    /// This is a programming error: it cannot occur when a single
    /// embedding model is configured consistently.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A referenced entity does not exist in the store.
    #[error("not found: {0}")]
    NotFound(String),
}
