use std::time::Duration;

use thiserror::Error;

/// Failure reported by an external [`Source`](crate::source::Source).
///
/// Carries only a message; whatever backend-specific detail exists should be
/// rendered into it by the source adapter, since the store keeps errors as
/// plain observable state and never inspects them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SourceError {
    message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Error state observable through a store snapshot.
///
/// Both variants travel the same delivery path: they settle `loading`, leave
/// the previous value readable, and are cleared by the next successful push.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The source reported a failure.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// No value arrived within the configured timeout of an activation.
    ///
    /// Synthesized by the store's timeout guard; the source itself is left
    /// open and a late value will still be delivered.  `limit` is the
    /// configured timeout, kept for diagnostics.
    #[error("no value within {limit:?} of activation")]
    Timeout { limit: Duration },
}

impl StoreError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Invalid construction input, reported before any subscription can happen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `id_field` and `ref_field` would merge into the same key.
    #[error("id and ref fields both named {field:?}")]
    ConflictingFieldNames { field: String },

    /// A timeout was configured but no tokio runtime is reachable to run
    /// the guard timer on.
    #[error("timeout configured outside a tokio runtime")]
    RuntimeUnavailable,
}
