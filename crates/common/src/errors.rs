//! Error taxonomy shared by every Mirage component.
//!
//! Component-local errors (backend, configuration) convert into
//! [`MirageError`] so callers only ever match on one set of variants.

use thiserror::Error;

/// Result type for Mirage operations.
pub type MirageResult<T> = Result<T, MirageError>;

/// Errors surfaced by the object store, lock manager and redirect layers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirageError {
    /// A caller supplied an unusable argument (e.g. an empty key).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing record, missing lock, or an empty listing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The lock is held elsewhere and acquisition was cancelled or timed out.
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    /// Unlock was requested for a lock this process does not hold.
    #[error("lock not held: {0}")]
    NotHeld(String),

    /// The lease backing a held lock was taken over or already expired.
    #[error("lease lost: {0}")]
    LeaseLost(String),

    /// Communication with the backing store failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A stored record could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The caller's cancellation token fired before the operation finished.
    #[error("operation cancelled")]
    Cancelled,

    /// Certificate issuance is not permitted for the requested name.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid or unloadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MirageError {
    /// True for [`MirageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for [`MirageError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short, stable label for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::LockUnavailable(_) => "lock_unavailable",
            Self::NotHeld(_) => "not_held",
            Self::LeaseLost(_) => "lease_lost",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::Cancelled => "cancelled",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Config(_) => "config",
        }
    }
}
