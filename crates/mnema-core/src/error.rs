use thiserror::Error;

/// Error taxonomy for the memory service.
///
/// `Duplicate` and quota rejections are *not* errors: they are structured
/// outcomes of `remember` (see [`crate::memory::engine::RememberOutcome`])
/// so the calling agent can relay them verbatim.
#[derive(Debug, Error)]
pub enum MnemaError {
    /// No token, unknown token, or inactive token. Never carries detail
    /// about which of those it was.
    #[error("authentication required")]
    Unauthenticated,

    /// Memory operation arrived through a host outside the allow-list.
    #[error("memory operations are only available via {canonical}")]
    ForbiddenHost { canonical: String },

    /// Caller-visible input rejection (bad tag, empty text, zero limit).
    #[error("{0}")]
    Validation(String),

    /// Missing record or a record owned by another user; the two are
    /// indistinguishable by design.
    #[error("not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("embedding backend error: {0}")]
    Embedding(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MnemaError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Embedding(_) | Self::Io(_))
    }
}
