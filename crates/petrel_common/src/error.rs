use thiserror::Error;

/// Convenience alias for `Result<T, PetrelError>`.
pub type PetrelResult<T> = Result<T, PetrelError>;

/// Error classification for retry/escalation decisions.
///
/// - `UserError`   — bad input: unknown channel, invalid configuration
/// - `Retryable`   — metadata-store contention; caller SHOULD retry
/// - `Transient`   — metadata-store I/O, cancellation; caller MAY retry after back-off
/// - `InternalBug` — should never happen; triggers alert + diagnostic dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Transient,
    InternalBug,
}

/// Top-level error type surfaced by the streaming coordinator.
#[derive(Error, Debug)]
pub enum PetrelError {
    #[error("Channel does not exist: {0}")]
    ChannelNotExist(String),

    #[error("Replication config invalid: {0}")]
    ReplicationConfigInvalid(String),

    #[error("Allocation shortfall: requested {requested} vchannels, only {available} pchannels eligible")]
    AllocShortfall { requested: usize, available: usize },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Metadata catalog / KV store errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Meta store error: {0}")]
    Store(String),

    #[error("Transaction rejected: {0}")]
    Txn(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PetrelError {
    /// Classify this error for retry/escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PetrelError::ChannelNotExist(_) => ErrorKind::UserError,
            PetrelError::ReplicationConfigInvalid(_) => ErrorKind::UserError,
            PetrelError::AllocShortfall { .. } => ErrorKind::UserError,

            PetrelError::Catalog(CatalogError::Txn(_)) => ErrorKind::Retryable,

            PetrelError::Catalog(CatalogError::Store(_)) => ErrorKind::Transient,
            PetrelError::Catalog(CatalogError::Io(_)) => ErrorKind::Transient,
            PetrelError::Cancelled => ErrorKind::Transient,

            PetrelError::Catalog(CatalogError::Serialization(_)) => ErrorKind::InternalBug,
            PetrelError::Internal(_) => ErrorKind::InternalBug,
        }
    }

    /// Returns true if the caller should retry this operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }

    /// Returns true if this is a user/input error.
    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::UserError)
    }

    /// Returns true if this is a transient I/O or cancellation error.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Returns true if this is an internal bug that should never occur.
    pub fn is_internal_bug(&self) -> bool {
        matches!(self.kind(), ErrorKind::InternalBug)
    }

    /// Emit a structured log entry for internal-bug-class errors. Called at
    /// every boundary that returns an error to an external caller.
    pub fn log_if_internal_bug(&self) {
        if self.is_internal_bug() {
            tracing::error!(
                error = %self,
                kind = ?self.kind(),
                "internal bug in streaming coordinator"
            );
        }
    }

    /// Add context to an error message, preserving the variant where the
    /// variant carries a free-form reason.
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        match self {
            PetrelError::Internal(msg) => PetrelError::Internal(format!("{ctx}: {msg}")),
            PetrelError::Catalog(CatalogError::Store(msg)) => {
                PetrelError::Catalog(CatalogError::Store(format!("{ctx}: {msg}")))
            }
            PetrelError::Catalog(CatalogError::Txn(msg)) => {
                PetrelError::Catalog(CatalogError::Txn(format!("{ctx}: {msg}")))
            }
            other => other,
        }
    }
}

/// Add context to a Result, preserving error classification.
/// Usage: `some_result.ctx("stage=recover")?`
pub trait ErrorContext<T> {
    fn ctx(self, context: &str) -> Result<T, PetrelError>;
    fn ctx_with(self, f: impl FnOnce() -> String) -> Result<T, PetrelError>;
}

impl<T, E: Into<PetrelError>> ErrorContext<T> for Result<T, E> {
    fn ctx(self, context: &str) -> Result<T, PetrelError> {
        self.map_err(|e| e.into().with_context(context))
    }
    fn ctx_with(self, f: impl FnOnce() -> String) -> Result<T, PetrelError> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod error_classification {
    use super::*;

    // ── ErrorKind classification ─────────────────────────────────────────────

    #[test]
    fn test_channel_not_exist_is_user_error() {
        let e = PetrelError::ChannelNotExist("wal-7".into());
        assert_eq!(e.kind(), ErrorKind::UserError);
        assert!(e.is_user_error());
        assert!(!e.is_retryable());
        assert!(!e.is_transient());
        assert!(!e.is_internal_bug());
    }

    #[test]
    fn test_replication_config_invalid_is_user_error() {
        let e = PetrelError::ReplicationConfigInvalid("unknown peer cluster".into());
        assert_eq!(e.kind(), ErrorKind::UserError);
    }

    #[test]
    fn test_alloc_shortfall_is_user_error() {
        let e = PetrelError::AllocShortfall {
            requested: 8,
            available: 2,
        };
        assert_eq!(e.kind(), ErrorKind::UserError);
        assert!(e.to_string().contains("requested 8"));
    }

    #[test]
    fn test_catalog_txn_is_retryable() {
        let e = PetrelError::Catalog(CatalogError::Txn("compare-and-swap lost".into()));
        assert_eq!(e.kind(), ErrorKind::Retryable);
        assert!(e.is_retryable());
    }

    #[test]
    fn test_catalog_store_is_transient() {
        let e = PetrelError::Catalog(CatalogError::Store("etcd unavailable".into()));
        assert_eq!(e.kind(), ErrorKind::Transient);
        assert!(e.is_transient());
    }

    #[test]
    fn test_cancelled_is_transient() {
        let e = PetrelError::Cancelled;
        assert_eq!(e.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_internal_is_internal_bug() {
        let e = PetrelError::Internal("unexpected None in registry".into());
        assert_eq!(e.kind(), ErrorKind::InternalBug);
        assert!(e.is_internal_bug());
        // Emits (and must not panic) regardless of subscriber state.
        e.log_if_internal_bug();
        PetrelError::Cancelled.log_if_internal_bug();
    }

    #[test]
    fn test_serialization_is_internal_bug() {
        let bad = serde_json::from_str::<u64>("not-a-number").unwrap_err();
        let e = PetrelError::Catalog(CatalogError::Serialization(bad));
        assert_eq!(e.kind(), ErrorKind::InternalBug);
    }

    // ── with_context / ErrorContext ──────────────────────────────────────────

    #[test]
    fn test_with_context_wraps_message() {
        let e = PetrelError::Internal("original".into());
        let e2 = e.with_context("stage=recover");
        assert!(e2.to_string().contains("stage=recover"));
        assert!(e2.to_string().contains("original"));
    }

    #[test]
    fn test_with_context_preserves_retryable() {
        let e = PetrelError::Catalog(CatalogError::Txn("lost".into()));
        let e2 = e.with_context("stage=save-pchannels");
        assert_eq!(e2.kind(), ErrorKind::Retryable);
        assert!(e2.to_string().contains("stage=save-pchannels"));
    }

    #[test]
    fn test_with_context_noop_on_structured_variant() {
        let e = PetrelError::ChannelNotExist("wal-7".into());
        let e2 = e.with_context("stage=assign");
        assert!(matches!(e2, PetrelError::ChannelNotExist(_)));
    }

    #[test]
    fn test_error_context_trait() {
        let result: Result<(), CatalogError> = Err(CatalogError::Store("down".into()));
        let err = result.ctx("stage=list-pchannels").unwrap_err();
        assert!(err.to_string().contains("stage=list-pchannels"));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_error_context_ok_passthrough() {
        let result: Result<i32, CatalogError> = Ok(42);
        let result2: Result<i32, PetrelError> = result.ctx("should not appear");
        assert_eq!(result2.unwrap(), 42);
    }

    // ── From conversions ─────────────────────────────────────────────────────

    #[test]
    fn test_from_catalog_error() {
        let e: PetrelError = CatalogError::Store("down".into()).into();
        assert_eq!(e.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
        let e: PetrelError = CatalogError::from(io).into();
        assert_eq!(e.kind(), ErrorKind::Transient);
    }
}
