use thiserror::Error;

/// Primary error type for Spanbase operations.
///
/// Structured variants for the conditions the region server has to react to
/// programmatically (coordination contention, lost CAS ownership, a region
/// closed out from under us), plus catch-alls for I/O and internal bugs.
#[derive(Error, Debug)]
pub enum SpanError {
    // === I/O ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Coordination service ===
    /// A node already exists at the given path (create-exclusion lost).
    #[error("coordination node already exists: '{path}'")]
    NodeExists { path: String },

    /// No node exists at the given path.
    #[error("no coordination node: '{path}'")]
    NoNode { path: String },

    /// Compare-and-swap failed: the node version moved under us.
    #[error("bad version on '{path}': expected {expected}, found {actual}")]
    BadVersion {
        path: String,
        expected: i32,
        actual: i32,
    },

    /// Any other coordination-service fault.
    #[error("coordination error: {detail}")]
    Coordination { detail: String },

    // === Regions ===
    /// The region was closed by another actor before this operation ran.
    ///
    /// Dedicated variant so callers can distinguish "someone else closed it"
    /// from a close that failed partway: the former must not be undone by
    /// the caller's rollback.
    #[error("region already closed by another actor: {region}")]
    RegionAlreadyClosed { region: String },

    /// A region lifecycle operation was attempted in the wrong state.
    #[error("region {region} in invalid state: {detail}")]
    RegionState { region: String, detail: String },

    /// The hosting server is stopped or stopping.
    #[error("server is stopped or stopping")]
    ServerStopped,

    // === Catalog ===
    /// Catalog read or write failure.
    #[error("catalog error: {detail}")]
    Catalog { detail: String },

    // === Encoding ===
    /// A wire record failed to decode.
    #[error("corrupt record: {detail}")]
    Corrupt { detail: String },

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SpanError {
    /// Create a coordination error.
    pub fn coordination(detail: impl Into<String>) -> Self {
        Self::Coordination {
            detail: detail.into(),
        }
    }

    /// Create a catalog error.
    pub fn catalog(detail: impl Into<String>) -> Self {
        Self::Catalog {
            detail: detail.into(),
        }
    }

    /// Create a corrupt-record error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this is a transient fault that may succeed on retry.
    ///
    /// Lost CAS ownership and create-exclusion are not transient: the node
    /// is owned by someone else until their session dies.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Coordination { .. })
    }

    /// Whether this fault means another actor holds the resource.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::NodeExists { .. } | Self::BadVersion { .. } | Self::RegionAlreadyClosed { .. }
        )
    }
}

/// Result type alias using `SpanError`.
pub type Result<T> = std::result::Result<T, SpanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SpanError::NodeExists {
            path: "/spanbase/region-in-transition/abc".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "coordination node already exists: '/spanbase/region-in-transition/abc'"
        );

        let err = SpanError::BadVersion {
            path: "/x".to_owned(),
            expected: 3,
            actual: 5,
        };
        assert_eq!(err.to_string(), "bad version on '/x': expected 3, found 5");
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: SpanError = io_err.into();
        assert!(matches!(err, SpanError::Io(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn contention_classification() {
        assert!(
            SpanError::RegionAlreadyClosed {
                region: "r".to_owned()
            }
            .is_contention()
        );
        assert!(
            SpanError::NodeExists {
                path: "/p".to_owned()
            }
            .is_contention()
        );
        assert!(!SpanError::ServerStopped.is_contention());
        assert!(!SpanError::coordination("session lost").is_contention());
    }

    #[test]
    fn convenience_constructors() {
        let err = SpanError::corrupt("short transition record");
        assert!(matches!(err, SpanError::Corrupt { .. }));
        assert_eq!(err.to_string(), "corrupt record: short transition record");

        let err = SpanError::internal("journal entry out of order");
        assert!(matches!(err, SpanError::Internal(_)));
    }
}
