use thiserror::Error;

/// The category of a failed store operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("store is not initialised")]
    NotInit,
    #[error("bad arguments")]
    BadArgs,
    #[error("not found")]
    NotFound,
    #[error("is a directory")]
    IsDir,
    #[error("not a directory")]
    NotDir,
    #[error("read error")]
    ReadError,
    #[error("write error")]
    WriteError,
    #[error("delete error")]
    DeleteError,
    #[error("crypto error")]
    CryptoError,
    #[error("integrity check failed")]
    IntegrityError,
    #[error("already exists")]
    Exists,
    #[error("storage error")]
    StorageError,
    #[error("internal error")]
    InternalError,
    #[error("unsupported")]
    Unsupported,
}

/// Every store call fails with one of these: an [`ErrorKind`] plus a
/// diagnostic message meant for humans.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StoreError {
    kind: ErrorKind,
    message: String,
}

impl StoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Wraps a medium failure, keeping what the store was doing at the time.
pub(crate) fn medium_error(
    kind: ErrorKind,
    action: impl std::fmt::Display,
    err: impl std::fmt::Display,
) -> StoreError {
    StoreError::new(kind, format!("{action}: {err}"))
}

#[test]
fn test_display_carries_kind_and_message() {
    let err = StoreError::new(ErrorKind::NotFound, "node /a/b");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.message(), "node /a/b");
    assert_eq!(err.to_string(), "not found: node /a/b");
}
