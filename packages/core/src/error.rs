//! Error types for the repository kernel.

use crate::path::{Path, PathError};

/// Boxed error produced by a backend or a collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by paths, collections and the resolver.
///
/// Failures of an authoritative backend operation are wrapped in
/// `GetFailed`/`PutFailed`/`RemoveFailed` with the offending path; use
/// [`Error::root_cause`] to see through the wrapping.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No element at the path.
    #[error("not found: {path}")]
    NotFound { path: Path },

    /// The element exists but is not of the expected kind.
    #[error("invalid type at {path}: {message}")]
    InvalidType { path: Path, message: String },

    /// Construction of an element failed.
    #[error("failed to create {path}")]
    CreateFailed {
        path: Path,
        #[source]
        source: Box<Error>,
    },

    /// Fetching an element failed.
    #[error("failed to get {path}")]
    GetFailed {
        path: Path,
        #[source]
        source: Box<Error>,
    },

    /// Storing an element failed.
    #[error("failed to put {path}")]
    PutFailed {
        path: Path,
        #[source]
        source: Box<Error>,
    },

    /// Removing an element failed.
    #[error("failed to remove {path}")]
    RemoveFailed {
        path: Path,
        #[source]
        source: Box<Error>,
    },

    /// The path is already being resolved further up the same call chain.
    #[error("{path} is already being created in this call chain")]
    Creating { path: Path },

    /// A symbolic link could not be resolved to a collection.
    #[error("symbolic link {link} -> {target} is unresolved")]
    SymbolicLink {
        link: Path,
        target: Path,
        #[source]
        source: Option<Box<Error>>,
    },

    /// An authorization check refused the operation.
    #[error("access denied: {operation} {path}")]
    AccessDenied { path: Path, operation: String },

    /// Mutation of an immutable collection under [`ImmutablePolicy::Reject`](crate::ImmutablePolicy::Reject).
    #[error("{path} is immutable")]
    Immutable { path: Path },

    /// An element name was empty or otherwise unusable.
    #[error("invalid element name '{name}' in {path}")]
    InvalidName { path: Path, name: String },

    /// A fetched or cached element does not carry the name it was looked up by.
    #[error("name mismatch at {path}: found element named '{found}'")]
    NameMismatch { path: Path, found: String },

    /// The collection has been closed.
    #[error("{path} is closed")]
    Closed { path: Path },

    /// A configuration entry could not be used.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Path parsing or navigation failed.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Raw failure reported by a backend.
    #[error("backend error: {0}")]
    Backend(#[source] BoxError),
}

/// Flat discriminant of [`Error`], convenient for matching wrapped causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidType,
    CreateFailed,
    GetFailed,
    PutFailed,
    RemoveFailed,
    Creating,
    SymbolicLink,
    AccessDenied,
    Immutable,
    InvalidName,
    NameMismatch,
    Closed,
    Config,
    Path,
    Backend,
}

impl Error {
    pub fn backend(error: impl Into<BoxError>) -> Self {
        Error::Backend(error.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn create_failed(path: Path, source: Error) -> Self {
        Error::CreateFailed {
            path,
            source: Box::new(source),
        }
    }

    pub fn get_failed(path: Path, source: Error) -> Self {
        Error::GetFailed {
            path,
            source: Box::new(source),
        }
    }

    pub fn put_failed(path: Path, source: Error) -> Self {
        Error::PutFailed {
            path,
            source: Box::new(source),
        }
    }

    pub fn remove_failed(path: Path, source: Error) -> Self {
        Error::RemoveFailed {
            path,
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::InvalidType { .. } => ErrorKind::InvalidType,
            Error::CreateFailed { .. } => ErrorKind::CreateFailed,
            Error::GetFailed { .. } => ErrorKind::GetFailed,
            Error::PutFailed { .. } => ErrorKind::PutFailed,
            Error::RemoveFailed { .. } => ErrorKind::RemoveFailed,
            Error::Creating { .. } => ErrorKind::Creating,
            Error::SymbolicLink { .. } => ErrorKind::SymbolicLink,
            Error::AccessDenied { .. } => ErrorKind::AccessDenied,
            Error::Immutable { .. } => ErrorKind::Immutable,
            Error::InvalidName { .. } => ErrorKind::InvalidName,
            Error::NameMismatch { .. } => ErrorKind::NameMismatch,
            Error::Closed { .. } => ErrorKind::Closed,
            Error::Config { .. } => ErrorKind::Config,
            Error::Path(_) => ErrorKind::Path,
            Error::Backend(_) => ErrorKind::Backend,
        }
    }

    /// The path this error is about, when it carries one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Error::NotFound { path }
            | Error::InvalidType { path, .. }
            | Error::CreateFailed { path, .. }
            | Error::GetFailed { path, .. }
            | Error::PutFailed { path, .. }
            | Error::RemoveFailed { path, .. }
            | Error::Creating { path }
            | Error::AccessDenied { path, .. }
            | Error::Immutable { path }
            | Error::InvalidName { path, .. }
            | Error::NameMismatch { path, .. }
            | Error::Closed { path } => Some(path),
            Error::SymbolicLink { link, .. } => Some(link),
            Error::Config { .. } | Error::Path(_) | Error::Backend(_) => None,
        }
    }

    /// Innermost kernel error, looking through operation wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::CreateFailed { source, .. }
            | Error::GetFailed { source, .. }
            | Error::PutFailed { source, .. }
            | Error::RemoveFailed { source, .. } => source.root_cause(),
            Error::SymbolicLink {
                source: Some(source),
                ..
            } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type alias for kernel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use std::error::Error as StdError;

    #[test]
    fn error_display() {
        let e = Error::NotFound {
            path: path!("foo/bar"),
        };
        assert!(format!("{}", e).contains("foo/bar"));

        let e = Error::Creating { path: path!("r/x") };
        assert!(e.to_string().contains("already being created"));
    }

    #[test]
    fn wrapped_errors_keep_path_and_source() {
        let inner = Error::backend(std::io::Error::other("disk gone"));
        let e = Error::get_failed(path!("r/a"), inner);
        assert_eq!(e.kind(), ErrorKind::GetFailed);
        assert_eq!(e.path(), Some(&path!("r/a")));
        assert!(StdError::source(&e).is_some());
        assert_eq!(e.root_cause().kind(), ErrorKind::Backend);
    }

    #[test]
    fn root_cause_sees_through_nesting() {
        let e = Error::put_failed(
            path!("r/a"),
            Error::get_failed(path!("r/a/b"), Error::Creating { path: path!("r/a/b") }),
        );
        assert_eq!(e.root_cause().kind(), ErrorKind::Creating);
    }

    #[test]
    fn symbolic_link_reports_link_path() {
        let e = Error::SymbolicLink {
            link: path!("r/link"),
            target: path!("missing"),
            source: Some(Box::new(Error::NotFound {
                path: path!("missing"),
            })),
        };
        assert_eq!(e.path(), Some(&path!("r/link")));
        assert_eq!(e.root_cause().kind(), ErrorKind::NotFound);
        let display = e.to_string();
        assert!(display.contains("r/link"));
        assert!(display.contains("missing"));
    }

    #[test]
    fn path_error_conversion() {
        let e: Error = PathError::DanglingEscape {
            segment: "a\\".to_string(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::Path);
        assert!(e.path().is_none());
    }

    #[test]
    fn config_error_display() {
        let e = Error::config("unknown caching strategy 'often'");
        assert_eq!(
            e.to_string(),
            "configuration error: unknown caching strategy 'often'"
        );
    }
}
