//! Application error surfaced by every publishing operation.
//!
//! All kinds are fatal to the client instance that raised them. Retrying is the
//! caller's decision (see [`crate::publish::RetryPolicy`]); nothing in the client
//! retries or downgrades these errors. Messages only ever carry scrubbed targets.

use thiserror::Error;

use crate::backend::BackendError;

/// Fixed text raised by `begin_transfers` when a request selects no files.
pub const NO_SOURCE_FILES_MESSAGE: &str = "No source files configured for this transfer";

/// Classification of a [`PublishError`], stable across message wording changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Connection,
    AlreadyExists,
    ListingFailed,
    NoSourceFiles,
    Transfer,
    Remote,
}

impl ErrorKind {
    /// Non-localized message key for this kind.
    pub fn key(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Connection => "connection",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::ListingFailed => "listing_failed",
            ErrorKind::NoSourceFiles => "no_source_files",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Remote => "remote",
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    /// Missing hostname or share; raised before any network call.
    #[error("{0}")]
    Configuration(String),

    /// Connect, authenticate or attach failed, or the liveness probe rejected the share.
    #[error("{message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BackendError>,
    },

    #[error("Directory already exists [{0}]")]
    AlreadyExists(String),

    #[error("Listing the directory returned no result [{0}]")]
    ListingFailed(String),

    #[error("{}", NO_SOURCE_FILES_MESSAGE)]
    NoSourceFiles,

    /// Upload failure, including failures to open the remote file.
    #[error("Failed to copy file to [{path}]: {source}")]
    Transfer {
        path: String,
        #[source]
        source: BackendError,
    },

    /// Backend failure while creating or deleting remote entries.
    #[error("Failed to {operation} [{path}]: {source}")]
    Remote {
        operation: &'static str,
        path: String,
        #[source]
        source: BackendError,
    },
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::Configuration(_) => ErrorKind::Configuration,
            PublishError::Connection { .. } => ErrorKind::Connection,
            PublishError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            PublishError::ListingFailed(_) => ErrorKind::ListingFailed,
            PublishError::NoSourceFiles => ErrorKind::NoSourceFiles,
            PublishError::Transfer { .. } => ErrorKind::Transfer,
            PublishError::Remote { .. } => ErrorKind::Remote,
        }
    }

    pub(crate) fn connection(message: impl Into<String>, source: Option<BackendError>) -> Self {
        PublishError::Connection {
            message: message.into(),
            source,
        }
    }

    pub(crate) fn remote(operation: &'static str, path: impl Into<String>, source: BackendError) -> Self {
        PublishError::Remote {
            operation,
            path: path.into(),
            source,
        }
    }
}
