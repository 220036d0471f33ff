//! # backend: contracts every SMB protocol implementation plugs into
//!
//! The publishing core never speaks SMB itself. It drives one of two backend shapes:
//!
//! - [`UrlFileSystem`]: legacy SMB1/CIFS, every location is a full `smb://` URL and the
//!   handle stays authenticated for the client's lifetime.
//! - [`ShareSession`]: SMB2/3, a session attached to one share, locations are paths
//!   relative to that share. A session is opened per top-level operation.
//!
//! Both are opened through a [`Connector`], which receives the explicit
//! [`ProtocolTuning`] for the connection instead of reading global state.
//!
//! Two connectors ship: [`MountedShares`] serves shares mounted into the local
//! filesystem, and the network connector returned by [`native_connector`] speaks SMB2/3
//! when the crate is built with the `smb-native` feature.
//!
//! ## Mocking & Testing
//! All traits are annotated for `mockall` (under `test-export-mocks`), so integration
//! tests can assert exactly which remote calls happen.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWrite;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::config::{Credential, ProtocolTuning};

pub mod mounted;
#[cfg(feature = "smb-native")]
pub mod native;
pub mod resolve;

pub use mounted::MountedShares;
#[cfg(feature = "smb-native")]
pub use native::NativeShares;
pub use resolve::HostResolver;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authentication failed for [{0}]")]
    Authentication(String),
    #[error("{0}")]
    Protocol(String),
}

/// Write handle to a remote file. Dropping it without `shutdown` loses buffered data.
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Everything a connector needs to reach and authenticate against one server.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub host: String,
    pub port: u16,
    pub credential: Option<Credential>,
    pub tuning: ProtocolTuning,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens an authenticated legacy handle able to resolve any `smb://` URL on the host.
    async fn open_url_session(
        &self,
        settings: &ConnectSettings,
    ) -> Result<Box<dyn UrlFileSystem>, BackendError>;

    /// Connects, authenticates and attaches `share`.
    async fn open_share(
        &self,
        settings: &ConnectSettings,
        share: &str,
    ) -> Result<Box<dyn ShareSession>, BackendError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait UrlFileSystem: Send + Sync {
    async fn exists(&self, url: &str) -> Result<bool, BackendError>;

    async fn can_read(&self, url: &str) -> Result<bool, BackendError>;

    /// Creates exactly one directory; the parent must exist.
    async fn mkdir(&self, url: &str) -> Result<(), BackendError>;

    /// URLs of the entries directly inside `url`. `None` when no listing could be produced.
    async fn list(&self, url: &str) -> Result<Option<Vec<String>>, BackendError>;

    /// Deletes a file, or a directory with everything below it.
    async fn delete(&self, url: &str) -> Result<(), BackendError>;

    /// Creates or truncates the file at `url`.
    async fn create(&self, url: &str) -> Result<RemoteWriter, BackendError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ShareSession: Send + Sync {
    async fn folder_exists(&self, path: &str) -> Result<bool, BackendError>;

    async fn can_list(&self, path: &str) -> Result<bool, BackendError>;

    /// Creates exactly one directory; the parent must exist.
    async fn mkdir(&self, path: &str) -> Result<(), BackendError>;

    /// Recursively removes everything inside `path`, keeping `path` itself.
    async fn remove_contents(&self, path: &str) -> Result<(), BackendError>;

    /// Creates or truncates the file at `path`.
    async fn create(&self, path: &str) -> Result<RemoteWriter, BackendError>;

    /// Detaches the share and ends the session.
    async fn close(&mut self) -> Result<(), BackendError>;
}

/// Connector speaking SMB over the network, resolving hosts through `resolver`.
#[cfg(feature = "smb-native")]
pub fn native_connector(resolver: HostResolver) -> Result<Arc<dyn Connector>, BackendError> {
    Ok(Arc::new(NativeShares::new(resolver)))
}

#[cfg(not(feature = "smb-native"))]
pub fn native_connector(_resolver: HostResolver) -> Result<Arc<dyn Connector>, BackendError> {
    Err(BackendError::Protocol(
        "smb-native feature is not enabled. Rebuild with --features smb-native".to_string(),
    ))
}
