//! # client: the stateful remote side of a publish run
//!
//! A [`RemoteClient`] owns one backend connection (or the means to open one per
//! operation) and a current working location. The location starts at the configured
//! root, moves only through [`RemoteClient::change_directory`] and resets through
//! [`RemoteClient::change_to_initial_directory`]. Directory creation, cleaning and uploads
//! all happen relative to it.
//!
//! Two implementations exist, one per protocol generation, and are selected at
//! construction time through the closed [`SmbClient`] variant:
//!
//! - [`LegacyClient`]: SMB1/CIFS, locations are `smb://` URLs, directories end with `/`.
//! - [`SessionClient`]: SMB2/3, locations are share-relative `\` paths without a
//!   trailing separator; one backend session per top-level operation.
//!
//! A client is used by one task at a time (`&mut self` everywhere). It never retries:
//! every failure surfaces once as a [`PublishError`] and the caller decides what happens
//! next. The only recovered failure is a backend error while probing a directory in
//! `change_directory`, which reads as "not there".

use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};

use crate::backend::RemoteWriter;
use crate::error::PublishError;

pub mod legacy;
pub mod session;

pub use legacy::LegacyClient;
pub use session::SessionClient;

/// One configured transfer step, as entered by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferRequest {
    /// Comma-separated glob selectors relative to the base directory.
    pub source_files: String,
    /// Comma-separated glob selectors removed from the selection.
    pub excludes: String,
    /// Leading directory stripped from every selected file before it is placed remotely.
    pub remove_prefix: String,
    /// Directory below the share root receiving the files.
    pub remote_directory: String,
    /// Put every file straight into `remote_directory`, ignoring local subdirectories.
    pub flatten: bool,
    /// Empty `remote_directory` before copying.
    pub clean_remote: bool,
}

impl TransferRequest {
    pub fn new(source_files: impl Into<String>) -> Self {
        Self {
            source_files: source_files.into(),
            ..Self::default()
        }
    }

    pub fn has_configured_source_files(&self) -> bool {
        !self.source_files.trim().is_empty()
    }
}

#[async_trait]
pub trait RemoteClient: Send {
    /// Current working location in the implementation's own path grammar.
    fn context(&self) -> &str;

    fn change_to_initial_directory(&mut self) -> bool;

    /// Moves into `name` if it exists and can be read; otherwise stays put and returns
    /// `false`. Backend errors also read as `false`.
    async fn change_directory(&mut self, name: &str) -> bool;

    /// Creates `name` (one or more segments) below the current location. Missing
    /// intermediate segments are created one at a time; an existing leaf is an error.
    /// The current location does not change.
    async fn make_directory(&mut self, name: &str) -> Result<bool, PublishError>;

    /// Removes everything inside the current location.
    async fn delete_tree(&mut self) -> Result<(), PublishError>;

    fn begin_transfers(&mut self, request: &TransferRequest) -> Result<(), PublishError> {
        if request.has_configured_source_files() {
            Ok(())
        } else {
            Err(PublishError::NoSourceFiles)
        }
    }

    /// Uploads `content` as `local_file`'s base name in the current location, replacing
    /// any existing file of that name.
    async fn transfer_file(
        &mut self,
        request: &TransferRequest,
        local_file: &Path,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), PublishError>;

    /// Releases held resources, logging (never returning) any failure.
    async fn disconnect(&mut self);

    async fn disconnect_quietly(&mut self);
}

/// Copies through a buffer of `buffer_size` bytes, then shuts the writer down.
///
/// The writer is shut down even when the copy fails; the copy error wins.
pub(crate) async fn copy_bounded(
    content: &mut (dyn AsyncRead + Send + Unpin),
    mut writer: RemoteWriter,
    buffer_size: usize,
) -> std::io::Result<u64> {
    let mut reader = BufReader::with_capacity(buffer_size.max(1), content);
    let copied = tokio::io::copy_buf(&mut reader, &mut writer).await;
    let closed = writer.shutdown().await;
    let copied = copied?;
    closed?;
    Ok(copied)
}

pub(crate) fn base_name(local_file: &Path) -> String {
    local_file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The client for whichever protocol generation the target selects.
pub enum SmbClient {
    Legacy(LegacyClient),
    Session(SessionClient),
}

#[async_trait]
impl RemoteClient for SmbClient {
    fn context(&self) -> &str {
        match self {
            SmbClient::Legacy(c) => c.context(),
            SmbClient::Session(c) => c.context(),
        }
    }

    fn change_to_initial_directory(&mut self) -> bool {
        match self {
            SmbClient::Legacy(c) => c.change_to_initial_directory(),
            SmbClient::Session(c) => c.change_to_initial_directory(),
        }
    }

    async fn change_directory(&mut self, name: &str) -> bool {
        match self {
            SmbClient::Legacy(c) => c.change_directory(name).await,
            SmbClient::Session(c) => c.change_directory(name).await,
        }
    }

    async fn make_directory(&mut self, name: &str) -> Result<bool, PublishError> {
        match self {
            SmbClient::Legacy(c) => c.make_directory(name).await,
            SmbClient::Session(c) => c.make_directory(name).await,
        }
    }

    async fn delete_tree(&mut self) -> Result<(), PublishError> {
        match self {
            SmbClient::Legacy(c) => c.delete_tree().await,
            SmbClient::Session(c) => c.delete_tree().await,
        }
    }

    async fn transfer_file(
        &mut self,
        request: &TransferRequest,
        local_file: &Path,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), PublishError> {
        match self {
            SmbClient::Legacy(c) => c.transfer_file(request, local_file, content).await,
            SmbClient::Session(c) => c.transfer_file(request, local_file, content).await,
        }
    }

    async fn disconnect(&mut self) {
        match self {
            SmbClient::Legacy(c) => c.disconnect().await,
            SmbClient::Session(c) => c.disconnect().await,
        }
    }

    async fn disconnect_quietly(&mut self) {
        match self {
            SmbClient::Legacy(c) => c.disconnect_quietly().await,
            SmbClient::Session(c) => c.disconnect_quietly().await,
        }
    }
}
