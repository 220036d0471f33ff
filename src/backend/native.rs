//! Network backend speaking SMB2/3 through the `smb` crate (feature `smb-native`).
//!
//! Every connection consumes the [`ProtocolTuning`](crate::config::ProtocolTuning) it is
//! handed: the host goes through the configured name-resolution order, the dialect
//! range follows the configured version, the port and response timeout go into the
//! client configuration, and uploads are written in chunks of the configured buffer
//! size. The `smb` crate negotiates SMB 2.0.2 at the lowest, so the legacy URL shape is
//! served over the oldest SMB2 dialects.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use smb::{
    Client, ClientConfig, ConnectionConfig, CreateOptions, Dialect, Directory, File,
    FileAccessMask, FileAttributes, FileCreateArgs, FileDirectoryInformation, Resource, UncPath,
    WriteAt,
};
use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncReadExt, AsyncWrite, DuplexStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use super::resolve::HostResolver;
use super::{
    BackendError, ConnectSettings, Connector, RemoteWriter, ShareSession, UrlFileSystem,
};
use crate::config::{Credential, SmbVersion};
use crate::path::{self, SMB_URL_PREFIX};

#[derive(Debug, Clone, Default)]
pub struct NativeShares {
    resolver: HostResolver,
}

impl NativeShares {
    pub fn new(resolver: HostResolver) -> Self {
        Self { resolver }
    }

    async fn client_for(
        &self,
        settings: &ConnectSettings,
    ) -> Result<(Arc<Client>, String), BackendError> {
        let addr = self
            .resolver
            .resolve(&settings.host, settings.port, &settings.tuning)
            .await?;
        let (min_dialect, max_dialect) = dialect_range(settings.tuning.dialect);
        let config = ClientConfig {
            connection: ConnectionConfig {
                port: Some(addr.port()),
                timeout: Some(settings.tuning.response_timeout),
                min_dialect: Some(min_dialect),
                max_dialect: Some(max_dialect),
                ..Default::default()
            },
            ..Default::default()
        };
        debug!(
            host = %settings.host,
            %addr,
            dialect = %settings.tuning.dialect,
            "Prepared SMB client"
        );
        Ok((Arc::new(Client::new(config)), addr.ip().to_string()))
    }
}

/// Dialects offered during negotiation for each configured version.
pub fn dialect_range(version: SmbVersion) -> (Dialect, Dialect) {
    match version {
        SmbVersion::Cifs1 | SmbVersion::Smb2 => (Dialect::Smb0202, Dialect::Smb021),
        SmbVersion::Smb3 => (Dialect::Smb030, Dialect::Smb0311),
    }
}

/// NTLM account name (`DOMAIN\user` or `user`) and password; empty for anonymous.
fn account(credential: Option<&Credential>) -> (String, String) {
    match credential.filter(|c| !c.is_anonymous()) {
        Some(c) => {
            let user = match c.domain() {
                Some(domain) => format!("{domain}\\{}", c.user()),
                None => c.user().to_string(),
            };
            (user, c.password.clone())
        }
        None => (String::new(), String::new()),
    }
}

fn smb_error(e: smb::Error) -> BackendError {
    BackendError::Protocol(e.to_string())
}

fn unc(server: &str, share: &str, share_path: &str) -> Result<UncPath, BackendError> {
    path::unc_path(server, share, share_path)
        .parse::<UncPath>()
        .map_err(|e| BackendError::Protocol(format!("invalid UNC path: {e}")))
}

async fn connect_share(
    client: &Client,
    server: &str,
    share: &str,
    settings: &ConnectSettings,
) -> Result<(), BackendError> {
    let (user, password) = account(settings.credential.as_ref());
    client
        .share_connect(&unc(server, share, "")?, &user, password)
        .await
        .map_err(|e| {
            BackendError::Protocol(format!(
                "attaching [{share}] on [{}] failed: {e}",
                settings.host
            ))
        })
}

#[async_trait]
impl Connector for NativeShares {
    async fn open_url_session(
        &self,
        settings: &ConnectSettings,
    ) -> Result<Box<dyn UrlFileSystem>, BackendError> {
        let (client, server) = self.client_for(settings).await?;
        Ok(Box::new(NativeUrlFs {
            client,
            server,
            settings: settings.clone(),
            attached: Mutex::new(HashSet::new()),
        }))
    }

    async fn open_share(
        &self,
        settings: &ConnectSettings,
        share: &str,
    ) -> Result<Box<dyn ShareSession>, BackendError> {
        let (client, server) = self.client_for(settings).await?;
        connect_share(&client, &server, share, settings).await?;
        debug!(host = %settings.host, share, "Attached share");
        Ok(Box::new(NativeSession {
            tree: Tree {
                client,
                server,
                share: share.to_string(),
                buffer_size: settings.tuning.buffer_size,
            },
            attached: true,
        }))
    }
}

/// One attached share; paths are share-relative with `\` separators.
#[derive(Clone)]
struct Tree {
    client: Arc<Client>,
    server: String,
    share: String,
    buffer_size: usize,
}

impl Tree {
    async fn open(
        &self,
        share_path: &str,
        args: &FileCreateArgs,
    ) -> Result<Resource, BackendError> {
        self.client
            .create_file(&unc(&self.server, &self.share, share_path)?, args)
            .await
            .map_err(smb_error)
    }

    /// `None` when nothing can be opened at `share_path`, else whether it is a directory.
    async fn kind(&self, share_path: &str) -> Result<Option<bool>, BackendError> {
        let args =
            FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true));
        match self.open(share_path, &args).await {
            Ok(resource) => {
                let is_dir = matches!(resource, Resource::Directory(_));
                close(resource).await?;
                Ok(Some(is_dir))
            }
            Err(e) => {
                debug!(path = share_path, error = %e, "Open failed, treating as absent");
                Ok(None)
            }
        }
    }

    async fn mkdir(&self, share_path: &str) -> Result<(), BackendError> {
        let args = FileCreateArgs::make_create_new(
            FileAttributes::new().with_directory(true),
            CreateOptions::new().with_directory_file(true),
        );
        close(self.open(share_path, &args).await?).await
    }

    async fn list(&self, share_path: &str) -> Result<Option<Vec<(String, bool)>>, BackendError> {
        let args =
            FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true));
        let dir = match self.open(share_path, &args).await? {
            Resource::Directory(dir) => Arc::new(dir),
            other => {
                close(other).await?;
                return Ok(None);
            }
        };
        let mut entries = Vec::new();
        {
            let mut listing = Directory::query::<FileDirectoryInformation>(&dir, "*")
                .await
                .map_err(smb_error)?;
            while let Some(entry) = listing.next().await {
                let entry = entry.map_err(smb_error)?;
                let name = entry.file_name.to_string();
                if name != "." && name != ".." {
                    entries.push((name, entry.file_attributes.directory()));
                }
            }
        }
        dir.close().await.map_err(smb_error)?;
        Ok(Some(entries))
    }

    async fn delete_entry(&self, share_path: &str) -> Result<(), BackendError> {
        let mut args =
            FileCreateArgs::make_open_existing(FileAccessMask::new().with_delete(true));
        args.options = args.options.with_delete_on_close(true);
        close(self.open(share_path, &args).await?).await
    }

    fn remove_contents<'a>(
        &'a self,
        share_path: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let entries = self.list(share_path).await?.ok_or_else(|| {
                BackendError::Protocol(format!("[{share_path}] is not a directory"))
            })?;
            for (name, is_dir) in entries {
                let child = format!("{}\\{name}", share_path.trim_end_matches('\\'));
                let child = child.trim_start_matches('\\');
                if is_dir {
                    self.remove_contents(child).await?;
                }
                self.delete_entry(child).await?;
            }
            Ok(())
        })
    }

    async fn create(&self, share_path: &str) -> Result<RemoteWriter, BackendError> {
        let args = FileCreateArgs::make_overwrite(
            FileAttributes::new().with_archive(true),
            CreateOptions::new().with_non_directory_file(true),
        );
        match self.open(share_path, &args).await? {
            Resource::File(file) => Ok(Box::new(upload(file, self.buffer_size))),
            other => {
                close(other).await?;
                Err(BackendError::Protocol(format!(
                    "[{share_path}] is not a regular file"
                )))
            }
        }
    }
}

async fn close(resource: Resource) -> Result<(), BackendError> {
    match resource {
        Resource::File(file) => file.close().await,
        Resource::Directory(dir) => dir.close().await,
        Resource::Pipe(pipe) => pipe.close().await,
    }
    .map_err(smb_error)
}

/// Streams written bytes into `file` at increasing offsets from a background task,
/// `buffer_size` bytes at a time. Shutting the writer down waits for the task, so
/// write and close failures surface there.
fn upload(file: File, buffer_size: usize) -> NativeWriter {
    let buffer_size = buffer_size.max(1);
    let (pipe, incoming) = tokio::io::duplex(buffer_size);
    let task = tokio::spawn(async move {
        let written = pump(&file, incoming, buffer_size).await;
        let closed = file.close().await.map_err(smb_error);
        let written = written?;
        closed?;
        Ok(written)
    });
    NativeWriter {
        pipe,
        task: Some(task),
    }
}

async fn pump(
    file: &File,
    mut incoming: DuplexStream,
    buffer_size: usize,
) -> Result<u64, BackendError> {
    let mut buf = vec![0u8; buffer_size];
    let mut offset = 0u64;
    loop {
        let read = incoming.read(&mut buf).await?;
        if read == 0 {
            return Ok(offset);
        }
        let mut chunk = &buf[..read];
        while !chunk.is_empty() {
            let written = file.write_at(chunk, offset).await.map_err(smb_error)?;
            if written == 0 {
                return Err(BackendError::Protocol("server accepted no data".to_string()));
            }
            offset += written as u64;
            chunk = &chunk[written..];
        }
    }
}

struct NativeWriter {
    pipe: DuplexStream,
    task: Option<JoinHandle<Result<u64, BackendError>>>,
}

impl AsyncWrite for NativeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.pipe).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(Pin::new(&mut self.pipe).poll_shutdown(cx))?;
        let Some(task) = self.task.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let outcome = ready!(Pin::new(task).poll(cx));
        self.task = None;
        Poll::Ready(match outcome {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(io::Error::other(e)),
            Err(e) => Err(io::Error::other(e)),
        })
    }
}

struct NativeSession {
    tree: Tree,
    attached: bool,
}

impl NativeSession {
    fn tree(&self) -> Result<&Tree, BackendError> {
        if self.attached {
            Ok(&self.tree)
        } else {
            Err(BackendError::Protocol("session is closed".to_string()))
        }
    }
}

#[async_trait]
impl ShareSession for NativeSession {
    async fn folder_exists(&self, path: &str) -> Result<bool, BackendError> {
        Ok(self.tree()?.kind(path).await? == Some(true))
    }

    async fn can_list(&self, path: &str) -> Result<bool, BackendError> {
        match self.tree()?.list(path).await {
            Ok(listing) => Ok(listing.is_some()),
            Err(e) => {
                debug!(path, error = %e, "Listing failed");
                Ok(false)
            }
        }
    }

    async fn mkdir(&self, path: &str) -> Result<(), BackendError> {
        self.tree()?.mkdir(path).await
    }

    async fn remove_contents(&self, path: &str) -> Result<(), BackendError> {
        self.tree()?.remove_contents(path).await
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, BackendError> {
        self.tree()?.create(path).await
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        self.tree.client.close().await.map_err(smb_error)
    }
}

/// Legacy URL shape over one client held for the handle's lifetime. Shares are
/// attached the first time a URL addresses them.
struct NativeUrlFs {
    client: Arc<Client>,
    server: String,
    settings: ConnectSettings,
    attached: Mutex<HashSet<String>>,
}

impl NativeUrlFs {
    async fn locate(&self, url: &str) -> Result<(Tree, String), BackendError> {
        let (share, share_path) = split_url(url)?;
        let mut attached = self.attached.lock().await;
        if !attached.contains(&share) {
            connect_share(&self.client, &self.server, &share, &self.settings).await?;
            attached.insert(share.clone());
        }
        let tree = Tree {
            client: self.client.clone(),
            server: self.server.clone(),
            share,
            buffer_size: self.settings.tuning.buffer_size,
        };
        Ok((tree, share_path))
    }
}

/// Share name and `\`-separated share path of an `smb://` URL.
pub fn split_url(url: &str) -> Result<(String, String), BackendError> {
    let rest = url.strip_prefix(SMB_URL_PREFIX).ok_or_else(|| {
        BackendError::Protocol(format!("not an smb URL [{}]", path::hide_user_info(url)))
    })?;
    let remote_path = rest.split_once('/').map(|(_, p)| p).unwrap_or("");
    let mut segments = remote_path.split('/').filter(|s| !s.is_empty());
    let share = segments.next().ok_or_else(|| {
        BackendError::Protocol(format!("no share in URL [{}]", path::hide_user_info(url)))
    })?;
    Ok((share.to_string(), segments.collect::<Vec<_>>().join("\\")))
}

#[async_trait]
impl UrlFileSystem for NativeUrlFs {
    async fn exists(&self, url: &str) -> Result<bool, BackendError> {
        let (tree, share_path) = self.locate(url).await?;
        Ok(tree.kind(&share_path).await?.is_some())
    }

    async fn can_read(&self, url: &str) -> Result<bool, BackendError> {
        let (tree, share_path) = self.locate(url).await?;
        match tree.kind(&share_path).await? {
            Some(true) => Ok(tree.list(&share_path).await.is_ok_and(|l| l.is_some())),
            Some(false) => Ok(true),
            None => Ok(false),
        }
    }

    async fn mkdir(&self, url: &str) -> Result<(), BackendError> {
        let (tree, share_path) = self.locate(url).await?;
        tree.mkdir(&share_path).await
    }

    async fn list(&self, url: &str) -> Result<Option<Vec<String>>, BackendError> {
        let (tree, share_path) = self.locate(url).await?;
        Ok(tree.list(&share_path).await?.map(|entries| {
            entries
                .iter()
                .map(|(name, is_dir)| path::append_url_entry(url, name, *is_dir))
                .collect()
        }))
    }

    async fn delete(&self, url: &str) -> Result<(), BackendError> {
        let (tree, share_path) = self.locate(url).await?;
        if tree.kind(&share_path).await? == Some(true) {
            tree.remove_contents(&share_path).await?;
        }
        tree.delete_entry(&share_path).await
    }

    async fn create(&self, url: &str) -> Result<RemoteWriter, BackendError> {
        let (tree, share_path) = self.locate(url).await?;
        tree.create(&share_path).await
    }
}
