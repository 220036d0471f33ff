#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use smb_publish::backend::{
    BackendError, ConnectSettings, Connector, MountedShares, ShareSession, UrlFileSystem,
};
use smb_publish::config::{ExecutionContext, ShareTarget, SmbVersion};
use smb_publish::console::BufferSink;

pub const HOST: &str = "srv";
pub const SHARE: &str = "myShare";

/// A mount root holding one share with a `builds` directory inside it.
pub fn mounted_server() -> (TempDir, PathBuf) {
    let root = tempfile::tempdir().expect("tempdir");
    let builds = root.path().join(SHARE).join("builds");
    std::fs::create_dir_all(&builds).expect("create share");
    (root, builds)
}

pub fn target(version: SmbVersion) -> ShareTarget {
    ShareTarget::new(HOST, format!("{SHARE}/builds")).with_version(version)
}

pub fn verbose_context() -> (ExecutionContext, BufferSink) {
    let sink = BufferSink::new();
    let exec = ExecutionContext::new(true).with_sink(Arc::new(sink.clone()));
    (exec, sink)
}

pub fn read_file(path: &Path) -> String {
    std::fs::read_to_string(path).expect("read back")
}

/// Mounted backend that counts how often a share session is opened.
pub struct CountingConnector {
    pub inner: MountedShares,
    pub share_opens: AtomicUsize,
}

impl CountingConnector {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: MountedShares::new(root),
            share_opens: AtomicUsize::new(0),
        }
    }

    pub fn opens(&self) -> usize {
        self.share_opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn open_url_session(
        &self,
        settings: &ConnectSettings,
    ) -> Result<Box<dyn UrlFileSystem>, BackendError> {
        self.inner.open_url_session(settings).await
    }

    async fn open_share(
        &self,
        settings: &ConnectSettings,
        share: &str,
    ) -> Result<Box<dyn ShareSession>, BackendError> {
        self.share_opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open_share(settings, share).await
    }
}

/// Writer keeping everything in memory and remembering whether it was shut down.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    pub data: Arc<Mutex<Vec<u8>>>,
    pub shut_down: Arc<AtomicBool>,
}

impl RecordingWriter {
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.data.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shut_down.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Yields `prefix` once, then fails every read.
pub struct FailingReader {
    prefix: Option<Vec<u8>>,
}

impl FailingReader {
    pub fn new(prefix: &[u8]) -> Self {
        Self {
            prefix: Some(prefix.to_vec()),
        }
    }
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.prefix.take() {
            Some(bytes) => {
                buf.put_slice(&bytes);
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "local source vanished",
            ))),
        }
    }
}
