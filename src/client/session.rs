//! SMB2/3 client addressed through share-relative paths.
//!
//! Path contract: locations use `\`, carry no leading or trailing separator, and the
//! share root is the empty string. Every top-level operation opens its own session
//! (connect, authenticate, attach share), runs, and closes it again, so a dropped
//! connection only fails the operation that was running.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use super::{base_name, copy_bounded, RemoteClient, TransferRequest};
use crate::backend::{ConnectSettings, Connector, ShareSession};
use crate::config::ExecutionContext;
use crate::error::PublishError;
use crate::path;

pub struct SessionClient {
    connector: Arc<dyn Connector>,
    settings: ConnectSettings,
    share: String,
    initial_path: String,
    context: String,
    buffer_size: usize,
    exec: ExecutionContext,
    connected: bool,
}

impl SessionClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: ConnectSettings,
        share: impl Into<String>,
        initial_path: impl Into<String>,
        exec: ExecutionContext,
    ) -> Self {
        let initial_path = path::append_share_child(&initial_path.into(), "");
        Self {
            connector,
            buffer_size: settings.tuning.buffer_size,
            settings,
            share: share.into(),
            context: initial_path.clone(),
            initial_path,
            exec,
            connected: true,
        }
    }

    pub fn share(&self) -> &str {
        &self.share
    }

    fn display(&self, share_path: &str) -> String {
        path::unc_path(&self.settings.host, &self.share, share_path)
    }

    async fn open(&self, share_path: &str) -> Result<Box<dyn ShareSession>, PublishError> {
        if !self.connected {
            return Err(PublishError::connection(
                format!("Client already disconnected [{}]", self.display(share_path)),
                None,
            ));
        }
        self.connector
            .open_share(&self.settings, &self.share)
            .await
            .map_err(|e| {
                PublishError::connection(
                    format!("Failed to open session for [{}]", self.display(share_path)),
                    Some(e),
                )
            })
    }

    async fn release(mut session: Box<dyn ShareSession>) {
        if let Err(e) = session.close().await {
            debug!(error = %e, "Failed to close share session");
        }
    }

    async fn is_listable_dir(&self, share_path: &str) -> Result<bool, PublishError> {
        let session = self.open(share_path).await?;
        let result = match session.folder_exists(share_path).await {
            Ok(true) => session.can_list(share_path).await,
            other => other,
        };
        Self::release(session).await;
        result.map_err(|e| PublishError::remote("check", self.display(share_path), e))
    }

    async fn make_directories(
        &self,
        session: &dyn ShareSession,
        name: &str,
        leaf: &str,
    ) -> Result<(), PublishError> {
        let shown_leaf = self.display(leaf);
        let leaf_exists = session
            .folder_exists(leaf)
            .await
            .map_err(|e| PublishError::remote("check existence of", &shown_leaf, e))?;
        if leaf_exists {
            return Err(PublishError::AlreadyExists(shown_leaf));
        }

        // Once one segment had to be created, everything below it is new as well.
        let mut current = self.context.clone();
        let mut creating = false;
        for segment in path::segments(name) {
            current = path::append_share_child(&current, segment);
            let shown = self.display(&current);
            if !creating && current != leaf {
                let exists = session
                    .folder_exists(&current)
                    .await
                    .map_err(|e| PublishError::remote("check existence of", &shown, e))?;
                if exists {
                    continue;
                }
            }
            creating = true;
            self.exec
                .print_if_verbose(&format!("Create directory [{shown}]"));
            session
                .mkdir(&current)
                .await
                .map_err(|e| PublishError::remote("create directory", &shown, e))?;
            info!(path = %shown, "Created remote directory");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for SessionClient {
    fn context(&self) -> &str {
        &self.context
    }

    fn change_to_initial_directory(&mut self) -> bool {
        self.context = self.initial_path.clone();
        true
    }

    async fn change_directory(&mut self, name: &str) -> bool {
        let candidate = path::append_share_child(&self.context, name);
        match self.is_listable_dir(&candidate).await {
            Ok(true) => {
                debug!(path = %self.display(&candidate), "Changed directory");
                self.context = candidate;
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(error = %e, "Directory probe failed, treating as absent");
                false
            }
        }
    }

    async fn make_directory(&mut self, name: &str) -> Result<bool, PublishError> {
        if path::segments(name).is_empty() {
            return Err(PublishError::Configuration(format!(
                "No directory name given below [{}]",
                self.display(&self.context)
            )));
        }
        let leaf = path::append_share_child(&self.context, name);
        let session = self.open(&leaf).await?;
        let result = self.make_directories(session.as_ref(), name, &leaf).await;
        Self::release(session).await;
        result.map(|_| true)
    }

    async fn delete_tree(&mut self) -> Result<(), PublishError> {
        let shown = self.display(&self.context);
        let session = self.open(&self.context).await?;
        self.exec.print_if_verbose(&format!("Clean [{shown}]"));
        let result = session
            .remove_contents(&self.context)
            .await
            .map_err(|e| PublishError::remote("clean", &shown, e));
        Self::release(session).await;
        result?;
        info!(path = %shown, "Cleaned remote directory");
        Ok(())
    }

    async fn transfer_file(
        &mut self,
        _request: &TransferRequest,
        local_file: &Path,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), PublishError> {
        let target = path::append_share_child(&self.context, &base_name(local_file));
        let shown = self.display(&target);
        let session = self.open(&target).await?;
        self.exec.print_if_verbose(&format!("Copy to [{shown}]"));
        let result = match session.create(&target).await {
            Ok(writer) => copy_bounded(content, writer, self.buffer_size)
                .await
                .map_err(|e| PublishError::Transfer {
                    path: shown.clone(),
                    source: e.into(),
                }),
            Err(e) => Err(PublishError::Transfer {
                path: shown.clone(),
                source: e,
            }),
        };
        Self::release(session).await;
        let bytes = result?;
        info!(path = %shown, bytes, "Copied file");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.connected {
            debug!(share = %self.share, "Session client disconnected");
        }
        self.connected = false;
    }

    async fn disconnect_quietly(&mut self) {
        self.connected = false;
    }
}
