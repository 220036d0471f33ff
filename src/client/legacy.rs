//! SMB1/CIFS client addressed through `smb://` URLs.
//!
//! Path contract: every directory location is a URL ending with exactly one `/`, file
//! locations are the directory URL plus the file name. URLs may embed the credential,
//! so anything leaving this module goes through [`path::hide_user_info`] first.
//! The backend handle is opened once by the factory and held until `disconnect`.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use super::{base_name, copy_bounded, RemoteClient, TransferRequest};
use crate::backend::UrlFileSystem;
use crate::config::ExecutionContext;
use crate::error::PublishError;
use crate::path;

pub struct LegacyClient {
    fs: Option<Box<dyn UrlFileSystem>>,
    base_url: String,
    context: String,
    buffer_size: usize,
    exec: ExecutionContext,
}

impl LegacyClient {
    pub fn new(
        fs: Box<dyn UrlFileSystem>,
        base_url: impl Into<String>,
        buffer_size: usize,
        exec: ExecutionContext,
    ) -> Self {
        let base_url = path::append_url_child(&base_url.into(), "");
        Self {
            fs: Some(fs),
            context: base_url.clone(),
            base_url,
            buffer_size,
            exec,
        }
    }

    fn fs(&self, url: &str) -> Result<&dyn UrlFileSystem, PublishError> {
        self.fs.as_deref().ok_or_else(|| {
            PublishError::connection(
                format!("Client already disconnected [{}]", path::hide_user_info(url)),
                None,
            )
        })
    }

    async fn is_readable_dir(&self, url: &str) -> Result<bool, PublishError> {
        let fs = self.fs(url)?;
        let scrubbed = path::hide_user_info(url);
        let exists = fs
            .exists(url)
            .await
            .map_err(|e| PublishError::remote("check existence of", &scrubbed, e))?;
        if !exists {
            return Ok(false);
        }
        fs.can_read(url)
            .await
            .map_err(|e| PublishError::remote("check read access to", &scrubbed, e))
    }
}

#[async_trait]
impl RemoteClient for LegacyClient {
    fn context(&self) -> &str {
        &self.context
    }

    fn change_to_initial_directory(&mut self) -> bool {
        self.context = self.base_url.clone();
        true
    }

    async fn change_directory(&mut self, name: &str) -> bool {
        let candidate = path::append_url_child(&self.context, name);
        match self.is_readable_dir(&candidate).await {
            Ok(true) => {
                debug!(url = %path::hide_user_info(&candidate), "Changed directory");
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
                path::hide_user_info(&self.context)
            )));
        }
        let leaf = path::append_url_child(&self.context, name);
        let fs = self.fs(&leaf)?;
        let scrubbed_leaf = path::hide_user_info(&leaf);
        if fs
            .exists(&leaf)
            .await
            .map_err(|e| PublishError::remote("check existence of", &scrubbed_leaf, e))?
        {
            return Err(PublishError::AlreadyExists(scrubbed_leaf));
        }

        // Once one segment had to be created, everything below it is new as well.
        let mut url = self.context.clone();
        let mut creating = false;
        for segment in path::segments(name) {
            url = path::append_url_child(&url, segment);
            let scrubbed = path::hide_user_info(&url);
            if !creating && url != leaf {
                let exists = fs
                    .exists(&url)
                    .await
                    .map_err(|e| PublishError::remote("check existence of", &scrubbed, e))?;
                if exists {
                    continue;
                }
            }
            creating = true;
            self.exec
                .print_if_verbose(&format!("Create directory [{scrubbed}]"));
            fs.mkdir(&url)
                .await
                .map_err(|e| PublishError::remote("create directory", &scrubbed, e))?;
            info!(url = %scrubbed, "Created remote directory");
        }
        Ok(true)
    }

    async fn delete_tree(&mut self) -> Result<(), PublishError> {
        let scrubbed = path::hide_user_info(&self.context);
        let fs = self.fs(&self.context)?;
        self.exec.print_if_verbose(&format!("Clean [{scrubbed}]"));
        let entries = fs
            .list(&self.context)
            .await
            .map_err(|e| PublishError::remote("list files in", &scrubbed, e))?
            .ok_or_else(|| PublishError::ListingFailed(scrubbed.clone()))?;
        for entry in entries {
            let scrubbed_entry = path::hide_user_info(&entry);
            self.exec
                .print_if_verbose(&format!("Delete [{scrubbed_entry}]"));
            fs.delete(&entry)
                .await
                .map_err(|e| PublishError::remote("delete", &scrubbed_entry, e))?;
        }
        info!(url = %scrubbed, "Cleaned remote directory");
        Ok(())
    }

    async fn transfer_file(
        &mut self,
        _request: &TransferRequest,
        local_file: &Path,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), PublishError> {
        let url = path::append_url_file(&self.context, &base_name(local_file));
        let scrubbed = path::hide_user_info(&url);
        let fs = self.fs(&url)?;
        self.exec.print_if_verbose(&format!("Copy to [{scrubbed}]"));
        let writer = fs.create(&url).await.map_err(|e| PublishError::Transfer {
            path: scrubbed.clone(),
            source: e,
        })?;
        let bytes = copy_bounded(content, writer, self.buffer_size)
            .await
            .map_err(|e| PublishError::Transfer {
                path: scrubbed.clone(),
                source: e.into(),
            })?;
        info!(url = %scrubbed, bytes, "Copied file");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.fs.take().is_some() {
            debug!(url = %path::hide_user_info(&self.base_url), "Released legacy handle");
        } else {
            debug!("Legacy client already disconnected");
        }
    }

    async fn disconnect_quietly(&mut self) {
        self.fs.take();
    }
}
