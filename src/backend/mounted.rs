//! Backend for a server whose shares are mounted as local directories.
//!
//! The mount root stands for the server: each top-level directory below it is a share.
//! Both the legacy URL shape and the share-session shape are served from the same tree,
//! so one configuration works with every [`SmbVersion`](crate::config::SmbVersion).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{
    BackendError, ConnectSettings, Connector, RemoteWriter, ShareSession, UrlFileSystem,
};
use crate::config::Credential;
use crate::path::{self, SMB_URL_PREFIX};

#[derive(Debug, Clone)]
pub struct MountedShares {
    root: PathBuf,
    account: Option<Credential>,
}

impl MountedShares {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            account: None,
        }
    }

    /// Only accept connections presenting exactly this credential.
    pub fn with_account(mut self, account: Credential) -> Self {
        self.account = Some(account);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn authenticate(&self, settings: &ConnectSettings) -> Result<(), BackendError> {
        let Some(account) = &self.account else {
            return Ok(());
        };
        let accepted = settings.credential.as_ref().is_some_and(|offered| {
            offered.domain() == account.domain()
                && offered.user() == account.user()
                && offered.password == account.password
        });
        if accepted {
            Ok(())
        } else {
            Err(BackendError::Authentication(settings.host.clone()))
        }
    }
}

#[async_trait]
impl Connector for MountedShares {
    async fn open_url_session(
        &self,
        settings: &ConnectSettings,
    ) -> Result<Box<dyn UrlFileSystem>, BackendError> {
        self.authenticate(settings)?;
        debug!(host = %settings.host, root = %self.root.display(), "Opened mounted URL session");
        Ok(Box::new(MountedUrlFs {
            root: self.root.clone(),
        }))
    }

    async fn open_share(
        &self,
        settings: &ConnectSettings,
        share: &str,
    ) -> Result<Box<dyn ShareSession>, BackendError> {
        self.authenticate(settings)?;
        let share_root = resolve(&self.root, &[share])?;
        if !fs::metadata(&share_root).await.is_ok_and(|m| m.is_dir()) {
            return Err(BackendError::Protocol(format!(
                "share [{share}] not found on [{}]",
                settings.host
            )));
        }
        debug!(host = %settings.host, share, "Attached mounted share");
        Ok(Box::new(MountedSession {
            share_root,
            attached: true,
        }))
    }
}

/// Joins validated segments onto `root`; `.` and `..` are refused.
fn resolve(root: &Path, segments: &[&str]) -> Result<PathBuf, BackendError> {
    let mut local = root.to_path_buf();
    for segment in segments {
        if *segment == "." || *segment == ".." {
            return Err(BackendError::Protocol(format!(
                "invalid path segment [{segment}]"
            )));
        }
        local.push(segment);
    }
    Ok(local)
}

async fn is_dir(local: &Path) -> bool {
    fs::metadata(local).await.is_ok_and(|m| m.is_dir())
}

async fn readable(local: &Path) -> bool {
    if is_dir(local).await {
        fs::read_dir(local).await.is_ok()
    } else {
        fs::File::open(local).await.is_ok()
    }
}

async fn remove_entry(local: &Path) -> Result<(), BackendError> {
    if is_dir(local).await {
        fs::remove_dir_all(local).await?;
    } else {
        fs::remove_file(local).await?;
    }
    Ok(())
}

async fn create_file(local: &Path) -> Result<RemoteWriter, BackendError> {
    let file = fs::File::create(local).await?;
    Ok(Box::new(file))
}

struct MountedUrlFs {
    root: PathBuf,
}

impl MountedUrlFs {
    fn local(&self, url: &str) -> Result<PathBuf, BackendError> {
        let rest = url.strip_prefix(SMB_URL_PREFIX).ok_or_else(|| {
            BackendError::Protocol(format!("not an smb URL [{}]", path::hide_user_info(url)))
        })?;
        // Names in listed URLs are verbatim, so only `/` separates segments here.
        let remote_path = rest.split_once('/').map(|(_, p)| p).unwrap_or("");
        let segments: Vec<&str> = remote_path.split('/').filter(|s| !s.is_empty()).collect();
        resolve(&self.root, &segments)
    }
}

#[async_trait]
impl UrlFileSystem for MountedUrlFs {
    async fn exists(&self, url: &str) -> Result<bool, BackendError> {
        Ok(fs::try_exists(self.local(url)?).await?)
    }

    async fn can_read(&self, url: &str) -> Result<bool, BackendError> {
        Ok(readable(&self.local(url)?).await)
    }

    async fn mkdir(&self, url: &str) -> Result<(), BackendError> {
        fs::create_dir(self.local(url)?).await?;
        Ok(())
    }

    async fn list(&self, url: &str) -> Result<Option<Vec<String>>, BackendError> {
        let local = self.local(url)?;
        if !is_dir(&local).await {
            return Ok(None);
        }
        let mut entries = fs::read_dir(&local).await?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await?.is_dir();
            children.push(path::append_url_entry(url, &name, is_dir));
        }
        children.sort();
        Ok(Some(children))
    }

    async fn delete(&self, url: &str) -> Result<(), BackendError> {
        remove_entry(&self.local(url)?).await
    }

    async fn create(&self, url: &str) -> Result<RemoteWriter, BackendError> {
        create_file(&self.local(url)?).await
    }
}

struct MountedSession {
    share_root: PathBuf,
    attached: bool,
}

impl MountedSession {
    fn local(&self, share_path: &str) -> Result<PathBuf, BackendError> {
        if !self.attached {
            return Err(BackendError::Protocol("session is closed".to_string()));
        }
        resolve(&self.share_root, &path::segments(share_path))
    }
}

#[async_trait]
impl ShareSession for MountedSession {
    async fn folder_exists(&self, path: &str) -> Result<bool, BackendError> {
        Ok(is_dir(&self.local(path)?).await)
    }

    async fn can_list(&self, path: &str) -> Result<bool, BackendError> {
        Ok(fs::read_dir(self.local(path)?).await.is_ok())
    }

    async fn mkdir(&self, path: &str) -> Result<(), BackendError> {
        fs::create_dir(self.local(path)?).await?;
        Ok(())
    }

    async fn remove_contents(&self, path: &str) -> Result<(), BackendError> {
        let mut entries = fs::read_dir(self.local(path)?).await?;
        while let Some(entry) = entries.next_entry().await? {
            remove_entry(&entry.path()).await?;
        }
        Ok(())
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, BackendError> {
        create_file(&self.local(path)?).await
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.attached = false;
        Ok(())
    }
}
