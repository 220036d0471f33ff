//! Builds a ready-to-use [`SmbClient`] for a [`ShareTarget`].
//!
//! Client creation is the only place a misconfigured share is detected gracefully: the
//! factory validates the target, connects, authenticates and probes the root for
//! existence and readability before handing out a client. Later operations treat almost
//! every failure as fatal.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::backend::{BackendError, ConnectSettings, Connector};
use crate::client::{LegacyClient, SessionClient, SmbClient};
use crate::config::{ExecutionContext, ProtocolTuning, ShareTarget};
use crate::error::PublishError;
use crate::path;

pub struct ConnectionFactory {
    connector: Arc<dyn Connector>,
}

impl ConnectionFactory {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    pub async fn create_client(
        &self,
        target: &ShareTarget,
        exec: &ExecutionContext,
    ) -> Result<SmbClient, PublishError> {
        let host = assert_required_options(target)?;
        let tuning = ProtocolTuning::resolve(target, exec);
        let socket_timeout = tuning.socket_timeout;
        let settings = ConnectSettings {
            host: host.to_string(),
            port: target.port,
            credential: target.credential.clone(),
            tuning,
        };
        let scrubbed = target.scrubbed();
        info!(
            share = %scrubbed,
            version = %target.smb_version,
            "Connecting to share"
        );

        let client = bounded(socket_timeout, &scrubbed, async {
            if target.smb_version.is_legacy() {
                self.connect_legacy(target, settings, exec, &scrubbed).await
            } else {
                self.connect_session(target, settings, exec, &scrubbed).await
            }
        })
        .await;

        match &client {
            Ok(_) => info!(share = %scrubbed, "Share is reachable and readable"),
            Err(e) => error!(share = %scrubbed, error = %e, "Failed to connect to share"),
        }
        client
    }

    async fn connect_legacy(
        &self,
        target: &ShareTarget,
        settings: ConnectSettings,
        exec: &ExecutionContext,
        scrubbed: &str,
    ) -> Result<SmbClient, PublishError> {
        let url = path::build_authenticated_url(
            &settings.host,
            settings.port,
            &target.remote_root_dir,
            settings.credential.as_ref(),
            false,
        );
        let fs = self
            .connector
            .open_url_session(&settings)
            .await
            .map_err(|e| {
                PublishError::connection(format!("Failed to connect to [{scrubbed}]"), Some(e))
            })?;

        let probe_failed = |e: BackendError| {
            PublishError::connection(format!("Failed to check share [{scrubbed}]"), Some(e))
        };
        if !fs.exists(&url).await.map_err(probe_failed)? {
            return Err(PublishError::connection(
                format!("Share does not exist [{scrubbed}]"),
                None,
            ));
        }
        if !fs.can_read(&url).await.map_err(probe_failed)? {
            return Err(PublishError::connection(
                format!("Cannot read share [{scrubbed}]"),
                None,
            ));
        }
        Ok(SmbClient::Legacy(LegacyClient::new(
            fs,
            url,
            settings.tuning.buffer_size,
            exec.clone(),
        )))
    }

    async fn connect_session(
        &self,
        target: &ShareTarget,
        settings: ConnectSettings,
        exec: &ExecutionContext,
        scrubbed: &str,
    ) -> Result<SmbClient, PublishError> {
        let (share, initial_path) = path::split_share_and_subpath(&target.remote_root_dir)
            .ok_or_else(|| {
                PublishError::Configuration(format!("No share name in remote root [{scrubbed}]"))
            })?;
        let mut session = self
            .connector
            .open_share(&settings, &share)
            .await
            .map_err(|e| {
                PublishError::connection(format!("Failed to connect to [{scrubbed}]"), Some(e))
            })?;

        let probe = match session.folder_exists(&initial_path).await {
            Ok(true) => session.can_list(&initial_path).await.map(|readable| {
                readable
                    .then_some(())
                    .ok_or_else(|| format!("Cannot read share [{scrubbed}]"))
            }),
            Ok(false) => Ok(Err(format!("Share does not exist [{scrubbed}]"))),
            Err(e) => Err(e),
        };
        // The probe session is never reused; a close failure does not hide the probe result.
        if let Err(e) = session.close().await {
            debug!(share = %scrubbed, error = %e, "Failed to close probe session");
        }

        match probe {
            Ok(Ok(())) => Ok(SmbClient::Session(SessionClient::new(
                self.connector.clone(),
                settings,
                share,
                initial_path,
                exec.clone(),
            ))),
            Ok(Err(message)) => Err(PublishError::connection(message, None)),
            Err(e) => Err(PublishError::connection(
                format!("Failed to check share [{scrubbed}]"),
                Some(e),
            )),
        }
    }
}

/// Hostname and remote root are mandatory; checked before any network call.
fn assert_required_options(target: &ShareTarget) -> Result<&str, PublishError> {
    let host = target
        .hostname_trimmed()
        .ok_or_else(|| PublishError::Configuration("Hostname is required".to_string()))?;
    if target.remote_root_dir.trim().is_empty() {
        return Err(PublishError::Configuration(
            "Share (remote root directory) is required".to_string(),
        ));
    }
    Ok(host)
}

async fn bounded<T>(
    limit: std::time::Duration,
    scrubbed: &str,
    fut: impl Future<Output = Result<T, PublishError>>,
) -> Result<T, PublishError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PublishError::connection(
            format!(
                "Timed out after {}ms connecting to [{scrubbed}]",
                limit.as_millis()
            ),
            None,
        )),
    }
}
