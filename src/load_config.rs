use crate::client::TransferRequest;
use crate::config::{
    resolve_wins_server, BackendChoice, Credential, NodeProperties, ShareTarget, SmbVersion,
    DEFAULT_BUFFER_SIZE, DEFAULT_PORT, DEFAULT_TIMEOUT_MS,
};
use crate::publish::{PublishConfig, RetryPolicy};
use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// Environment variable holding the share password; never read from the YAML file.
pub const PASSWORD_ENV: &str = "SMB_PASSWORD";

#[derive(Deserialize)]
struct StaticConfig {
    target: TargetSection,
    #[serde(default)]
    transfers: Vec<TransferYaml>,
    #[serde(default)]
    retry: RetrySection,
    #[serde(default)]
    verbose: bool,
    /// Global default WINS server.
    #[serde(default)]
    wins_server: Option<String>,
    /// Properties of the agent running the publish; absent on the controller.
    #[serde(default)]
    node: Option<NodeSection>,
    #[serde(default)]
    backend: BackendKind,
    /// Required for the mounted backend.
    #[serde(default)]
    mount_root: Option<PathBuf>,
    /// Static name table for the native backend.
    #[serde(default)]
    lmhosts: Option<PathBuf>,
    #[serde(default = "default_base_dir")]
    base_dir: PathBuf,
}

#[derive(Deserialize, Default, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
enum BackendKind {
    #[default]
    Mounted,
    Native,
}

#[derive(Deserialize)]
struct TargetSection {
    #[serde(default)]
    name: Option<String>,
    hostname: String,
    #[serde(default = "default_port")]
    port: u16,
    remote_root_dir: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    smb_version: SmbVersion,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_buffer_size")]
    buffer_size: usize,
}

#[derive(Deserialize)]
struct TransferYaml {
    source_files: String,
    #[serde(default)]
    excludes: String,
    #[serde(default)]
    remove_prefix: String,
    #[serde(default)]
    remote_directory: String,
    #[serde(default)]
    flatten: bool,
    #[serde(default)]
    clean_remote: bool,
}

#[derive(Deserialize, Default)]
struct RetrySection {
    #[serde(default)]
    retries: u32,
    #[serde(default)]
    delay_ms: u64,
}

#[derive(Deserialize)]
struct NodeSection {
    #[serde(default)]
    wins_server: Option<String>,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

/// Loads a static YAML config file (no secrets) and injects the share password from the
/// environment. Returns a fully merged PublishConfig or an error.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PublishConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let backend = match (static_conf.backend, static_conf.mount_root) {
        (BackendKind::Mounted, Some(root)) => BackendChoice::Mounted(root),
        (BackendKind::Mounted, None) => {
            error!(config_path = ?path_ref, "mount_root missing for mounted backend");
            return Err(anyhow::anyhow!(
                "mount_root is required when backend is mounted"
            ));
        }
        (BackendKind::Native, _) => BackendChoice::Native {
            lmhosts: static_conf.lmhosts,
        },
    };
    info!(backend = ?static_conf.backend, "Selected backend");

    let credential = match static_conf.target.username.as_deref().map(str::trim) {
        Some(username) if !username.is_empty() => {
            let password = match std::env::var(PASSWORD_ENV) {
                Ok(password) => {
                    info!("{PASSWORD_ENV} found in env");
                    password
                }
                Err(e) => {
                    error!(error = ?e, "{PASSWORD_ENV} environment variable not set");
                    return Err(anyhow::anyhow!(
                        "{PASSWORD_ENV} environment variable not set: {e}"
                    ));
                }
            };
            Some(Credential::new(username, password))
        }
        _ => {
            info!("No username configured, connecting anonymously");
            None
        }
    };

    let target_section = static_conf.target;
    let mut target = ShareTarget::new(target_section.hostname, target_section.remote_root_dir)
        .with_port(target_section.port)
        .with_version(target_section.smb_version)
        .with_timeout_ms(target_section.timeout_ms)
        .with_buffer_size(target_section.buffer_size);
    if let Some(name) = target_section.name {
        target.name = name;
    }
    if let Some(credential) = credential {
        target = target.with_credential(credential);
    }

    let defaults = NodeProperties::new(static_conf.wins_server.as_deref());
    let current = static_conf
        .node
        .as_ref()
        .map(|node| NodeProperties::new(node.wins_server.as_deref()));
    let wins_server = resolve_wins_server(current.is_none(), Some(&defaults), current.as_ref());

    let transfers: Vec<TransferRequest> = static_conf
        .transfers
        .into_iter()
        .map(|t| {
            info!(source_files = %t.source_files, remote_directory = %t.remote_directory, "Parsed transfer from config");
            TransferRequest {
                source_files: t.source_files,
                excludes: t.excludes,
                remove_prefix: t.remove_prefix,
                remote_directory: t.remote_directory,
                flatten: t.flatten,
                clean_remote: t.clean_remote,
            }
        })
        .collect();

    let retry = RetryPolicy::new(
        static_conf.retry.retries,
        Duration::from_millis(static_conf.retry.delay_ms),
    );

    info!(
        share = %target.scrubbed(),
        version = %target.smb_version,
        transfers = transfers.len(),
        retries = retry.retries,
        "Config loaded and merged successfully"
    );

    Ok(PublishConfig {
        target,
        transfers,
        retry,
        verbose: static_conf.verbose,
        wins_server,
        base_dir: static_conf.base_dir,
        backend,
    })
}
