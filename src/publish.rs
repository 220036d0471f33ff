//! Drives one publish run: resolve local files, then for every attempt create a client,
//! position it and copy each file, retrying whole attempts as configured.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::client::{base_name, RemoteClient, TransferRequest};
use crate::config::{BackendChoice, ExecutionContext, ShareTarget};
use crate::connect::ConnectionFactory;
use crate::error::{ErrorKind, PublishError};
use crate::path;

/// The top-level publish configuration.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub target: ShareTarget,
    pub transfers: Vec<TransferRequest>,
    pub retry: RetryPolicy,
    pub verbose: bool,
    /// WINS server already resolved from node and global settings.
    pub wins_server: Option<String>,
    /// Directory the source selectors are relative to.
    pub base_dir: PathBuf,
    pub backend: BackendChoice,
}

/// How often a failed attempt is repeated, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Configuration mistakes fail the same way every time, so they are never retried.
    pub fn should_retry(&self, error: &PublishError, attempt: u32) -> bool {
        attempt <= self.retries
            && !matches!(
                error.kind(),
                ErrorKind::Configuration | ErrorKind::NoSourceFiles
            )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublishReport {
    /// Scrubbed target URL.
    pub target: String,
    pub attempts: u32,
    pub transfers: Vec<TransferReport>,
}

impl PublishReport {
    pub fn files_transferred(&self) -> usize {
        self.transfers.iter().map(|t| t.files.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TransferReport {
    pub remote_directory: String,
    /// Remote paths relative to the share root, `/`-separated.
    pub files: Vec<String>,
}

/// A local file selected for upload, with the directory it goes to below the
/// request's remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub local: PathBuf,
    pub relative_dir: String,
}

/// Selects files under `base_dir` for `request`, in stable (sorted) order.
pub async fn resolve_files(
    base_dir: &Path,
    request: &TransferRequest,
) -> Result<Vec<ResolvedFile>, PublishError> {
    if !request.has_configured_source_files() {
        return Ok(Vec::new());
    }
    let includes = compile_selectors(&request.source_files)?;
    let excludes = compile_selectors(&request.excludes)?;
    let prefix = path::segments(&request.remove_prefix);

    let mut relative_paths = walk(base_dir).await.map_err(|e| {
        PublishError::Configuration(format!(
            "Cannot read base directory [{}]: {e}",
            base_dir.display()
        ))
    })?;
    relative_paths.sort();

    let mut resolved = Vec::new();
    for relative in relative_paths {
        let selected = includes.iter().any(|re| re.is_match(&relative))
            && !excludes.iter().any(|re| re.is_match(&relative));
        if !selected {
            continue;
        }
        let mut dirs = path::segments(&relative);
        dirs.pop();
        let relative_dir = if request.flatten {
            String::new()
        } else {
            if !dirs.starts_with(&prefix) {
                return Err(PublishError::Configuration(format!(
                    "File [{relative}] does not start with prefix to remove [{}]",
                    request.remove_prefix
                )));
            }
            dirs[prefix.len()..].join("/")
        };
        resolved.push(ResolvedFile {
            local: base_dir.join(&relative),
            relative_dir,
        });
    }
    Ok(resolved)
}

/// Comma-separated glob selectors; `**` crosses directories, `*` and `?` do not.
fn compile_selectors(patterns: &str) -> Result<Vec<Regex>, PublishError> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|pattern| {
            Regex::new(&glob_to_regex(pattern)).map_err(|e| {
                PublishError::Configuration(format!("Invalid file pattern [{pattern}]: {e}"))
            })
        })
        .collect()
}

fn glob_to_regex(pattern: &str) -> String {
    let normalized = path::segments(pattern).join("/");
    let mut re = String::from("^");
    let mut chars = normalized.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    re.push_str("(?:.*/)?");
                } else {
                    re.push_str(".*");
                }
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    re
}

/// Relative `/`-separated paths of every file below `base_dir`.
async fn walk(base_dir: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![(base_dir.to_path_buf(), String::new())];
    while let Some((dir, relative)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = if relative.is_empty() {
                name
            } else {
                format!("{relative}/{name}")
            };
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), child));
            } else {
                files.push(child);
            }
        }
    }
    Ok(files)
}

/// Runs the whole publish, retrying failed attempts per `config.retry`.
pub async fn publish(
    factory: &ConnectionFactory,
    config: &PublishConfig,
    exec: &ExecutionContext,
) -> Result<PublishReport, PublishError> {
    let scrubbed = config.target.scrubbed();
    info!(share = %scrubbed, transfers = config.transfers.len(), "[PUBLISH] Starting publish");

    let mut plan = Vec::with_capacity(config.transfers.len());
    for request in &config.transfers {
        let files = resolve_files(&config.base_dir, request).await?;
        debug!(
            source_files = %request.source_files,
            matched = files.len(),
            "[PUBLISH] Resolved local files"
        );
        plan.push((request, files));
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        match publish_attempt(factory, config, exec, &plan).await {
            Ok(transfers) => {
                let report = PublishReport {
                    target: scrubbed,
                    attempts: attempt,
                    transfers,
                };
                info!(
                    attempts = attempt,
                    files = report.files_transferred(),
                    "[PUBLISH] Publish succeeded"
                );
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => debug!(json = %json, "[PUBLISH][DEBUG] Publish report as JSON"),
                    Err(e) => error!(error = ?e, "[PUBLISH][DEBUG] Failed to serialize publish report"),
                }
                return Ok(report);
            }
            Err(e) if config.retry.should_retry(&e, attempt) => {
                warn!(attempt, error = %e, "[PUBLISH] Attempt failed, retrying");
                exec.println(&format!(
                    "Attempt {attempt} failed, retrying in {}ms: {e}",
                    config.retry.delay.as_millis()
                ));
                tokio::time::sleep(config.retry.delay).await;
            }
            Err(e) => {
                error!(attempt, error = %e, kind = e.kind().key(), "[PUBLISH][ERROR] Publish failed");
                return Err(e);
            }
        }
    }
}

async fn publish_attempt(
    factory: &ConnectionFactory,
    config: &PublishConfig,
    exec: &ExecutionContext,
    plan: &[(&TransferRequest, Vec<ResolvedFile>)],
) -> Result<Vec<TransferReport>, PublishError> {
    let mut client = factory.create_client(&config.target, exec).await?;
    let mut reports = Vec::with_capacity(plan.len());
    let mut outcome = Ok(());
    for (request, files) in plan {
        match transfer(&mut client, request, files).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    match outcome {
        Ok(()) => {
            client.disconnect().await;
            Ok(reports)
        }
        Err(e) => {
            client.disconnect_quietly().await;
            Err(e)
        }
    }
}

/// One transfer request against an already connected client.
pub async fn transfer<C: RemoteClient + ?Sized>(
    client: &mut C,
    request: &TransferRequest,
    files: &[ResolvedFile],
) -> Result<TransferReport, PublishError> {
    client.begin_transfers(request)?;
    let remote_directory = path::segments(&request.remote_directory).join("/");

    client.change_to_initial_directory();
    enter_directory(client, &remote_directory).await?;
    if request.clean_remote {
        client.delete_tree().await?;
    }

    let mut positioned = remote_directory.clone();
    let mut copied = Vec::with_capacity(files.len());
    for file in files {
        let destination = join_remote(&remote_directory, &file.relative_dir);
        if destination != positioned {
            client.change_to_initial_directory();
            enter_directory(client, &destination).await?;
            positioned = destination.clone();
        }
        let mut content = tokio::fs::File::open(&file.local)
            .await
            .map_err(|e| PublishError::Transfer {
                path: file.local.display().to_string(),
                source: e.into(),
            })?;
        client.transfer_file(request, &file.local, &mut content).await?;
        copied.push(join_remote(&destination, &base_name(&file.local)));
    }

    Ok(TransferReport {
        remote_directory,
        files: copied,
    })
}

/// Moves into `dir` below the current location, creating it when it cannot be entered.
async fn enter_directory<C: RemoteClient + ?Sized>(
    client: &mut C,
    dir: &str,
) -> Result<(), PublishError> {
    if dir.is_empty() || client.change_directory(dir).await {
        return Ok(());
    }
    client.make_directory(dir).await?;
    if client.change_directory(dir).await {
        Ok(())
    } else {
        Err(PublishError::remote(
            "enter directory",
            dir,
            crate::backend::BackendError::Protocol(
                "directory is not readable after creation".to_string(),
            ),
        ))
    }
}

fn join_remote(parent: &str, child: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{parent}/{child}"),
    }
}
