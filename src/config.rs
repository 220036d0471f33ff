//! Share target, credentials and per-run execution settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::console::{ConsoleSink, TracingSink};
use crate::path;

pub const DEFAULT_PORT: u16 = 445;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Added to the response timeout to obtain the socket timeout.
pub const SO_TIMEOUT_AFTER: Duration = Duration::from_millis(5_000);
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SmbVersion {
    /// URL-addressed SMB1 with NTLM credentials.
    #[serde(rename = "smb1", alias = "cifs")]
    Cifs1,
    #[default]
    #[serde(rename = "smb2")]
    Smb2,
    #[serde(rename = "smb3")]
    Smb3,
}

impl SmbVersion {
    pub fn description(&self) -> &'static str {
        match self {
            SmbVersion::Cifs1 => "SMB v1/CIFS",
            SmbVersion::Smb2 => "SMB v2",
            SmbVersion::Smb3 => "SMB v3",
        }
    }

    /// Legacy versions are addressed through `smb://` URLs.
    pub fn is_legacy(&self) -> bool {
        matches!(self, SmbVersion::Cifs1)
    }
}

impl fmt::Display for SmbVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Which connector carries a publish run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    /// Shares mounted as subdirectories of this local directory.
    Mounted(PathBuf),
    /// SMB over the network; `lmhosts` overrides the static name table.
    Native { lmhosts: Option<PathBuf> },
}

/// Username and password for NTLM authentication.
///
/// A username of the form `DOMAIN\user` carries its domain.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.trim().is_empty()
    }

    pub fn domain(&self) -> Option<&str> {
        self.username
            .trim()
            .split_once('\\')
            .map(|(domain, _)| domain)
    }

    /// Username without its domain.
    pub fn user(&self) -> &str {
        let username = self.username.trim();
        match username.split_once('\\') {
            Some((_, user)) => user.trim(),
            None => username,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &path::PASSWORD_PLACEHOLDER)
            .finish()
    }
}

/// One configured SMB server share. Not modified once a client is built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareTarget {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    /// `share/sub/dir`; separators of either kind are accepted.
    pub remote_root_dir: String,
    pub credential: Option<Credential>,
    pub smb_version: SmbVersion,
    pub timeout_ms: u64,
    pub buffer_size: usize,
}

impl ShareTarget {
    pub fn new(hostname: impl Into<String>, remote_root_dir: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            name: hostname.clone(),
            hostname,
            port: DEFAULT_PORT,
            remote_root_dir: remote_root_dir.into(),
            credential: None,
            smb_version: SmbVersion::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_version(mut self, version: SmbVersion) -> Self {
        self.smb_version = version;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Non-positive sizes keep the current value.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        if buffer_size > 0 {
            self.buffer_size = buffer_size;
        }
        self
    }

    pub fn hostname_trimmed(&self) -> Option<&str> {
        Some(self.hostname.trim()).filter(|h| !h.is_empty())
    }

    pub fn effective_buffer_size(&self) -> usize {
        if self.buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            self.buffer_size
        }
    }

    pub fn effective_timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            Duration::from_millis(DEFAULT_TIMEOUT_MS)
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }

    /// The target as it may appear in messages: never a password, and in legacy mode
    /// no username either.
    pub fn scrubbed(&self) -> String {
        let url = path::build_authenticated_url(
            &self.hostname,
            self.port,
            &self.remote_root_dir,
            self.credential.as_ref(),
            true,
        );
        if self.smb_version.is_legacy() {
            path::hide_user_info(&url)
        } else {
            url
        }
    }
}

/// Per-agent settings; a blank WINS server counts as none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeProperties {
    wins_server: Option<String>,
}

impl NodeProperties {
    pub fn new(wins_server: Option<&str>) -> Self {
        Self {
            wins_server: wins_server
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string),
        }
    }

    pub fn wins_server(&self) -> Option<&str> {
        self.wins_server.as_deref()
    }
}

/// Picks the WINS server for a run.
///
/// On the controller only the global defaults apply. On an agent its own properties win
/// whenever present, even without a WINS server; otherwise the defaults apply.
pub fn resolve_wins_server(
    on_controller: bool,
    defaults: Option<&NodeProperties>,
    current: Option<&NodeProperties>,
) -> Option<String> {
    let chosen = if on_controller {
        defaults
    } else {
        current.or(defaults)
    };
    chosen.and_then(|props| props.wins_server().map(str::to_string))
}

/// Settings supplied by the caller for one publish attempt.
#[derive(Clone)]
pub struct ExecutionContext {
    verbose: bool,
    wins_server: Option<String>,
    sink: Arc<dyn ConsoleSink>,
}

impl ExecutionContext {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            wins_server: None,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_wins_server(mut self, wins_server: Option<String>) -> Self {
        self.wins_server = wins_server
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ConsoleSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn wins_server(&self) -> Option<&str> {
        self.wins_server.as_deref()
    }

    pub fn println(&self, line: &str) {
        self.sink.println(line);
    }

    pub fn print_if_verbose(&self, line: &str) {
        if self.verbose {
            self.sink.println(line);
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("verbose", &self.verbose)
            .field("wins_server", &self.wins_server)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameResolver {
    Lmhosts,
    Wins,
    Dns,
    Bcast,
}

impl NameResolver {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameResolver::Lmhosts => "LMHOSTS",
            NameResolver::Wins => "WINS",
            NameResolver::Dns => "DNS",
            NameResolver::Bcast => "BCAST",
        }
    }
}

/// Protocol settings handed to the backend with every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolTuning {
    pub dialect: SmbVersion,
    pub response_timeout: Duration,
    pub socket_timeout: Duration,
    pub buffer_size: usize,
    pub wins_server: Option<String>,
    pub resolve_order: Vec<NameResolver>,
}

impl ProtocolTuning {
    /// Derives the tuning for `target`, reporting each decision on the verbose console.
    pub fn resolve(target: &ShareTarget, ctx: &ExecutionContext) -> Self {
        let response_timeout = target.effective_timeout();
        let socket_timeout = response_timeout + SO_TIMEOUT_AFTER;
        let buffer_size = target.effective_buffer_size();

        let (wins_server, resolve_order) = match ctx.wins_server() {
            Some(wins) => {
                ctx.print_if_verbose(&format!("Using WINS server [{wins}]"));
                (
                    Some(wins.to_string()),
                    vec![
                        NameResolver::Lmhosts,
                        NameResolver::Wins,
                        NameResolver::Dns,
                        NameResolver::Bcast,
                    ],
                )
            }
            None => {
                ctx.print_if_verbose("No WINS server configured, WINS removed from name resolution");
                (
                    None,
                    vec![NameResolver::Lmhosts, NameResolver::Dns, NameResolver::Bcast],
                )
            }
        };

        if ctx.is_verbose() {
            ctx.println(&format!("Response timeout [{}ms]", response_timeout.as_millis()));
            ctx.println(&format!("Socket timeout [{}ms]", socket_timeout.as_millis()));
            ctx.println(&format!("Copy buffer size [{buffer_size}]"));
        }

        let tuning = Self {
            dialect: target.smb_version,
            response_timeout,
            socket_timeout,
            buffer_size,
            wins_server,
            resolve_order,
        };
        debug!(
            dialect = %tuning.dialect,
            resolve_order = %tuning.resolve_order_string(),
            "Resolved protocol tuning"
        );
        tuning
    }

    /// Comma-separated resolution order, e.g. `LMHOSTS,DNS,BCAST`.
    pub fn resolve_order_string(&self) -> String {
        self.resolve_order
            .iter()
            .map(NameResolver::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}
