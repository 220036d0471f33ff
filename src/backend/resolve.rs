//! Host name resolution following [`ProtocolTuning::resolve_order`].
//!
//! Each source is tried in the configured order until one answers:
//!
//! - `LMHOSTS`: a static `address name` table, read from [`LMHOSTS_PATH`] unless overridden.
//! - `WINS`: a unicast NetBIOS name query to the configured WINS server.
//! - `DNS`: the system resolver.
//! - `BCAST`: a NetBIOS name query broadcast on the local segment.
//!
//! Literal addresses skip resolution entirely.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use super::BackendError;
use crate::config::{NameResolver, ProtocolTuning};

pub const LMHOSTS_PATH: &str = "/etc/samba/lmhosts";
pub const NETBIOS_NAME_PORT: u16 = 137;
/// How long one NetBIOS name query waits for an answer.
pub const NAME_QUERY_TIMEOUT: Duration = Duration::from_millis(3_000);

/// NetBIOS suffix of the file server service.
const FILE_SERVER_SUFFIX: u8 = 0x20;
const NB_TYPE: u16 = 0x0020;
const IN_CLASS: u16 = 0x0001;
const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;
const FLAG_BROADCAST: u16 = 0x0010;

static NEXT_QUERY_ID: AtomicU16 = AtomicU16::new(1);

#[derive(Debug, Clone)]
pub struct HostResolver {
    lmhosts: PathBuf,
    query_timeout: Duration,
}

impl Default for HostResolver {
    fn default() -> Self {
        Self {
            lmhosts: PathBuf::from(LMHOSTS_PATH),
            query_timeout: NAME_QUERY_TIMEOUT,
        }
    }
}

impl HostResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lmhosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.lmhosts = path.into();
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Resolves `host` to the address a connection to `port` should use.
    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        tuning: &ProtocolTuning,
    ) -> Result<SocketAddr, BackendError> {
        let host = host.trim();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        for resolver in &tuning.resolve_order {
            let found = match resolver {
                NameResolver::Lmhosts => self.from_lmhosts(host).await,
                NameResolver::Wins => match tuning.wins_server.as_deref() {
                    Some(wins) => self.from_wins(host, wins).await,
                    None => None,
                },
                NameResolver::Dns => from_dns(host, port).await,
                NameResolver::Bcast => self.from_broadcast(host).await,
            };
            if let Some(ip) = found {
                debug!(host, resolver = resolver.as_str(), %ip, "Resolved host name");
                return Ok(SocketAddr::new(ip, port));
            }
        }
        Err(BackendError::Protocol(format!(
            "cannot resolve [{host}] via {}",
            tuning.resolve_order_string()
        )))
    }

    async fn from_lmhosts(&self, host: &str) -> Option<IpAddr> {
        let content = tokio::fs::read_to_string(&self.lmhosts).await.ok()?;
        lookup_lmhosts(&content, host)
    }

    async fn from_wins(&self, host: &str, wins: &str) -> Option<IpAddr> {
        let server = wins_address(wins).await?;
        self.name_query(host, server, false).await
    }

    async fn from_broadcast(&self, host: &str) -> Option<IpAddr> {
        let server = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), NETBIOS_NAME_PORT);
        self.name_query(host, server, true).await
    }

    async fn name_query(&self, host: &str, server: SocketAddr, broadcast: bool) -> Option<IpAddr> {
        let id = NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed);
        let query = encode_name_query(id, host, broadcast);
        let exchange = async {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
            socket.set_broadcast(broadcast)?;
            socket.send_to(&query, server).await?;
            let mut buf = [0u8; 576];
            loop {
                let (len, _) = socket.recv_from(&mut buf).await?;
                if let Some(ip) = parse_name_query_response(id, &buf[..len]) {
                    return Ok::<_, std::io::Error>(ip);
                }
            }
        };
        match tokio::time::timeout(self.query_timeout, exchange).await {
            Ok(Ok(ip)) => Some(IpAddr::V4(ip)),
            Ok(Err(e)) => {
                debug!(host, %server, error = %e, "NetBIOS name query failed");
                None
            }
            Err(_) => {
                debug!(host, %server, "NetBIOS name query timed out");
                None
            }
        }
    }
}

async fn from_dns(host: &str, port: u16) -> Option<IpAddr> {
    match lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next().map(|addr| addr.ip()),
        Err(e) => {
            debug!(host, error = %e, "DNS lookup failed");
            None
        }
    }
}

/// `address`, `address:port` or a host name, defaulting to the NetBIOS name port.
async fn wins_address(wins: &str) -> Option<SocketAddr> {
    if let Ok(addr) = wins.parse::<SocketAddr>() {
        return Some(addr);
    }
    if let Ok(ip) = wins.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, NETBIOS_NAME_PORT));
    }
    lookup_host((wins, NETBIOS_NAME_PORT)).await.ok()?.next()
}

/// Finds `host` in lmhosts content. Names compare case-insensitively, lines starting
/// with `#` are comments and keywords such as `#PRE` after the name are ignored.
pub fn lookup_lmhosts(content: &str, host: &str) -> Option<IpAddr> {
    content.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let address = fields.next().filter(|a| !a.starts_with('#'))?;
        let name = fields.next()?;
        if name.eq_ignore_ascii_case(host) {
            address.parse().ok()
        } else {
            None
        }
    })
}

/// First-level encoding of a NetBIOS name: upper-cased, space padded to 15 bytes, the
/// service suffix appended, and every nibble mapped onto `'A'..='P'`.
pub fn encode_netbios_name(name: &str) -> [u8; 32] {
    let mut raw = [b' '; 16];
    let short = name.split('.').next().unwrap_or(name).to_ascii_uppercase();
    for (slot, byte) in raw.iter_mut().zip(short.bytes().take(15)) {
        *slot = byte;
    }
    raw[15] = FILE_SERVER_SUFFIX;

    let mut encoded = [0u8; 32];
    for (i, byte) in raw.iter().enumerate() {
        encoded[2 * i] = b'A' + (byte >> 4);
        encoded[2 * i + 1] = b'A' + (byte & 0x0F);
    }
    encoded
}

pub fn encode_name_query(id: u16, name: &str, broadcast: bool) -> Vec<u8> {
    let mut flags = FLAG_RECURSION_DESIRED;
    if broadcast {
        flags |= FLAG_BROADCAST;
    }
    let mut packet = Vec::with_capacity(50);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes());
    packet.extend_from_slice(&[0; 6]);
    packet.push(32);
    packet.extend_from_slice(&encode_netbios_name(name));
    packet.push(0);
    packet.extend_from_slice(&NB_TYPE.to_be_bytes());
    packet.extend_from_slice(&IN_CLASS.to_be_bytes());
    packet
}

/// First address of a positive answer to query `id`; anything else is `None`.
pub fn parse_name_query_response(id: u16, packet: &[u8]) -> Option<Ipv4Addr> {
    let word = |at: usize| -> Option<u16> {
        Some(u16::from_be_bytes([*packet.get(at)?, *packet.get(at + 1)?]))
    };
    let flags = word(2)?;
    if word(0)? != id || flags & FLAG_RESPONSE == 0 || flags & 0x000F != 0 || word(6)? == 0 {
        return None;
    }

    let mut at = 12;
    loop {
        let len = *packet.get(at)? as usize;
        if len & 0xC0 == 0xC0 {
            at += 2;
            break;
        }
        at += 1 + len;
        if len == 0 {
            break;
        }
    }
    // type, class, ttl
    at += 8;
    let rdlength = word(at)? as usize;
    at += 2;
    // NB_FLAGS, then the address
    if rdlength < 6 {
        return None;
    }
    let address = packet.get(at + 2..at + 6)?;
    Some(Ipv4Addr::new(address[0], address[1], address[2], address[3]))
}
