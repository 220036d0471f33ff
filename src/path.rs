//! Remote path construction for both backend generations.
//!
//! Legacy (SMB1/CIFS) locations are `smb://` URLs using `/`, and directory URLs always
//! end with exactly one `/`. SMB2/3 locations are paths relative to an attached share
//! using `\`, with no leading or trailing separator; the share root is the empty path.
//!
//! Everything here is pure: no I/O, no shared state.

use std::fmt::Write;

use crate::config::{Credential, DEFAULT_PORT};

pub const SMB_URL_PREFIX: &str = "smb://";
/// Replaces the whole user-info part of a legacy URL in messages.
pub const USER_INFO_PLACEHOLDER: &str = "******";
/// Replaces a password wherever one would otherwise be rendered.
pub const PASSWORD_PLACEHOLDER: &str = "****";

const URL_SEPARATOR: char = '/';
const SHARE_SEPARATOR: &str = "\\";

/// Splits a user-entered path on either separator, dropping empty segments.
pub fn segments(raw: &str) -> Vec<&str> {
    raw.trim()
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// `smb://host[:port]/root/dir/` with exactly one separator between segments.
///
/// The port is only rendered when it differs from the SMB default.
pub fn build_share_url(host: &str, port: u16, root_dir: &str) -> String {
    build_url(host, port, root_dir, None)
}

/// Same as [`build_share_url`], with the credential embedded as URL user-info.
///
/// With `hide_password` the password is rendered as [`PASSWORD_PLACEHOLDER`].
pub fn build_authenticated_url(
    host: &str,
    port: u16,
    root_dir: &str,
    credential: Option<&Credential>,
    hide_password: bool,
) -> String {
    let user_info = credential.and_then(|c| user_info(c, hide_password));
    build_url(host, port, root_dir, user_info.as_deref())
}

fn build_url(host: &str, port: u16, root_dir: &str, user_info: Option<&str>) -> String {
    let mut url = String::with_capacity(60);
    url.push_str(SMB_URL_PREFIX);
    if let Some(info) = user_info {
        url.push_str(info);
        url.push('@');
    }
    url.push_str(host.trim());
    if port != DEFAULT_PORT {
        let _ = write!(url, ":{port}");
    }
    url.push(URL_SEPARATOR);
    for segment in segments(root_dir) {
        url.push_str(segment);
        url.push(URL_SEPARATOR);
    }
    url
}

/// `domain;user:password` with every part escaped, or `None` for anonymous access.
fn user_info(credential: &Credential, hide_password: bool) -> Option<String> {
    if credential.is_anonymous() {
        return None;
    }
    let mut info = String::new();
    if let Some(domain) = credential.domain() {
        info.push_str(&escape_for_url(domain));
        info.push(';');
    }
    info.push_str(&escape_for_url(credential.user()));
    let password = credential.password.trim();
    if !password.is_empty() {
        info.push(':');
        if hide_password {
            info.push_str(PASSWORD_PLACEHOLDER);
        } else {
            info.push_str(&escape_for_url(password));
        }
    }
    Some(info)
}

/// Directory URL for `name` under `context`, ending with exactly one `/`.
///
/// `name` may hold several segments separated by either separator.
pub fn append_url_child(context: &str, name: &str) -> String {
    let mut url = context.trim_end_matches(URL_SEPARATOR).to_string();
    for segment in segments(name) {
        url.push(URL_SEPARATOR);
        url.push_str(segment);
    }
    url.push(URL_SEPARATOR);
    url
}

/// File URL for `file_name` directly inside the directory URL `context`.
pub fn append_url_file(context: &str, file_name: &str) -> String {
    let mut url = context.trim_end_matches(URL_SEPARATOR).to_string();
    url.push(URL_SEPARATOR);
    url.push_str(file_name.trim_matches(['/', '\\']));
    url
}

/// URL of a listed directory entry. `name` is taken verbatim, so characters that
/// [`segments`] would treat as separators stay part of the name.
pub fn append_url_entry(context: &str, name: &str, is_dir: bool) -> String {
    let mut url = context.trim_end_matches(URL_SEPARATOR).to_string();
    url.push(URL_SEPARATOR);
    url.push_str(name);
    if is_dir {
        url.push(URL_SEPARATOR);
    }
    url
}

/// Share-relative path for `name` under `context`, without trailing separator.
pub fn append_share_child(context: &str, name: &str) -> String {
    let mut joined: Vec<&str> = segments(context);
    joined.extend(segments(name));
    joined.join(SHARE_SEPARATOR)
}

/// Splits an SMB2/3 root directory (`share/sub/dir`) into the share name and the
/// initial working path under it. Returns `None` when no share name is present.
pub fn split_share_and_subpath(root_dir: &str) -> Option<(String, String)> {
    let mut parts = segments(root_dir).into_iter();
    let share = parts.next()?.to_string();
    let rest: Vec<&str> = parts.collect();
    Some((share, rest.join(SHARE_SEPARATOR)))
}

/// Percent-encodes every character outside `[0-9A-Za-z]` as its UTF-8 bytes.
pub fn escape_for_url(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len() * 3);
    let mut buf = [0u8; 4];
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            encoded.push(c);
        } else {
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}

/// Masks the user-info of a legacy URL, leaving any other string untouched.
pub fn hide_user_info(url: &str) -> String {
    let Some(rest) = url.strip_prefix(SMB_URL_PREFIX) else {
        return url.to_string();
    };
    let authority_end = rest.find(URL_SEPARATOR).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{SMB_URL_PREFIX}{USER_INFO_PLACEHOLDER}{}", &rest[at..]),
        None => url.to_string(),
    }
}

/// `\\host\share\path` rendering of an SMB2/3 location for messages.
pub fn unc_path(host: &str, share: &str, path: &str) -> String {
    let mut unc = format!(r"\\{}\{}", host.trim(), share);
    if !path.is_empty() {
        unc.push_str(SHARE_SEPARATOR);
        unc.push_str(path);
    }
    unc
}
