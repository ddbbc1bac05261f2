//! Helpers for applications working with an environ.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::gateway::environ::Environ;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Headers that only make sense for a single transport hop.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Base URL of the application: scheme, host and `SCRIPT_NAME`.
pub fn application_uri(environ: &Environ<'_>) -> String {
    let scheme = environ.url_scheme();
    let mut url = format!("{scheme}://");

    match environ.get("HTTP_HOST").filter(|h| !h.is_empty()) {
        Some(host) => url.push_str(host),
        None => {
            url.push_str(environ.get("SERVER_NAME").unwrap_or(""));
            let port = environ.get("SERVER_PORT").unwrap_or("");
            let default = if scheme == "https" { "443" } else { "80" };
            if !port.is_empty() && port != default {
                url.push(':');
                url.push_str(port);
            }
        }
    }

    match environ.get("SCRIPT_NAME").filter(|s| !s.is_empty()) {
        Some(script) => url.extend(utf8_percent_encode(script, PATH_SET)),
        None => url.push('/'),
    }
    url
}

/// Full URL of the current request.
pub fn request_uri(environ: &Environ<'_>, include_query: bool) -> String {
    let mut url = application_uri(environ);
    let path = utf8_percent_encode(environ.path_info(), PATH_SET).to_string();
    if environ.get("SCRIPT_NAME").map_or(true, str::is_empty) {
        url.push_str(path.strip_prefix('/').unwrap_or(&path));
    } else {
        url.push_str(&path);
    }
    let query = environ.query_string();
    if include_query && !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Move the next `PATH_INFO` segment onto `SCRIPT_NAME` and return it.
///
/// Returns `None` when `PATH_INFO` is empty. Empty and `.` segments in the
/// middle of the path are dropped; `..` in the shifted name climbs out of
/// `SCRIPT_NAME`.
pub fn shift_path_info(environ: &mut Environ<'_>) -> Option<String> {
    let path_info = environ.path_info().to_string();
    if path_info.is_empty() {
        return None;
    }

    let parts: Vec<&str> = path_info.split('/').collect();
    if parts.len() < 2 {
        return None;
    }
    let last = parts.len() - 1;
    let mut kept: Vec<&str> = vec![parts[0]];
    kept.extend(
        parts[1..last]
            .iter()
            .copied()
            .filter(|p| !p.is_empty() && *p != "."),
    );
    kept.push(parts[last]);

    let name = kept.remove(1).to_string();
    let script_name = environ.get("SCRIPT_NAME").unwrap_or("").to_string();

    let mut script = normalize(&format!("{script_name}/{name}"));
    if script.ends_with('/') {
        script.pop();
    }
    if name.is_empty() && !script.ends_with('/') {
        script.push('/');
    }

    environ.set("SCRIPT_NAME", script);
    environ.set("PATH_INFO", kept.join("/"));
    Some(name)
}

/// Collapse `//`, `.` and `..` in an absolute path.
fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Everything outside the unreserved set and `/` is escaped.
const PATH_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');
