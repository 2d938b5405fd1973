//! Host header classification.
//!
//! Artifact hosts are `<tag>.<domain>`; the bare domain serves the build
//! routes. Anything else is refused.

use axum::extract::Request;
use axum::http::header::HOST;
use sitehist_core::Tag;
use sitehist_core::key::TAG_LEN;

/// What a request's host addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostKind {
    /// A built site.
    Site(Tag),
    /// The service itself.
    App,
    /// Not ours.
    Foreign,
}

/// Host of a request: the Host header, or the URI authority for
/// absolute-form requests.
pub fn request_host(req: &Request) -> Option<&str> {
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
}

/// Classify `host` against the service's base `domain`.
pub fn classify(host: Option<&str>, domain: &str) -> HostKind {
    let Some(host) = host else {
        return HostKind::Foreign;
    };
    let host = strip_port(host).trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();

    if host == domain {
        return HostKind::App;
    }

    let label = host
        .strip_suffix(domain.as_str())
        .and_then(|rest| rest.strip_suffix('.'));
    match label {
        Some(label) if label.len() == TAG_LEN => match Tag::from_label(label) {
            Ok(tag) => HostKind::Site(tag),
            Err(_) => HostKind::Foreign,
        },
        _ => HostKind::Foreign,
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal.
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
