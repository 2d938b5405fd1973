//! Content-encoding negotiation for stored artifacts.
//!
//! Artifacts are stored either as-is or gzip-encoded. A gzip artifact is
//! passed through to clients that accept gzip and decoded for the rest.

use axum::http::HeaderMap;
use axum::http::header::ACCEPT_ENCODING;
use bytes::Bytes;
use sitehist_storage::StoredObject;
use sitehist_storage::compression::gunzip;

/// Body and encoding to send for one stored object.
#[derive(Debug)]
pub struct Negotiated {
    pub body: Bytes,
    /// `Content-Encoding` to send, if any.
    pub content_encoding: Option<&'static str>,
    /// Whether the response depends on `Accept-Encoding`.
    pub vary: bool,
}

/// Whether the client accepts gzip.
///
/// Honors `gzip`, `x-gzip` and `*`, with `q=0` meaning refused. An explicit
/// refusal of gzip wins over a wildcard.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    let mut wildcard = false;
    for value in headers.get_all(ACCEPT_ENCODING) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for item in value.split(',') {
            let mut parts = item.split(';');
            let coding = parts.next().unwrap_or_default().trim();
            let refused = parts.any(|param| {
                param
                    .trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") {
                return !refused;
            }
            if coding == "*" && !refused {
                wildcard = true;
            }
        }
    }
    wildcard
}

/// Pick the representation of `object` for a client.
pub async fn negotiate(object: StoredObject, accept_gzip: bool) -> std::io::Result<Negotiated> {
    if !object.entry.is_gzip() {
        return Ok(Negotiated {
            body: object.bytes,
            content_encoding: None,
            vary: false,
        });
    }
    if accept_gzip {
        return Ok(Negotiated {
            body: object.bytes,
            content_encoding: Some("gzip"),
            vary: true,
        });
    }
    Ok(Negotiated {
        body: gunzip(&object.bytes).await?,
        content_encoding: None,
        vary: true,
    })
}
