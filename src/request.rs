//! Request-side view of an intercepted HTTP exchange.
//!
//! The engine matches against a canonical URL rendered without the port,
//! with the host folded to lowercase and the path left untouched. Request
//! types are inferred from fetch metadata headers where present, falling
//! back to `Accept` and the path extension.

use bitflags::bitflags;
use http::header;
use url::Url;

use crate::ruletree::QueryAddress;

bitflags! {
    /// Resource categories a rule can be scoped to with `$script`,
    /// `$image`, etc.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct ContentTypeMask: u16 {
        const DOCUMENT    = 1 << 0;
        const SUBDOCUMENT = 1 << 1;
        const SCRIPT      = 1 << 2;
        const STYLESHEET  = 1 << 3;
        const IMAGE       = 1 << 4;
        const FONT        = 1 << 5;
        const MEDIA       = 1 << 6;
        const OBJECT      = 1 << 7;
        const XHR         = 1 << 8;
        const PING        = 1 << 9;
        const WEBSOCKET   = 1 << 10;
        const OTHER       = 1 << 11;
    }
}

impl ContentTypeMask {
    /// What a rule without an explicit type modifier applies to: every
    /// subresource type. Blocking the document itself takes `$document`.
    pub fn implicit() -> ContentTypeMask {
        ContentTypeMask::all() - ContentTypeMask::DOCUMENT
    }
}

/// Pre-computed facts about a request, shared by every modifier that
/// evaluates against it.
#[derive(Clone, Debug)]
pub struct RequestContext {
    canonical: String,
    host: String,
    after_host_idx: usize,
    pub request_type: ContentTypeMask,
    pub method: http::Method,
    pub source_host: Option<String>,
    pub is_third_party: Option<bool>,
}

impl RequestContext {
    /// Hosts are expected to hand the engine requests with absolute URIs
    /// (the proxy form). Returns `None` when no usable URL can be derived.
    pub fn from_request<B>(req: &http::Request<B>) -> Option<RequestContext> {
        let uri = req.uri();
        let url = if uri.scheme().is_some() && uri.host().is_some() {
            Url::parse(&uri.to_string()).ok()?
        } else {
            let host = req
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())?;
            let path = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            Url::parse(&format!("https://{}{}", host, path)).ok()?
        };

        let host = url.host_str()?.to_ascii_lowercase();
        let mut canonical = format!("{}://{}{}", url.scheme(), host, url.path());
        if let Some(query) = url.query() {
            canonical.push('?');
            canonical.push_str(query);
        }
        let after_host_idx = url.scheme().len() + "://".len() + host.len();

        let source_host = req
            .headers()
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .and_then(|r| Url::parse(r).ok())
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));
        let is_third_party = source_host
            .as_deref()
            .map(|src| base_domain(src) != base_domain(&host));

        Some(RequestContext {
            request_type: infer_request_type(req, url.path()),
            method: req.method().clone(),
            canonical,
            host,
            after_host_idx,
            source_host,
            is_third_party,
        })
    }

    pub fn url(&self) -> &str {
        &self.canonical
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn address(&self) -> QueryAddress<'_> {
        QueryAddress {
            url: &self.canonical,
            host: &self.host,
            after_host: &self.canonical[self.after_host_idx..],
        }
    }

    /// The host a `$domain=` restriction evaluates against: the referring
    /// page's host when known, otherwise the request host itself.
    pub fn effective_source_host(&self) -> &str {
        self.source_host.as_deref().unwrap_or(&self.host)
    }
}

/// Registrable-domain approximation used for third-party checks: the last
/// two labels of the host. IDN and public-suffix normalisation are the
/// host layer's job.
pub fn base_domain(host: &str) -> &str {
    let mut dots = host.rmatch_indices('.');
    match (dots.next(), dots.next()) {
        (Some(_), Some((idx, _))) => &host[idx + 1..],
        _ => host,
    }
}

fn infer_request_type<B>(req: &http::Request<B>, path: &str) -> ContentTypeMask {
    if let Some(dest) = req
        .headers()
        .get("sec-fetch-dest")
        .and_then(|v| v.to_str().ok())
    {
        return match dest {
            "document" => ContentTypeMask::DOCUMENT,
            "iframe" | "frame" | "embed" => ContentTypeMask::SUBDOCUMENT,
            "script" | "worker" | "sharedworker" | "serviceworker" => ContentTypeMask::SCRIPT,
            "style" => ContentTypeMask::STYLESHEET,
            "image" => ContentTypeMask::IMAGE,
            "font" => ContentTypeMask::FONT,
            "audio" | "video" | "track" => ContentTypeMask::MEDIA,
            "object" => ContentTypeMask::OBJECT,
            "empty" => ContentTypeMask::XHR,
            "websocket" => ContentTypeMask::WEBSOCKET,
            _ => ContentTypeMask::OTHER,
        };
    }

    if req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
    {
        return ContentTypeMask::WEBSOCKET;
    }

    if let Some(accept) = req
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
    {
        if accept.starts_with("text/html") {
            return ContentTypeMask::DOCUMENT;
        }
        if accept.starts_with("text/css") {
            return ContentTypeMask::STYLESHEET;
        }
        if accept.starts_with("image/") {
            return ContentTypeMask::IMAGE;
        }
    }

    match path.rsplit('.').next().unwrap_or("") {
        "js" | "mjs" => ContentTypeMask::SCRIPT,
        "css" => ContentTypeMask::STYLESHEET,
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" | "avif" => ContentTypeMask::IMAGE,
        "woff" | "woff2" | "ttf" | "otf" | "eot" => ContentTypeMask::FONT,
        "mp4" | "webm" | "m4s" | "mp3" | "ogg" | "aac" | "m3u8" => ContentTypeMask::MEDIA,
        "json" => ContentTypeMask::XHR,
        "html" | "htm" => ContentTypeMask::DOCUMENT,
        _ => ContentTypeMask::OTHER,
    }
}
