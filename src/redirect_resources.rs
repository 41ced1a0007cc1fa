//! Bundled surrogate resources for the `redirect=` modifier.
//!
//! A matching rule swaps the request target for one of these data URLs so
//! the page receives an inert stand-in instead of the blocked asset.

/// Transparent 1x1 GIF.
const ONE_PIXEL_GIF: &str =
    "data:image/gif;base64,R0lGODlhAQABAIAAAP///wAAACH5BAEAAAAALAAAAAABAAEAAAICRAEAOw==";

/// Empty JavaScript module.
const NOOP_JS: &str = "data:application/javascript;base64,KCgpPT57fSkoKTs=";

/// Empty plain-text document.
const NOOP_TEXT: &str = "data:text/plain;base64,";

/// Empty MP3-ish audio payload.
const NOOP_MP3: &str = "data:audio/mpeg;base64,/+MYxAAAAANIAAAAAExBTUUzLjk4LjIAAAAAAAAAAAAAAAA=";

/// Empty MP4 container.
const NOOP_MP4: &str = "data:video/mp4;base64,AAAAHGZ0eXBpc29tAAACAGlzb21pc28ybXA0MQAAAAhmcmVl";

/// Minimal empty HTML document.
const NOOP_HTML: &str = "data:text/html;base64,PCFkb2N0eXBlIGh0bWw+";

/// Resolves a `redirect=`/`redirect-rule=` resource name to its surrogate
/// URL. Unknown names fall back to the empty script: failing open with an
/// inert asset beats failing the redirect.
pub fn resource_url(name: &str) -> &'static str {
    match name {
        "1x1-transparent.gif" | "1x1.gif" | "1x1-transparent-gif" => ONE_PIXEL_GIF,
        "noopjs" | "noop.js" | "blank-js" => NOOP_JS,
        "nooptext" | "noop.txt" | "blank-text" => NOOP_TEXT,
        "noopmp3-0.1s" | "noop-0.1s.mp3" | "blank-mp3" => NOOP_MP3,
        "noopmp4-1s" | "noop-1s.mp4" | "blank-mp4" => NOOP_MP4,
        "noopframe" | "noop.html" | "blank-html" => NOOP_HTML,
        _ => NOOP_JS,
    }
}
