//! Byte-level HTML splicing.
//!
//! Injection and inline-script rewriting operate directly on the response
//! bytes so that everything outside the touched spans survives unchanged,
//! whatever state the markup is in. Tag name matching is ASCII
//! case-insensitive.

use memchr::memchr;

use crate::rewrite::{self, Body};

fn tag_at(html: &[u8], pos: usize, name: &[u8]) -> bool {
    if pos + 1 + name.len() > html.len() || html[pos] != b'<' {
        return false;
    }
    let candidate = &html[pos + 1..pos + 1 + name.len()];
    if !candidate.eq_ignore_ascii_case(name) {
        return false;
    }
    // The name must end here: `<head>` or `<head lang=..>`, not `<header>`.
    match html.get(pos + 1 + name.len()) {
        Some(&c) => c == b'>' || c == b'/' || c.is_ascii_whitespace(),
        None => false,
    }
}

fn tag_end(html: &[u8], open: usize) -> Option<usize> {
    memchr(b'>', &html[open..]).map(|i| open + i + 1)
}

/// Where to splice an injected element: right after the `<head>` open tag,
/// or before the first element when there is no `<head>`.
pub fn injection_offset(html: &[u8]) -> usize {
    let mut pos = 0;
    let mut first_element: Option<usize> = None;

    while let Some(rel) = memchr(b'<', &html[pos..]) {
        let at = pos + rel;
        if tag_at(html, at, b"head") {
            if let Some(end) = tag_end(html, at) {
                return end;
            }
        }
        if first_element.is_none() {
            if let Some(&next) = html.get(at + 1) {
                if next.is_ascii_alphabetic() {
                    first_element = Some(at);
                }
            }
        }
        pos = at + 1;
    }

    first_element.unwrap_or(0)
}

/// Inserts `element` into `html` at [`injection_offset`].
pub fn splice_element(html: &[u8], element: &[u8]) -> Vec<u8> {
    let at = injection_offset(html);
    let mut out = Vec::with_capacity(html.len() + element.len());
    out.extend_from_slice(&html[..at]);
    out.extend_from_slice(element);
    out.extend_from_slice(&html[at..]);
    out
}

/// Applies `transform` to the text content of every `<script>` element,
/// leaving all other bytes untouched.
pub fn rewrite_inline_scripts<F>(html: &[u8], mut transform: F) -> Vec<u8>
where
    F: FnMut(&[u8]) -> Vec<u8>,
{
    let mut out = Vec::with_capacity(html.len());
    let mut pos = 0;

    while let Some(rel) = memchr(b'<', &html[pos..]) {
        let at = pos + rel;
        if !tag_at(html, at, b"script") {
            out.extend_from_slice(&html[pos..at + 1]);
            pos = at + 1;
            continue;
        }
        let Some(text_start) = tag_end(html, at) else {
            break;
        };
        let text_end = find_closing_script(html, text_start).unwrap_or(html.len());

        out.extend_from_slice(&html[pos..text_start]);
        out.extend_from_slice(&transform(&html[text_start..text_end]));
        pos = text_end;
    }

    out.extend_from_slice(&html[pos..]);
    out
}

/// How much of the document to hold back while looking for `<head>`.
const INJECT_SCAN_LIMIT: usize = 128 * 1024;

fn ready_to_inject(buffer: &[u8]) -> bool {
    if buffer.len() > INJECT_SCAN_LIMIT {
        return true;
    }
    let mut pos = 0;
    while let Some(rel) = memchr(b'<', &buffer[pos..]) {
        let at = pos + rel;
        if tag_at(buffer, at, b"head") && tag_end(buffer, at).is_some() {
            return true;
        }
        // A <body> tag means no <head> is coming.
        if tag_at(buffer, at, b"body") {
            return true;
        }
        pos = at + 1;
    }
    false
}

/// Streams the response body through, splicing `element` at the injection
/// point. The prefix is buffered only until the insertion point is known.
pub fn inject_element(res: &mut http::Response<Body>, element: Vec<u8>) {
    rewrite::stream_rewrite(res, move |mut original, writer| async move {
        let mut buffer: Vec<u8> = Vec::new();
        let mut injected = false;

        while let Some(chunk) = rewrite::next_chunk(&mut original).await {
            match chunk {
                Ok(data) => {
                    if injected {
                        if writer.write(data).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    buffer.extend_from_slice(&data);
                    if ready_to_inject(&buffer) {
                        let spliced = splice_element(&buffer, &element);
                        if writer.write(spliced).await.is_err() {
                            return;
                        }
                        buffer = Vec::new();
                        injected = true;
                    }
                }
                Err(err) => {
                    writer.close_with_error(err).await;
                    return;
                }
            }
        }

        if !injected {
            let spliced = splice_element(&buffer, &element);
            let _ = writer.write(spliced).await;
        }
    });
}

fn find_closing_script(html: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(rel) = memchr(b'<', &html[pos..]) {
        let at = pos + rel;
        if html.len() >= at + 2 && html[at + 1] == b'/' && html[at + 2..].len() >= 6 {
            if html[at + 2..at + 8].eq_ignore_ascii_case(b"script") {
                return Some(at);
            }
        }
        pos = at + 1;
    }
    None
}
