//! Content-Security-Policy patching for injected inline elements.
//!
//! Injected `<script>`/`<style>` tags must survive the page's CSP. Each
//! policy line gets a fresh nonce under its most specific governing
//! directive, unless that directive already allows all inline content per
//! the CSP3 `allow-all-inline` algorithm or already carries a nonce.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use rand::rngs::OsRng;
use rand::RngCore;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InlineKind {
    Script,
    Style,
}

/// Patches enforced and report-only CSP headers so an inline element
/// carrying the returned nonce can run. Returns the empty string when no
/// patch was needed: no CSP present, or every relevant policy already
/// allows the element.
pub fn patch_headers(headers: &mut HeaderMap, kind: InlineKind) -> String {
    let enforced_name = http::header::CONTENT_SECURITY_POLICY;
    let report_name = HeaderName::from_static("content-security-policy-report-only");

    if headers.get_all(&enforced_name).iter().next().is_none()
        && headers.get_all(&report_name).iter().next().is_none()
    {
        return String::new();
    }

    let nonce = new_nonce();
    let enforced = patch_one_header(headers, &enforced_name, &nonce, kind);
    let report_only = patch_one_header(headers, &report_name, &nonce, kind);

    if !enforced && !report_only {
        return String::new();
    }
    nonce
}

fn patch_one_header(
    headers: &mut HeaderMap,
    key: &HeaderName,
    nonce: &str,
    kind: InlineKind,
) -> bool {
    let mut lines: Vec<String> = Vec::new();
    for value in headers.get_all(key) {
        match value.to_str() {
            Ok(line) => lines.push(line.to_string()),
            // An unreadable policy is left alone rather than rewritten.
            Err(_) => return false,
        }
    }
    if lines.is_empty() {
        return false;
    }

    let nonce_token = format!("'nonce-{}'", nonce);
    let mut changed = false;

    // Browsers enforce every policy line independently, so each one must
    // allow the inline tag.
    for line in &mut lines {
        let mut raw_dirs: Vec<String> = line.split(';').map(String::from).collect();

        // Most specific directive governing this kind on this line.
        let mut best: Option<(usize, String, i32, String)> = None;
        for (i, raw) in raw_dirs.iter().enumerate() {
            let dir = raw.trim();
            if dir.is_empty() {
                continue;
            }
            let (name, value) = cut_directive(dir);
            let priority = directive_priority(kind, &name);
            if priority > best.as_ref().map(|b| b.2).unwrap_or(0) {
                best = Some((i, name, priority, value));
            }
        }
        let Some((index, name, _, value)) = best else {
            continue;
        };

        if allows_inline(kind, &value) || has_nonce_source(&value) {
            continue;
        }

        let new_value = if value == "'none'" {
            nonce_token.clone()
        } else {
            format!("{} {}", value, nonce_token)
        };
        raw_dirs[index] = format!("{} {}", name, new_value);
        *line = raw_dirs.join(";");
        changed = true;
    }

    if changed {
        headers.remove(key);
        for line in &lines {
            let trimmed = line.trim_matches(|c| c == ' ' || c == ';');
            if let Ok(value) = HeaderValue::from_str(trimmed) {
                headers.append(key, value);
            }
        }
    }

    changed
}

/// Splits `name value...` into a lowercased name and trimmed value.
fn cut_directive(dir: &str) -> (String, String) {
    match dir.split_once(' ') {
        Some((name, rest)) => (name.to_ascii_lowercase(), rest.trim().to_string()),
        None => (dir.to_ascii_lowercase(), String::new()),
    }
}

/// CSP3 requires at least 128 random bits from a cryptographically secure
/// source; 144 bits keeps the base64 form padding-free.
fn new_nonce() -> String {
    let mut bytes = [0u8; 18];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// CSP3 "does a source list allow all inline behavior": true iff
/// `'unsafe-inline'` is present with no nonce or hash source and, for
/// scripts, no `'strict-dynamic'`.
fn allows_inline(kind: InlineKind, source_list: &str) -> bool {
    let source_list = source_list.trim();
    if source_list.is_empty() {
        return false;
    }

    let mut unsafe_inline = false;
    for token in source_list.split_whitespace() {
        match token {
            "'unsafe-inline'" => unsafe_inline = true,
            "'strict-dynamic'" => {
                if kind == InlineKind::Script {
                    return false;
                }
            }
            _ => {
                if is_nonce_or_hash_source(token) {
                    return false;
                }
            }
        }
    }
    unsafe_inline
}

fn has_nonce_source(source_list: &str) -> bool {
    source_list
        .split_whitespace()
        .any(|t| t.len() > 2 && t.starts_with("'nonce-") && t.ends_with('\''))
}

fn is_nonce_or_hash_source(token: &str) -> bool {
    if token.len() < 3 || !token.starts_with('\'') || !token.ends_with('\'') {
        return false;
    }
    let inner = &token[1..token.len() - 1];
    inner.starts_with("nonce-")
        || inner.starts_with("sha256-")
        || inner.starts_with("sha384-")
        || inner.starts_with("sha512-")
}

fn directive_priority(kind: InlineKind, name: &str) -> i32 {
    match kind {
        InlineKind::Script => match name {
            "script-src-elem" => 3,
            "script-src" => 2,
            "default-src" => 1,
            _ => 0,
        },
        InlineKind::Style => match name {
            "style-src-elem" => 3,
            "style-src" => 2,
            "default-src" => 1,
            _ => 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSP: &str = "content-security-policy";

    fn headers_with(lines: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for line in lines {
            headers.append(
                http::header::CONTENT_SECURITY_POLICY,
                HeaderValue::from_str(line).unwrap(),
            );
        }
        headers
    }

    fn csp_values(headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(CSP)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn no_csp_no_patch() {
        let mut headers = HeaderMap::new();
        assert_eq!(patch_headers(&mut headers, InlineKind::Script), "");
        assert!(headers.is_empty());
    }

    #[test]
    fn replaces_none_in_most_specific_directive() {
        let mut headers = headers_with(&["script-src-elem 'none'"]);
        let nonce = patch_headers(&mut headers, InlineKind::Script);
        assert!(!nonce.is_empty());
        assert_eq!(
            csp_values(&headers),
            vec![format!("script-src-elem 'nonce-{}'", nonce)]
        );
    }

    #[test]
    fn nonce_lands_under_the_highest_priority_directive() {
        let cases = [
            (
                "default-src 'self'; script-src 'self'; script-src-elem 'self'",
                Some("script-src-elem"),
            ),
            ("object-src 'none'; script-src 'self'", Some("script-src")),
            ("default-src 'self'", Some("default-src")),
            ("img-src *; object-src 'none'", None),
        ];

        for (line, want_directive) in cases {
            let mut headers = headers_with(&[line]);
            let nonce = patch_headers(&mut headers, InlineKind::Script);

            match want_directive {
                None => {
                    assert_eq!(nonce, "", "line {:?}", line);
                    assert_eq!(csp_values(&headers), vec![line.to_string()]);
                }
                Some(directive) => {
                    assert!(!nonce.is_empty(), "line {:?}", line);
                    let out = csp_values(&headers).join(", ");
                    let expected = format!("{} 'nonce-{}'", directive, nonce);
                    assert!(
                        out.contains(&expected),
                        "line {:?}: nonce not under {}: {}",
                        line,
                        directive,
                        out
                    );
                }
            }
        }
    }

    #[test]
    fn style_kind_uses_style_directives() {
        let mut headers = headers_with(&["style-src 'self'; script-src 'none'"]);
        let nonce = patch_headers(&mut headers, InlineKind::Style);
        assert!(!nonce.is_empty());
        let out = csp_values(&headers).join(",");
        assert!(out.contains(&format!("style-src 'self' 'nonce-{}'", nonce)));
        assert!(out.contains("script-src 'none'"));
    }

    #[test]
    fn unsafe_inline_without_nonce_needs_no_patch() {
        let mut headers = headers_with(&["script-src 'self' 'unsafe-inline'"]);
        assert_eq!(patch_headers(&mut headers, InlineKind::Script), "");
        assert_eq!(csp_values(&headers), vec!["script-src 'self' 'unsafe-inline'"]);
    }

    #[test]
    fn unsafe_inline_is_void_under_strict_dynamic() {
        let mut headers =
            headers_with(&["script-src 'unsafe-inline' 'strict-dynamic' https:"]);
        let nonce = patch_headers(&mut headers, InlineKind::Script);
        assert!(!nonce.is_empty());
    }

    #[test]
    fn patch_is_idempotent() {
        let mut headers = headers_with(&["script-src 'self'"]);
        let first = patch_headers(&mut headers, InlineKind::Script);
        assert!(!first.is_empty());
        let before = csp_values(&headers);

        let second = patch_headers(&mut headers, InlineKind::Script);
        assert_eq!(second, "");
        assert_eq!(csp_values(&headers), before);
    }

    #[test]
    fn nonce_is_at_least_128_bits() {
        let mut headers = headers_with(&["script-src 'self'"]);
        let nonce = patch_headers(&mut headers, InlineKind::Script);
        assert_eq!(
            csp_values(&headers),
            vec![format!("script-src 'self' 'nonce-{}'", nonce)]
        );
        let decoded = BASE64.decode(nonce.as_bytes()).unwrap();
        assert!(decoded.len() >= 18);
    }

    #[test]
    fn report_only_header_shares_the_nonce() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("script-src 'self'"),
        );
        headers.insert(
            HeaderName::from_static("content-security-policy-report-only"),
            HeaderValue::from_static("script-src 'self'"),
        );

        let nonce = patch_headers(&mut headers, InlineKind::Script);
        let token = format!("'nonce-{}'", nonce);
        assert!(headers[CSP].to_str().unwrap().contains(&token));
        assert!(headers["content-security-policy-report-only"]
            .to_str()
            .unwrap()
            .contains(&token));
    }

    #[test]
    fn multiple_policy_lines_are_patched_independently() {
        let mut headers = headers_with(&["script-src 'self'", "default-src 'none'"]);
        let nonce = patch_headers(&mut headers, InlineKind::Script);
        let token = format!("'nonce-{}'", nonce);
        let values = csp_values(&headers);
        assert_eq!(values.len(), 2);
        assert!(values.iter().all(|v| v.contains(&token)));
    }
}
