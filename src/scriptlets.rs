//! Scriptlet rules and injection.
//!
//! Accepts both the canonical form (`hosts#%#//scriptlet(args)`, exception
//! `#@%#`) and the uBlock form (`hosts##+js(args)`, exception `#@#+js`).
//! uBlock argument lists are canonicalised to double-quoted form, then
//! every argument is validated as a well-formed JS string literal. On HTML
//! responses the applicable invocations are spliced into `<head>` inside a
//! nonced inline `<script>`.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use thiserror::Error;

use crate::csp::{self, InlineKind};
use crate::hostindex::{HostnameIndex, HostnamePatterns};
use crate::html;
use crate::rewrite::{self, Body, RewriteError};

/// Matches both scriptlet rule markers; used by the line classifier.
static RULE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:#@?%#//scriptlet)|(?:#@?#\+js)").unwrap());

static CANONICAL_PRIMARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*)#%#//scriptlet\((.+)\)$").unwrap());
static CANONICAL_EXCEPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*)#@%#//scriptlet\((.+)\)$").unwrap());
static UBO_PRIMARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*)##\+js\((.+)\)$").unwrap());
static UBO_EXCEPTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*)#@#\+js\((.+)\)$").unwrap());

pub fn is_scriptlet_rule(line: &str) -> bool {
    RULE_MARKER.is_match(line)
}

#[derive(Debug, Error, PartialEq)]
pub enum ScriptletError {
    #[error("unsupported syntax")]
    UnsupportedSyntax,
    #[error("argument {0:?} is not a valid JS string")]
    InvalidArgument(String),
    #[error("trusted scriptlet in an untrusted filter list")]
    Untrusted,
}

/// Splits an argument list on commas, respecting commas inside quoted
/// strings and backslash-escaped commas.
fn arg_split(input: &str) -> Vec<String> {
    if input.is_empty() {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut buf = String::new();
    let (mut in_single, mut in_double, mut escaped) = (false, false, false);

    for c in input.chars() {
        if escaped {
            buf.push('\\');
            buf.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '\'' => {
                if !in_double {
                    in_single = !in_single;
                }
                buf.push(c);
            }
            '"' => {
                if !in_single {
                    in_double = !in_double;
                }
                buf.push(c);
            }
            ',' => {
                if in_single || in_double {
                    buf.push(c);
                } else {
                    result.push(buf.trim().to_string());
                    buf.clear();
                }
            }
            _ => buf.push(c),
        }
    }
    if escaped {
        buf.push('\\');
    }
    result.push(buf.trim().to_string());

    result
}

/// The argument list of one scriptlet invocation, excluding the call
/// expression around it.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ArgList(String);

impl ArgList {
    /// uBlock scriptlets take unquoted arguments; wrap each in double
    /// quotes so both grammars normalise the same way.
    fn convert_ubo_to_canonical(&self) -> ArgList {
        let args: Vec<String> = arg_split(&self.0)
            .into_iter()
            .map(|arg| {
                if is_double_quoted(&arg) {
                    arg
                } else {
                    format!("\"{}\"", arg.trim())
                }
            })
            .collect();
        ArgList(args.join(","))
    }

    fn normalize(&self) -> Result<ArgList, ScriptletError> {
        let mut normalized = String::new();
        let args = arg_split(&self.0);
        for (i, arg) in args.iter().enumerate() {
            let arg = arg.trim();
            if !is_valid_js_string(arg) {
                return Err(ScriptletError::InvalidArgument(arg.to_string()));
            }
            normalized.push_str(arg);
            if i < args.len() - 1 {
                normalized.push(',');
            }
        }
        ArgList(normalized).validated()
    }

    fn validated(self) -> Result<ArgList, ScriptletError> {
        if self.0.is_empty() {
            Err(ScriptletError::UnsupportedSyntax)
        } else {
            Ok(self)
        }
    }

    /// `trusted-*` scriptlets may only come from trusted lists. Only
    /// meaningful after [`ArgList::normalize`].
    fn is_trusted(&self) -> bool {
        let args = arg_split(&self.0);
        match args.first() {
            Some(first) if first.len() >= 2 => first[1..first.len() - 1].starts_with("trusted-"),
            _ => false,
        }
    }

    fn push_injection(&self, out: &mut String) {
        let _ = write!(
            out,
            "try{{scriptlet({})}}catch(ex){{console.error(ex);}}",
            self.0
        );
    }
}

fn is_double_quoted(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('"') && s.ends_with('"')
}

/// A well-formed single- or double-quoted JS string literal: proper
/// escapes, no unescaped matching quote, no dangling backslash.
fn is_valid_js_string(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    let quote = bytes[0];
    if quote != b'"' && quote != b'\'' {
        return false;
    }
    if bytes[bytes.len() - 1] != quote {
        return false;
    }

    let mut escaped = false;
    for &c in &bytes[1..bytes.len() - 1] {
        if escaped {
            escaped = false;
        } else if c == b'\\' {
            escaped = true;
        } else if c == quote {
            return false;
        }
    }
    !escaped
}

#[derive(Default)]
struct ScriptletStore {
    primary: HostnameIndex<ArgList>,
    exceptions: HostnameIndex<ArgList>,
}

/// Parses scriptlet rules and splices their invocations into HTML
/// responses.
#[derive(Default)]
pub struct ScriptletInjector {
    store: RwLock<ScriptletStore>,
}

impl ScriptletInjector {
    pub fn new() -> ScriptletInjector {
        ScriptletInjector::default()
    }

    pub fn add_rule(&self, rule: &str, filter_list_trusted: bool) -> Result<(), ScriptletError> {
        let (hosts, args, is_exception, is_ubo) =
            if let Some(captures) = CANONICAL_PRIMARY.captures(rule) {
                (captures.get(1), captures.get(2), false, false)
            } else if let Some(captures) = CANONICAL_EXCEPTION.captures(rule) {
                (captures.get(1), captures.get(2), true, false)
            } else if let Some(captures) = UBO_PRIMARY.captures(rule) {
                (captures.get(1), captures.get(2), false, true)
            } else if let Some(captures) = UBO_EXCEPTION.captures(rule) {
                (captures.get(1), captures.get(2), true, true)
            } else {
                return Err(ScriptletError::UnsupportedSyntax);
            };

        let hosts = hosts.map(|m| m.as_str()).unwrap_or("");
        let mut args = ArgList(args.map(|m| m.as_str()).unwrap_or("").to_string());
        if is_ubo {
            args = args.convert_ubo_to_canonical();
        }
        let args = args.normalize()?;

        if !filter_list_trusted && args.is_trusted() {
            return Err(ScriptletError::Untrusted);
        }

        let patterns = HostnamePatterns::parse(hosts);
        let mut store = self.store.write();
        if is_exception {
            store.exceptions.insert(patterns, args);
        } else {
            store.primary.insert(patterns, args);
        }
        Ok(())
    }

    /// Splices the scriptlet invocations applicable to `host` into the
    /// HTML response. Returns false when no scriptlet applies.
    pub async fn inject(
        &self,
        host: &str,
        res: &mut http::Response<Body>,
    ) -> Result<bool, RewriteError> {
        let invocations: Vec<ArgList> = {
            let store = self.store.read();
            let exceptions: Vec<&ArgList> = store.exceptions.matching(host);
            store
                .primary
                .matching(host)
                .into_iter()
                .filter(|args| !exceptions.iter().any(|ex| *ex == *args))
                .cloned()
                .collect()
        };
        if invocations.is_empty() {
            return Ok(false);
        }

        let mut body = String::new();
        for args in &invocations {
            args.push_injection(&mut body);
        }

        let nonce = csp::patch_headers(res.headers_mut(), InlineKind::Script);
        rewrite::decode_in_place(res).await?;

        let element = if nonce.is_empty() {
            format!("<script>{}</script>", body)
        } else {
            format!("<script nonce=\"{}\">{}</script>", nonce, body)
        };
        html::inject_element(res, element.into_bytes());
        Ok(true)
    }

    pub fn compact(&self) {
        let mut store = self.store.write();
        store.primary.shrink();
        store.exceptions.shrink();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::full_body;
    use http_body_util::BodyExt;

    #[test]
    fn arg_split_table() {
        let cases: &[(&str, &[&str])] = &[
            ("", &[]),
            ("a,b,c", &["a", "b", "c"]),
            (" a ,  b  , c ", &["a", "b", "c"]),
            (r#""a, b",c"#, &[r#""a, b""#, "c"]),
            (r#"'a, b', c"#, &["'a, b'", "c"]),
            (r"a\,b,c", &[r"a\,b", "c"]),
            (r"a\\,b", &[r"a\\", "b"]),
            (r#""\"hi\"",x"#, &[r#""\"hi\"""#, "x"]),
            (r#"'it\'s fine',y"#, &[r#"'it\'s fine'"#, "y"]),
            ("a,", &["a", ""]),
            (r#"" spaced " , unquoted"#, &[r#"" spaced ""#, "unquoted"]),
        ];
        for (input, expected) in cases {
            assert_eq!(&arg_split(input), expected, "input {:?}", input);
        }
    }

    #[test]
    fn js_string_validation() {
        assert!(is_valid_js_string(r#""abc""#));
        assert!(is_valid_js_string(r#"'abc'"#));
        assert!(is_valid_js_string(r#""a\"b""#));
        assert!(is_valid_js_string(r#"''"#));
        assert!(!is_valid_js_string(r#""a"b""#));
        assert!(!is_valid_js_string(r#""abc"#));
        assert!(!is_valid_js_string(r#""abc\""#));
        assert!(!is_valid_js_string("abc"));
    }

    #[test]
    fn ubo_arguments_are_canonicalised() {
        let injector = ScriptletInjector::new();
        injector
            .add_rule("example.com##+js(set-cookie, consent, true)", false)
            .unwrap();

        let store = injector.store.read();
        let args = store.primary.matching("example.com");
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].0, r#""set-cookie","consent","true""#);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let injector = ScriptletInjector::new();
        let err = injector
            .add_rule(r#"example.com#%#//scriptlet("a"b", "c")"#, false)
            .unwrap_err();
        assert!(matches!(err, ScriptletError::InvalidArgument(_)));

        let err = injector.add_rule("example.com##banner", false).unwrap_err();
        assert_eq!(err, ScriptletError::UnsupportedSyntax);
    }

    #[test]
    fn trusted_scriptlets_need_trusted_lists() {
        let injector = ScriptletInjector::new();
        let rule = r#"example.com#%#//scriptlet("trusted-set-cookie", "consent", "true")"#;
        assert_eq!(
            injector.add_rule(rule, false).unwrap_err(),
            ScriptletError::Untrusted
        );
        injector.add_rule(rule, true).unwrap();
    }

    #[tokio::test]
    async fn injects_nonced_script_under_csp() {
        let injector = ScriptletInjector::new();
        injector
            .add_rule(
                r#"example.com#%#//scriptlet("set-cookie", "consent", "true")"#,
                false,
            )
            .unwrap();

        let mut res = http::Response::builder()
            .header("content-type", "text/html")
            .header("content-security-policy", "default-src 'none'")
            .body(full_body(
                "<html><head><title>t</title></head><body></body></html>",
            ))
            .unwrap();

        assert!(injector.inject("example.com", &mut res).await.unwrap());

        let csp_value = res.headers()["content-security-policy"]
            .to_str()
            .unwrap()
            .to_string();
        let nonce = csp_value
            .split("'nonce-")
            .nth(1)
            .and_then(|rest| rest.split('\'').next())
            .expect("nonce in CSP header")
            .to_string();

        let body = std::mem::replace(res.body_mut(), crate::rewrite::empty_body());
        let html = String::from_utf8(body.collect().await.unwrap().to_bytes().to_vec()).unwrap();
        let expected = format!(
            "<script nonce=\"{}\">try{{scriptlet(\"set-cookie\",\"consent\",\"true\")}}catch(ex){{console.error(ex);}}</script>",
            nonce
        );
        assert!(html.contains(&expected), "html: {}", html);
        assert!(html.find("<head>").unwrap() < html.find("<script").unwrap());
    }

    #[tokio::test]
    async fn exception_subtracts_matching_invocation() {
        let injector = ScriptletInjector::new();
        injector
            .add_rule(r#"example.com#%#//scriptlet("noeval")"#, false)
            .unwrap();
        injector
            .add_rule(r#"example.com#@%#//scriptlet("noeval")"#, false)
            .unwrap();

        let mut res = http::Response::builder()
            .header("content-type", "text/html")
            .body(full_body("<html><head></head></html>"))
            .unwrap();
        assert!(!injector.inject("example.com", &mut res).await.unwrap());
    }
}
