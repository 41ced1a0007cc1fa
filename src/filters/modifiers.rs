//! The `$`-suffix modifier language.
//!
//! Modifiers come in two groups: matching modifiers narrow when a rule
//! applies (`domain=`, `third-party`, content types, ...), mutating
//! modifiers change the request or response (`removeheader=`, `replace=`,
//! `scramblejs=`, ...). Exceptions cancel primaries per modifier kind:
//! two modifiers cancel when they are the same kind with equivalent
//! parameterisation.

use http::header::{self, HeaderName, HeaderValue};
use memchr::memmem;
use rand::Rng;
use regex::bytes::Regex as BytesRegex;
use thiserror::Error;
use url::Url;

use crate::html;
use crate::redirect_resources;
use crate::request::{ContentTypeMask, RequestContext};
use crate::rewrite::{self, Body, RewriteError};

#[derive(Debug, Error, PartialEq)]
pub enum ModifierParseError {
    #[error("unrecognised option {0:?}")]
    UnrecognisedOption(String),
    #[error("negation not supported for {0:?}")]
    UnsupportedNegation(String),
    #[error("empty value for {0:?}")]
    EmptyValue(String),
    #[error("invalid value for {option:?}: {reason}")]
    InvalidValue { option: String, reason: String },
}

fn invalid(option: &str, reason: impl Into<String>) -> ModifierParseError {
    ModifierParseError::InvalidValue {
        option: option.to_string(),
        reason: reason.into(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DomainList {
    entries: Vec<DomainEntry>,
}

#[derive(Clone, Debug, PartialEq)]
struct DomainEntry {
    host: String,
    negated: bool,
}

impl DomainList {
    fn parse(
        option: &str,
        value: &str,
        allow_negation: bool,
    ) -> Result<DomainList, ModifierParseError> {
        if value.is_empty() {
            return Err(ModifierParseError::EmptyValue(option.to_string()));
        }
        let mut entries = Vec::new();
        for raw in value.split('|') {
            let negated = raw.starts_with('~');
            let host = raw.trim_start_matches('~');
            if host.is_empty() {
                return Err(invalid(option, "empty domain entry"));
            }
            if negated && !allow_negation {
                return Err(ModifierParseError::UnsupportedNegation(option.to_string()));
            }
            if host.contains('*') {
                return Err(invalid(
                    option,
                    format!("wildcard domain {:?} is not supported", host),
                ));
            }
            entries.push(DomainEntry {
                host: host.to_ascii_lowercase(),
                negated,
            });
        }
        Ok(DomainList { entries })
    }

    /// Exact or subdomain match, with negated entries vetoing.
    fn matches(&self, host: &str) -> bool {
        let mut any_positive = false;
        let mut positive_hit = false;
        for entry in &self.entries {
            let hit = host == entry.host
                || (host.len() > entry.host.len()
                    && host.ends_with(entry.host.as_str())
                    && host.as_bytes()[host.len() - entry.host.len() - 1] == b'.');
            if entry.negated {
                if hit {
                    return false;
                }
            } else {
                any_positive = true;
                positive_hit |= hit;
            }
        }
        !any_positive || positive_hit
    }
}

/// Which query parameters `removeparam` strips.
#[derive(Clone, Debug)]
pub enum ParamMatcher {
    All,
    Exact(String),
    Pattern { re: BytesRegex, inverted: bool },
}

impl ParamMatcher {
    fn parse(value: &str) -> Result<ParamMatcher, ModifierParseError> {
        if value.is_empty() {
            return Ok(ParamMatcher::All);
        }
        let (inverted, value) = match value.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, value),
        };
        if let Some(body) = value.strip_prefix('/').and_then(|v| v.strip_suffix('/')) {
            let re = BytesRegex::new(body).map_err(|e| invalid("removeparam", e.to_string()))?;
            return Ok(ParamMatcher::Pattern { re, inverted });
        }
        if inverted {
            // `~name` without a regex still means "everything but name".
            let literal = format!("^{}=", regex::escape(value));
            let re = BytesRegex::new(&literal).map_err(|e| invalid("removeparam", e.to_string()))?;
            return Ok(ParamMatcher::Pattern { re, inverted: true });
        }
        Ok(ParamMatcher::Exact(value.to_string()))
    }

    fn matches(&self, name: &str, value: &str) -> bool {
        match self {
            ParamMatcher::All => true,
            ParamMatcher::Exact(wanted) => name == wanted,
            ParamMatcher::Pattern { re, inverted } => {
                let pair = format!("{}={}", name, value);
                re.is_match(pair.as_bytes()) != *inverted
            }
        }
    }
}

/// Compiled `replace=/regex/replacement/flags` parameter.
#[derive(Clone, Debug)]
pub struct ReplaceSpec {
    raw: String,
    re: BytesRegex,
    replacement: Vec<u8>,
}

impl ReplaceSpec {
    fn parse(value: &str) -> Result<ReplaceSpec, ModifierParseError> {
        let rest = value
            .strip_prefix('/')
            .ok_or_else(|| invalid("replace", "missing leading '/'"))?;

        let mut segments: Vec<String> = vec![String::new()];
        let mut escaped = false;
        for c in rest.chars() {
            if escaped {
                match c {
                    // `\/` and `\,` are delimiters escaped for the option
                    // grammar, not part of the regex.
                    '/' => segments.last_mut().unwrap().push('/'),
                    ',' => segments.last_mut().unwrap().push(','),
                    other => {
                        let segment = segments.last_mut().unwrap();
                        segment.push('\\');
                        segment.push(other);
                    }
                }
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '/' {
                segments.push(String::new());
            } else {
                segments.last_mut().unwrap().push(c);
            }
        }
        if escaped {
            return Err(invalid("replace", "dangling backslash"));
        }
        if segments.len() != 3 {
            return Err(invalid("replace", "expected /regex/replacement/flags"));
        }
        let flags = segments.pop().unwrap();
        let replacement = segments.pop().unwrap();
        let pattern = segments.pop().unwrap();

        let mut prefix = String::new();
        for flag in flags.chars() {
            match flag {
                'i' => prefix.push_str("(?i)"),
                's' => prefix.push_str("(?s)"),
                'm' => prefix.push_str("(?m)"),
                'g' => {} // substitution is always global
                other => return Err(invalid("replace", format!("unknown flag {:?}", other))),
            }
        }

        let re = BytesRegex::new(&format!("{}{}", prefix, pattern))
            .map_err(|e| invalid("replace", e.to_string()))?;
        Ok(ReplaceSpec {
            raw: value.to_string(),
            re,
            replacement: replacement.into_bytes(),
        })
    }

    fn apply(&self, data: &[u8]) -> Vec<u8> {
        self.re.replace_all(data, &self.replacement[..]).into_owned()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeaderTarget {
    pub request: bool,
    pub name: String,
}

/// One parsed `$` option.
#[derive(Clone, Debug)]
pub enum RuleModifier {
    Domain(DomainList),
    DenyAllow(DomainList),
    ThirdParty { inverted: bool },
    Method { methods: Vec<String>, inverted: bool },
    ContentType(ContentTypeMask),
    Important,
    Popup,
    MatchCase,
    Redirect(String),
    RedirectRule(String),
    RemoveParam(ParamMatcher),
    RemoveHeader(HeaderTarget),
    Csp(String),
    Replace(ReplaceSpec),
    ScrambleJs(Vec<String>),
}

/// Parses a full `$option,option,...` list. Commas escaped as `\,` do not
/// split (they occur inside `replace=` values).
pub fn parse_modifier_list(input: &str) -> Result<Vec<RuleModifier>, ModifierParseError> {
    let mut modifiers = Vec::new();
    let mut cpt_positive = ContentTypeMask::empty();
    let mut cpt_negative = ContentTypeMask::all();
    let mut saw_positive = false;
    let mut saw_negative = false;

    for raw_option in split_options(input) {
        let raw_option = raw_option.trim();
        if raw_option.is_empty() {
            continue;
        }
        let negation = raw_option.starts_with('~');
        let body = raw_option.trim_start_matches('~');
        let (option, value) = match body.split_once('=') {
            Some((o, v)) => (o, v),
            None => (body, ""),
        };

        if let Some(mask) = content_type_mask(option) {
            if negation {
                cpt_negative -= mask;
                saw_negative = true;
            } else {
                cpt_positive |= mask;
                saw_positive = true;
            }
            continue;
        }

        let fail_negated = || ModifierParseError::UnsupportedNegation(option.to_string());

        let modifier = match (option, negation) {
            ("domain", false) => RuleModifier::Domain(DomainList::parse(option, value, true)?),
            ("denyallow", false) => {
                RuleModifier::DenyAllow(DomainList::parse(option, value, false)?)
            }
            ("third-party" | "3p", negated) => RuleModifier::ThirdParty { inverted: negated },
            ("first-party" | "1p", negated) => RuleModifier::ThirdParty { inverted: !negated },
            ("method", false) => {
                if value.is_empty() {
                    return Err(ModifierParseError::EmptyValue(option.to_string()));
                }
                let mut methods = Vec::new();
                let mut inverted_count = 0usize;
                let mut entries = 0usize;
                for m in value.split('|') {
                    entries += 1;
                    let inv = m.starts_with('~');
                    if inv {
                        inverted_count += 1;
                    }
                    methods.push(m.trim_start_matches('~').to_ascii_lowercase());
                }
                if inverted_count != 0 && inverted_count != entries {
                    return Err(invalid(option, "mixed negated and plain methods"));
                }
                RuleModifier::Method {
                    methods,
                    inverted: inverted_count != 0,
                }
            }
            ("important", false) => RuleModifier::Important,
            ("important", true) => return Err(fail_negated()),
            ("popup", false) => RuleModifier::Popup,
            ("match-case", false) => RuleModifier::MatchCase,
            ("redirect", false) => {
                if value.is_empty() {
                    return Err(ModifierParseError::EmptyValue(option.to_string()));
                }
                RuleModifier::Redirect(value.to_string())
            }
            ("redirect-rule", false) => {
                if value.is_empty() {
                    return Err(ModifierParseError::EmptyValue(option.to_string()));
                }
                RuleModifier::RedirectRule(value.to_string())
            }
            ("redirect" | "redirect-rule", true) => return Err(fail_negated()),
            ("removeparam" | "queryprune", false) => {
                RuleModifier::RemoveParam(ParamMatcher::parse(value)?)
            }
            ("removeheader", false) => {
                if value.is_empty() {
                    return Err(ModifierParseError::EmptyValue(option.to_string()));
                }
                let (request, name) = match value.strip_prefix("request:") {
                    Some(name) => (true, name),
                    None => (false, value),
                };
                if HeaderName::try_from(name).is_err() {
                    return Err(invalid(option, format!("bad header name {:?}", name)));
                }
                RuleModifier::RemoveHeader(HeaderTarget {
                    request,
                    name: name.to_ascii_lowercase(),
                })
            }
            ("csp", false) => RuleModifier::Csp(value.to_string()),
            ("replace", false) => {
                if value.is_empty() {
                    // Valueless `replace` only makes sense on exceptions,
                    // where it cancels every replace rule.
                    RuleModifier::Replace(ReplaceSpec {
                        raw: String::new(),
                        re: BytesRegex::new("$^").unwrap(),
                        replacement: Vec::new(),
                    })
                } else {
                    RuleModifier::Replace(ReplaceSpec::parse(value)?)
                }
            }
            ("scramblejs", false) => {
                let mut keys = Vec::new();
                for key in value.split('|') {
                    if key.is_empty() {
                        return Err(invalid(option, "empty keys are not allowed"));
                    }
                    keys.push(key.to_string());
                }
                if keys.is_empty() {
                    return Err(ModifierParseError::EmptyValue(option.to_string()));
                }
                RuleModifier::ScrambleJs(keys)
            }
            _ => return Err(ModifierParseError::UnrecognisedOption(option.to_string())),
        };
        modifiers.push(modifier);
    }

    if saw_positive || saw_negative {
        let mask = if saw_positive && saw_negative {
            cpt_positive & cpt_negative
        } else if saw_positive {
            cpt_positive
        } else {
            ContentTypeMask::implicit() & cpt_negative
        };
        modifiers.push(RuleModifier::ContentType(mask));
    }

    Ok(modifiers)
}

fn split_options(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let bytes = input.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b',' && (i == 0 || bytes[i - 1] != b'\\') {
            parts.push(&input[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    parts.push(&input[start..]);
    parts
}

fn content_type_mask(option: &str) -> Option<ContentTypeMask> {
    Some(match option {
        "document" | "doc" => ContentTypeMask::DOCUMENT,
        "subdocument" | "frame" => ContentTypeMask::SUBDOCUMENT,
        "script" => ContentTypeMask::SCRIPT,
        "stylesheet" | "css" => ContentTypeMask::STYLESHEET,
        "image" => ContentTypeMask::IMAGE,
        "font" => ContentTypeMask::FONT,
        "media" => ContentTypeMask::MEDIA,
        "object" | "object-subrequest" => ContentTypeMask::OBJECT,
        "xmlhttprequest" | "xhr" => ContentTypeMask::XHR,
        "ping" | "beacon" => ContentTypeMask::PING,
        "websocket" => ContentTypeMask::WEBSOCKET,
        "other" => ContentTypeMask::OTHER,
        "all" => ContentTypeMask::all(),
        _ => return None,
    })
}

impl RuleModifier {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            RuleModifier::Redirect(_)
                | RuleModifier::RedirectRule(_)
                | RuleModifier::RemoveParam(_)
                | RuleModifier::RemoveHeader(_)
                | RuleModifier::Csp(_)
                | RuleModifier::Replace(_)
                | RuleModifier::ScrambleJs(_)
        )
    }

    /// Conjunctive contribution to the rule's match predicate. Mutating
    /// modifiers do not constrain matching and always return true.
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        match self {
            RuleModifier::Domain(list) => list.matches(ctx.effective_source_host()),
            RuleModifier::DenyAllow(list) => !list.matches(ctx.host()),
            RuleModifier::ThirdParty { inverted } => match ctx.is_third_party {
                Some(third_party) => third_party != *inverted,
                // Without a referrer the request counts as first-party.
                None => *inverted,
            },
            RuleModifier::Method { methods, inverted } => {
                let m = ctx.method.as_str().to_ascii_lowercase();
                methods.iter().any(|x| *x == m) != *inverted
            }
            RuleModifier::ContentType(mask) => mask.intersects(ctx.request_type),
            RuleModifier::Popup => ctx.request_type.contains(ContentTypeMask::DOCUMENT),
            _ => true,
        }
    }

    /// Applies request-side mutations. Returns true when something changed.
    pub fn modify_req<B>(&self, req: &mut http::Request<B>) -> bool {
        match self {
            RuleModifier::RemoveParam(matcher) => remove_query_params(req, matcher),
            RuleModifier::RemoveHeader(target) if target.request => {
                match HeaderName::try_from(target.name.as_str()) {
                    Ok(name) => req.headers_mut().remove(name).is_some(),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }

    /// Applies response-side mutations. Returns true when something changed.
    pub async fn modify_res(&self, res: &mut http::Response<Body>) -> Result<bool, RewriteError> {
        match self {
            RuleModifier::RemoveHeader(target) if !target.request => {
                match HeaderName::try_from(target.name.as_str()) {
                    Ok(name) => Ok(res.headers_mut().remove(name).is_some()),
                    Err(_) => Ok(false),
                }
            }
            RuleModifier::Csp(policy) if !policy.is_empty() => {
                let value = HeaderValue::from_str(policy)?;
                res.headers_mut()
                    .append(header::CONTENT_SECURITY_POLICY, value);
                Ok(true)
            }
            RuleModifier::Replace(spec) if !spec.raw.is_empty() => {
                rewrite::buffer_rewrite(res, |data| spec.apply(&data)).await?;
                Ok(true)
            }
            RuleModifier::ScrambleJs(keys) => apply_scramble(res, keys).await,
            _ => Ok(false),
        }
    }

    /// The bundled surrogate this rule redirects to, if any.
    pub fn redirect_resource(&self) -> Option<&str> {
        match self {
            RuleModifier::Redirect(name) | RuleModifier::RedirectRule(name) => {
                Some(redirect_resources::resource_url(name))
            }
            _ => None,
        }
    }

    /// Exception-side cancellation: same kind, equivalent parameterisation.
    /// A parameterless exception modifier (`csp`, `replace`, ...) cancels
    /// every modifier of its kind.
    pub fn cancels(&self, other: &RuleModifier) -> bool {
        use RuleModifier::*;
        match (self, other) {
            (Domain(a), Domain(b)) => a == b,
            (DenyAllow(a), DenyAllow(b)) => a == b,
            (ThirdParty { inverted: a }, ThirdParty { inverted: b }) => a == b,
            (
                Method {
                    methods: a,
                    inverted: ai,
                },
                Method {
                    methods: b,
                    inverted: bi,
                },
            ) => a == b && ai == bi,
            (ContentType(a), ContentType(b)) => a == b,
            (Important, Important) => true,
            (Popup, Popup) => true,
            (MatchCase, MatchCase) => true,
            (Redirect(a), Redirect(b)) | (RedirectRule(a), RedirectRule(b)) => {
                a.is_empty() || a == b
            }
            (RemoveParam(a), RemoveParam(b)) => match (a, b) {
                (ParamMatcher::All, _) => true,
                (ParamMatcher::Exact(x), ParamMatcher::Exact(y)) => x == y,
                (
                    ParamMatcher::Pattern { re: x, inverted: xi },
                    ParamMatcher::Pattern { re: y, inverted: yi },
                ) => x.as_str() == y.as_str() && xi == yi,
                _ => false,
            },
            (RemoveHeader(a), RemoveHeader(b)) => a == b,
            (Csp(a), Csp(b)) => a.is_empty() || a == b,
            (Replace(a), Replace(b)) => a.raw.is_empty() || a.raw == b.raw,
            (ScrambleJs(a), ScrambleJs(b)) => {
                let mut a = a.clone();
                let mut b = b.clone();
                a.sort();
                b.sort();
                a == b
            }
            _ => false,
        }
    }
}

fn remove_query_params<B>(req: &mut http::Request<B>, matcher: &ParamMatcher) -> bool {
    let Ok(mut url) = Url::parse(&req.uri().to_string()) else {
        return false;
    };
    if url.query().is_none() {
        return false;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, value)| !matcher.matches(name, value))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    let removed_any = kept.len() != url.query_pairs().count();
    if !removed_any {
        return false;
    }

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept.iter());
    }

    match http::Uri::try_from(url.as_str()) {
        Ok(uri) => {
            *req.uri_mut() = uri;
            true
        }
        Err(_) => false,
    }
}

async fn apply_scramble(
    res: &mut http::Response<Body>,
    keys: &[String],
) -> Result<bool, RewriteError> {
    match rewrite::media_type(res.headers()).as_deref() {
        Some("text/html") => {
            rewrite::buffer_rewrite(res, |data| {
                html::rewrite_inline_scripts(&data, |text| scramble_keys(text, keys))
            })
            .await?;
            Ok(true)
        }
        Some("text/javascript") | Some("application/javascript")
        | Some("application/x-javascript") => {
            rewrite::buffer_rewrite(res, |data| scramble_keys(&data, keys)).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Replaces every occurrence of each key with a fresh random identifier.
fn scramble_keys(text: &[u8], keys: &[String]) -> Vec<u8> {
    let mut current = text.to_vec();
    for key in keys {
        let mut out = Vec::with_capacity(current.len());
        let mut pos = 0;
        for hit in memmem::find_iter(&current, key.as_bytes()) {
            out.extend_from_slice(&current[pos..hit]);
            out.extend_from_slice(&random_ident(10));
            pos = hit + key.len();
        }
        out.extend_from_slice(&current[pos..]);
        current = out;
    }
    current
}

/// `[A-Za-z][A-Za-z0-9]{len-1}`: safe as a JS identifier.
fn random_ident(len: usize) -> Vec<u8> {
    const ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(len);
    if len == 0 {
        return out;
    }
    out.push(ALPHA[rng.gen_range(0..ALPHA.len())]);
    for _ in 1..len {
        out.push(ALNUM[rng.gen_range(0..ALNUM.len())]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::full_body;

    fn ctx(url: &str, headers: &[(&str, &str)]) -> RequestContext {
        let mut builder = http::Request::builder().uri(url);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = builder.body(()).unwrap();
        RequestContext::from_request(&req).unwrap()
    }

    #[test]
    fn parse_rejects_unknown_option() {
        assert!(matches!(
            parse_modifier_list("nonsense"),
            Err(ModifierParseError::UnrecognisedOption(_))
        ));
    }

    #[test]
    fn domain_modifier_matches_source() {
        let modifiers = parse_modifier_list("domain=news.test|~sports.news.test").unwrap();
        let m = &modifiers[0];

        let on_news = ctx(
            "https://ads.example.com/x.js",
            &[("referer", "https://news.test/")],
        );
        assert!(m.matches(&on_news));

        let on_subdomain = ctx(
            "https://ads.example.com/x.js",
            &[("referer", "https://live.news.test/")],
        );
        assert!(m.matches(&on_subdomain));

        let negated = ctx(
            "https://ads.example.com/x.js",
            &[("referer", "https://sports.news.test/")],
        );
        assert!(!m.matches(&negated));

        let elsewhere = ctx(
            "https://ads.example.com/x.js",
            &[("referer", "https://other.test/")],
        );
        assert!(!m.matches(&elsewhere));
    }

    #[test]
    fn third_party_requires_cross_site_referer() {
        let modifiers = parse_modifier_list("third-party").unwrap();
        let m = &modifiers[0];

        assert!(m.matches(&ctx(
            "https://ads.example.com/x.js",
            &[("referer", "https://news.test/")],
        )));
        assert!(!m.matches(&ctx(
            "https://ads.example.com/x.js",
            &[("referer", "https://www.example.com/")],
        )));
        assert!(!m.matches(&ctx("https://ads.example.com/x.js", &[])));
    }

    #[test]
    fn content_type_masks_merge() {
        let modifiers = parse_modifier_list("script,image").unwrap();
        let RuleModifier::ContentType(mask) = &modifiers[0] else {
            panic!("expected content type modifier");
        };
        assert_eq!(*mask, ContentTypeMask::SCRIPT | ContentTypeMask::IMAGE);

        let modifiers = parse_modifier_list("~script").unwrap();
        let RuleModifier::ContentType(mask) = &modifiers[0] else {
            panic!("expected content type modifier");
        };
        assert!(!mask.contains(ContentTypeMask::SCRIPT));
        assert!(!mask.contains(ContentTypeMask::DOCUMENT));
        assert!(mask.contains(ContentTypeMask::IMAGE));
    }

    #[test]
    fn removeparam_strips_matching_pairs() {
        let modifiers = parse_modifier_list("removeparam=utm_source").unwrap();
        let m = &modifiers[0];

        let mut req = http::Request::builder()
            .uri("https://e.test/page?utm_source=mail&keep=1")
            .body(())
            .unwrap();
        assert!(m.modify_req(&mut req));
        assert_eq!(req.uri().query(), Some("keep=1"));

        let mut unchanged = http::Request::builder()
            .uri("https://e.test/page?keep=1")
            .body(())
            .unwrap();
        assert!(!m.modify_req(&mut unchanged));
    }

    #[test]
    fn removeparam_without_value_strips_whole_query() {
        let modifiers = parse_modifier_list("removeparam").unwrap();
        let mut req = http::Request::builder()
            .uri("https://e.test/page?a=1&b=2")
            .body(())
            .unwrap();
        assert!(modifiers[0].modify_req(&mut req));
        assert_eq!(req.uri().query(), None);
    }

    #[tokio::test]
    async fn removeheader_deletes_response_header() {
        let modifiers = parse_modifier_list("removeheader=set-cookie").unwrap();
        let mut res = http::Response::builder()
            .header("set-cookie", "a=1")
            .header("content-type", "text/plain")
            .body(full_body("x"))
            .unwrap();
        assert!(modifiers[0].modify_res(&mut res).await.unwrap());
        assert!(res.headers().get("set-cookie").is_none());
        assert!(res.headers().get("content-type").is_some());
    }

    #[test]
    fn removeheader_request_side() {
        let modifiers = parse_modifier_list("removeheader=request:x-client-data").unwrap();
        let mut req = http::Request::builder()
            .uri("https://e.test/")
            .header("x-client-data", "abc")
            .body(())
            .unwrap();
        assert!(modifiers[0].modify_req(&mut req));
        assert!(req.headers().get("x-client-data").is_none());
    }

    #[tokio::test]
    async fn replace_substitutes_in_body() {
        let modifiers = parse_modifier_list(r"replace=/ad-(\w+)/x-$1/i").unwrap();
        let mut res = http::Response::builder()
            .body(full_body("one AD-banner two ad-frame"))
            .unwrap();
        assert!(modifiers[0].modify_res(&mut res).await.unwrap());

        let body = std::mem::replace(res.body_mut(), crate::rewrite::empty_body());
        let bytes = http_body_util::BodyExt::collect(body).await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"one x-banner two x-frame");
    }

    #[tokio::test]
    async fn scramblejs_rewrites_js_bodies() {
        let modifiers = parse_modifier_list("scramblejs=ga|fbq").unwrap();
        let mut res = http::Response::builder()
            .header("content-type", "text/javascript")
            .body(full_body(r#"ga("send");fbq("track");"#))
            .unwrap();
        assert!(modifiers[0].modify_res(&mut res).await.unwrap());

        let body = std::mem::replace(res.body_mut(), crate::rewrite::empty_body());
        let bytes = http_body_util::BodyExt::collect(body).await.unwrap().to_bytes();
        let out = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!out.contains("ga("));
        assert!(!out.contains("fbq("));
        assert!(out.contains(r#"("send")"#));
    }

    #[test]
    fn scramble_identifiers_are_well_formed() {
        let out = scramble_keys(b"var key1 = \"key2\";", &["key1".into(), "key2".into()]);
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("key1"));
        assert!(!text.contains("key2"));
        for word in text.split(|c: char| !c.is_ascii_alphanumeric()) {
            if word.len() == 10 {
                assert!(word.chars().next().unwrap().is_ascii_alphabetic());
                assert!(word.chars().all(|c| c.is_ascii_alphanumeric()));
            }
        }
    }

    #[test]
    fn cancellation_is_per_kind_with_equal_parameters() {
        let primary = parse_modifier_list("scramblejs=a|b").unwrap();
        let same = parse_modifier_list("scramblejs=b|a").unwrap();
        let different = parse_modifier_list("scramblejs=a").unwrap();
        assert!(same[0].cancels(&primary[0]));
        assert!(!different[0].cancels(&primary[0]));

        let rh = parse_modifier_list("removeheader=set-cookie").unwrap();
        let rh_other = parse_modifier_list("removeheader=server").unwrap();
        assert!(rh[0].cancels(&rh[0]));
        assert!(!rh_other[0].cancels(&rh[0]));

        let csp_any = parse_modifier_list("csp").unwrap();
        let csp_rule = parse_modifier_list("csp=script-src 'none'").unwrap();
        assert!(csp_any[0].cancels(&csp_rule[0]));
        assert!(!csp_rule[0].cancels(&csp_any[0]));
    }

    #[test]
    fn replace_values_keep_escaped_commas() {
        let modifiers = parse_modifier_list(r"replace=/a\,b/x/,third-party").unwrap();
        assert_eq!(modifiers.len(), 2);
        assert!(matches!(modifiers[0], RuleModifier::Replace(_)));
        assert!(matches!(modifiers[1], RuleModifier::ThirdParty { .. }));
    }
}
