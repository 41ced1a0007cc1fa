//! Network filter rules.
//!
//! A network rule is a pattern (handled by the trie) plus the parsed
//! `$`-modifier list. Primary rules block or mutate; exception rules
//! (`@@`) cancel matching primaries. Hosts-file lines lower into
//! synthetic `||host^$document` rules.

use std::mem::discriminant;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::filters::modifiers::{parse_modifier_list, ModifierParseError, RuleModifier};
use crate::request::{ContentTypeMask, RequestContext};
use crate::rewrite::{Body, RewriteError};

#[derive(Debug, Error)]
pub enum FilterParseError {
    #[error("parse modifiers: {0}")]
    Modifier(#[from] ModifierParseError),
}

static RE_HOSTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:0\.0\.0\.0|127\.0\.0\.1)\s+(.+)").unwrap());
static RE_HOSTS_IGNORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:0\.0\.0\.0|broadcasthost|local|localhost(?:\.localdomain)?|ip6-\w+)$")
        .unwrap()
});

/// Hostnames named by a hosts-file line, with the trailing comment removed
/// and well-known pseudonyms skipped. `None` when the line is not a
/// hosts-file entry.
pub fn parse_hosts_line(line: &str) -> Option<Vec<&str>> {
    let captures = RE_HOSTS.captures(line)?;
    let mut field = captures.get(1).map(|m| m.as_str()).unwrap_or("");
    if let Some(comment) = field.find('#') {
        field = &field[..comment];
    }
    Some(
        field
            .split_whitespace()
            .filter(|host| !RE_HOSTS_IGNORE.is_match(host))
            .collect(),
    )
}

/// The decomposition of a raw network-rule line.
pub struct RuleParts<'a> {
    pub exception: bool,
    pub pattern: &'a str,
    pub modifiers: Option<&'a str>,
}

/// Strips the `@@` prefix and splits pattern from modifiers at the first
/// `$`.
pub fn split_rule(line: &str) -> RuleParts<'_> {
    let (exception, rest) = match line.strip_prefix("@@") {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    match rest.find('$') {
        Some(at) => RuleParts {
            exception,
            pattern: &rest[..at],
            modifiers: Some(&rest[at + 1..]),
        },
        None => RuleParts {
            exception,
            pattern: rest,
            modifiers: None,
        },
    }
}

/// Regex rules (`/…/`) are recognised but not yet compiled into the trie.
pub fn is_regex_pattern(pattern: &str) -> bool {
    pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/')
}

#[derive(Clone, Debug)]
pub struct NetworkRule {
    pub raw: String,
    pub filter_name: Option<Arc<str>>,
    pub modifiers: Vec<RuleModifier>,
}

impl NetworkRule {
    pub fn new(raw: &str, filter_name: Option<Arc<str>>) -> NetworkRule {
        NetworkRule {
            raw: raw.to_string(),
            filter_name,
            modifiers: Vec::new(),
        }
    }

    pub fn parse_modifiers(&mut self, list: &str) -> Result<(), FilterParseError> {
        self.modifiers = parse_modifier_list(list)?;
        Ok(())
    }

    pub fn should_match_req(&self, ctx: &RequestContext) -> bool {
        let mut typed = false;
        for m in &self.modifiers {
            if !m.matches(ctx) {
                return false;
            }
            if matches!(
                m,
                RuleModifier::ContentType(_) | RuleModifier::Popup
            ) {
                typed = true;
            }
        }
        // Untyped rules apply to subresources only; blocking the document
        // itself takes an explicit $document.
        if !typed && ctx.request_type.contains(ContentTypeMask::DOCUMENT) {
            return false;
        }
        true
    }

    pub fn should_match_res(&self, ctx: &RequestContext) -> bool {
        self.should_match_req(ctx)
    }

    /// True when the rule carries no mutators: a match means the request
    /// is blocked outright.
    pub fn should_block_req(&self) -> bool {
        !self.modifiers.iter().any(RuleModifier::is_mutating)
    }

    pub fn is_important(&self) -> bool {
        self.modifiers
            .iter()
            .any(|m| matches!(m, RuleModifier::Important))
    }

    pub fn redirect_resource(&self) -> Option<&str> {
        self.modifiers.iter().find_map(|m| m.redirect_resource())
    }

    pub fn modify_req<B>(&self, req: &mut http::Request<B>) -> bool {
        let mut changed = false;
        for m in &self.modifiers {
            changed |= m.modify_req(req);
        }
        changed
    }

    pub async fn modify_res(&self, res: &mut http::Response<Body>) -> Result<bool, RewriteError> {
        let mut changed = false;
        for m in &self.modifiers {
            changed |= m.modify_res(res).await?;
        }
        Ok(changed)
    }
}

#[derive(Clone, Debug)]
pub struct ExceptionRule {
    pub raw: String,
    pub filter_name: Option<Arc<str>>,
    pub modifiers: Vec<RuleModifier>,
}

impl ExceptionRule {
    pub fn new(raw: &str, filter_name: Option<Arc<str>>) -> ExceptionRule {
        ExceptionRule {
            raw: raw.to_string(),
            filter_name,
            modifiers: Vec::new(),
        }
    }

    pub fn parse_modifiers(&mut self, list: &str) -> Result<(), FilterParseError> {
        self.modifiers = parse_modifier_list(list)?;
        Ok(())
    }

    pub fn should_match_req(&self, ctx: &RequestContext) -> bool {
        self.modifiers.iter().all(|m| m.matches(ctx))
    }

    pub fn should_match_res(&self, ctx: &RequestContext) -> bool {
        self.should_match_req(ctx)
    }

    /// A cancelled primary is skipped entirely. For every modifier of the
    /// primary, this exception must either carry a cancelling counterpart
    /// or have no modifier of that dimension at all; a bare `@@` cancels
    /// everything.
    pub fn cancels(&self, rule: &NetworkRule) -> bool {
        rule.modifiers.iter().all(|m| {
            let mut saw_dimension = false;
            for ex in &self.modifiers {
                if discriminant(ex) == discriminant(m) {
                    saw_dimension = true;
                    if ex.cancels(m) {
                        return true;
                    }
                }
            }
            !saw_dimension
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(url: &str, headers: &[(&str, &str)]) -> RequestContext {
        let mut builder = http::Request::builder().uri(url);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = builder.body(()).unwrap();
        RequestContext::from_request(&req).unwrap()
    }

    fn primary(raw: &str) -> NetworkRule {
        let parts = split_rule(raw);
        assert!(!parts.exception);
        let mut rule = NetworkRule::new(raw, None);
        if let Some(modifiers) = parts.modifiers {
            rule.parse_modifiers(modifiers).unwrap();
        }
        rule
    }

    fn exception(raw: &str) -> ExceptionRule {
        let parts = split_rule(raw);
        assert!(parts.exception);
        let mut rule = ExceptionRule::new(raw, None);
        if let Some(modifiers) = parts.modifiers {
            rule.parse_modifiers(modifiers).unwrap();
        }
        rule
    }

    #[test]
    fn hosts_lines_lower_to_hostnames() {
        assert_eq!(
            parse_hosts_line("0.0.0.0 a.example b.example # tracking"),
            Some(vec!["a.example", "b.example"])
        );
        assert_eq!(
            parse_hosts_line("127.0.0.1 localhost tracker.example"),
            Some(vec!["tracker.example"])
        );
        assert_eq!(
            parse_hosts_line("0.0.0.0 0.0.0.0 ip6-allnodes broadcasthost"),
            Some(vec![])
        );
        assert!(parse_hosts_line("||ads.example^").is_none());
    }

    #[test]
    fn split_rule_handles_exception_and_modifiers() {
        let parts = split_rule("@@||ads.example.com^$third-party,script");
        assert!(parts.exception);
        assert_eq!(parts.pattern, "||ads.example.com^");
        assert_eq!(parts.modifiers, Some("third-party,script"));

        let parts = split_rule("||ads.example.com^");
        assert!(!parts.exception);
        assert_eq!(parts.modifiers, None);
    }

    #[test]
    fn regex_patterns_are_recognised() {
        assert!(is_regex_pattern("/banner[0-9]+/"));
        assert!(!is_regex_pattern("/banner/ad"));
        assert!(!is_regex_pattern("banner"));
    }

    #[test]
    fn untyped_rules_skip_documents() {
        let rule = primary("||ads.example.com^");
        let script = ctx(
            "https://ads.example.com/x.js",
            &[("sec-fetch-dest", "script")],
        );
        let document = ctx(
            "https://ads.example.com/",
            &[("sec-fetch-dest", "document")],
        );
        assert!(rule.should_match_req(&script));
        assert!(!rule.should_match_req(&document));

        let doc_rule = primary("||ads.example.com^$document");
        assert!(doc_rule.should_match_req(&document));
        assert!(!doc_rule.should_match_req(&script));
    }

    #[test]
    fn block_only_when_no_mutators() {
        assert!(primary("||ads.example.com^$third-party").should_block_req());
        assert!(!primary("||ads.example.com^$removeheader=set-cookie").should_block_req());
        assert!(!primary("||ads.example.com^$redirect=noopjs").should_block_req());
    }

    #[test]
    fn generic_exception_cancels_everything() {
        let ex = exception("@@||ads.example.com^");
        assert!(ex.cancels(&primary("||ads.example.com^$third-party")));
        assert!(ex.cancels(&primary("||ads.example.com^$removeheader=set-cookie")));
    }

    #[test]
    fn exception_with_matching_dimension_must_cancel_it() {
        let ex = exception("@@||ads.example.com^$removeheader=set-cookie");
        assert!(ex.cancels(&primary("||ads.example.com^$removeheader=set-cookie")));
        assert!(!ex.cancels(&primary("||ads.example.com^$removeheader=server")));
        // No removeheader dimension on the primary: nothing to contradict.
        assert!(ex.cancels(&primary("||ads.example.com^")));
    }

    #[test]
    fn exact_exception_cancels_its_primary() {
        let raw = "||ads.example.com^$third-party,scramblejs=ga|fbq";
        let rule = primary(raw);
        let ex = exception(&format!("@@{}", raw));
        assert!(ex.cancels(&rule));
    }

    #[test]
    fn important_is_detected() {
        assert!(primary("||ads.example.com^$important").is_important());
        assert!(!primary("||ads.example.com^").is_important());
    }
}
