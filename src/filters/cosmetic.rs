//! Cosmetic filter rules: element hiding (`##`, `#@#`) and style
//! injection (`#$#`), plus the sieve that routes extended-CSS rules away
//! from the plain-CSS path.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::hostindex::HostnamePatterns;

/// Extended pseudo-classes that plain CSS injection cannot express. uBlock
/// Origin writes both rule families with the same `##` syntax, so the body
/// has to be inspected.
static EXT_PSEUDO_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r":(?:has-text|contains|matches-attr|matches-css(?:-before|-after)?|matches-media|matches-path|matches-prop(?:erty)?|min-text-length|others|upward|xpath|nth-ancestor|watch-attr|remove|style|-abp-(?:contains|has))",
    )
    .unwrap()
});

static COSMETIC_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^.*#@?#.+$").unwrap());
static EXTENDED_CSS_RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^.+#@?\??#.+$").unwrap());

pub fn contains_extended_pseudo_class(selector: &str) -> bool {
    EXT_PSEUDO_CLASS.is_match(selector)
}

/// True for `##`/`#@#` rules whose body plain CSS can express.
pub fn is_cosmetic_rule(line: &str) -> bool {
    if !COSMETIC_RULE.is_match(line) {
        return false;
    }
    let body = line
        .split_once("#@#")
        .or_else(|| line.split_once("##"))
        .map(|(_, body)| body)
        .unwrap_or("");
    !contains_extended_pseudo_class(body)
}

/// True for rules in the extended-CSS family (`#?#` or extended
/// pseudo-classes). These are classified and routed, not applied.
pub fn is_extended_css_rule(line: &str) -> bool {
    EXTENDED_CSS_RULE.is_match(line)
}

/// True for `hosts#$#selector { decls }` style-injection rules.
pub fn is_style_injection_rule(line: &str) -> bool {
    line.split_once("#$#")
        .map(|(_, body)| !body.is_empty())
        .unwrap_or(false)
}

#[derive(Debug, Error, PartialEq)]
pub enum CosmeticParseError {
    #[error("not a cosmetic rule")]
    NotCosmetic,
    #[error("extended-CSS rules are routed to a separate path")]
    ExtendedCss,
    #[error("empty selector")]
    EmptySelector,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CosmeticBody {
    /// `##selector`: hide matching elements.
    Hide(String),
    /// `#$#selector { decls }`: inject the block verbatim.
    Style(String),
}

/// One parsed cosmetic rule.
#[derive(Clone, Debug)]
pub struct CosmeticFilter {
    pub patterns: HostnamePatterns,
    pub unhide: bool,
    pub body: CosmeticBody,
}

impl CosmeticFilter {
    pub fn parse(line: &str) -> Result<CosmeticFilter, CosmeticParseError> {
        if let Some((hosts, body)) = line.split_once("#$#") {
            let body = body.trim();
            if body.is_empty() {
                return Err(CosmeticParseError::EmptySelector);
            }
            return Ok(CosmeticFilter {
                patterns: HostnamePatterns::parse(hosts),
                unhide: false,
                body: CosmeticBody::Style(body.to_string()),
            });
        }

        let (hosts, selector, unhide) = if let Some((hosts, body)) = line.split_once("#@#") {
            (hosts, body, true)
        } else if let Some((hosts, body)) = line.split_once("##") {
            (hosts, body, false)
        } else {
            return Err(CosmeticParseError::NotCosmetic);
        };

        let selector = selector.trim();
        if selector.is_empty() {
            return Err(CosmeticParseError::EmptySelector);
        }
        if selector.starts_with("+js(") {
            // Scriptlet rules share the ## prefix but are not cosmetic.
            return Err(CosmeticParseError::NotCosmetic);
        }
        if contains_extended_pseudo_class(selector) {
            return Err(CosmeticParseError::ExtendedCss);
        }

        Ok(CosmeticFilter {
            patterns: HostnamePatterns::parse(hosts),
            unhide,
            body: CosmeticBody::Hide(selector.to_string()),
        })
    }
}
