//! Holds [`Blocker`], which handles all network-based filtering queries.
//!
//! The blocker owns two tries: primary rules (block or mutate) and
//! exception rules (`@@`). Request-time resolution collects candidates
//! from both, drops primaries cancelled by a matching exception, and
//! either blocks or applies mutators in traversal order.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::filters::network::{
    is_regex_pattern, parse_hosts_line, split_rule, ExceptionRule, FilterParseError, NetworkRule,
};
use crate::request::RequestContext;
use crate::rewrite::{Body, RewriteError};
use crate::ruletree::RuleTree;

/// Describes how a particular network request should be handled.
#[derive(Debug, Default)]
pub struct BlockerResult {
    /// Rules that blocked or mutated the exchange, in application order.
    pub applied: Vec<AppliedRule>,
    /// A blocking rule matched; the request must not be forwarded.
    pub should_block: bool,
    /// Where to send the client instead: a surrogate asset from a
    /// `redirect=` rule, or the rewritten URL when mutators changed it.
    pub redirect: Option<String>,
}

/// A rule as reported back to the host, for logging and diagnostics.
#[derive(Debug, Clone)]
pub struct AppliedRule {
    pub raw: String,
    pub filter_name: Option<Arc<str>>,
}

impl AppliedRule {
    fn from_primary(rule: &NetworkRule) -> AppliedRule {
        AppliedRule {
            raw: rule.raw.clone(),
            filter_name: rule.filter_name.clone(),
        }
    }
}

/// A response mutator failed; the offending rule rides along.
#[derive(Debug, Error)]
#[error("apply {rule:?}: {source}")]
pub struct ApplyError {
    pub rule: String,
    #[source]
    pub source: RewriteError,
}

#[derive(Default)]
pub struct Blocker {
    primary: RuleTree<Arc<NetworkRule>>,
    exceptions: RuleTree<Arc<ExceptionRule>>,
}

impl Blocker {
    pub fn new() -> Blocker {
        Blocker {
            primary: RuleTree::new(),
            exceptions: RuleTree::new(),
        }
    }

    /// Lowers one raw filter line into the right trie. Returns whether the
    /// line was an exception rule.
    pub fn add_rule(
        &self,
        line: &str,
        filter_name: Option<Arc<str>>,
    ) -> Result<bool, FilterParseError> {
        if let Some(hosts) = parse_hosts_line(line) {
            for host in hosts {
                let raw = format!("||{}^$document", host);
                let mut rule = NetworkRule::new(&raw, filter_name.clone());
                rule.parse_modifiers("document")?;
                self.primary.insert(&format!("||{}^", host), Arc::new(rule));
            }
            return Ok(false);
        }

        let parts = split_rule(line);
        if is_regex_pattern(parts.pattern) {
            // Accepted as a no-op until regex rules are supported.
            return Ok(parts.exception);
        }

        if parts.exception {
            let mut rule = ExceptionRule::new(line, filter_name);
            if let Some(modifiers) = parts.modifiers {
                rule.parse_modifiers(modifiers)?;
            }
            self.exceptions.insert(parts.pattern, Arc::new(rule));
            Ok(true)
        } else {
            let mut rule = NetworkRule::new(line, filter_name);
            if let Some(modifiers) = parts.modifiers {
                rule.parse_modifiers(modifiers)?;
            }
            self.primary.insert(parts.pattern, Arc::new(rule));
            Ok(false)
        }
    }

    /// Request-side filtering: blocks, redirects, or mutates in place.
    pub fn modify_req<B>(&self, req: &mut http::Request<B>) -> BlockerResult {
        let Some(ctx) = RequestContext::from_request(req) else {
            return BlockerResult::default();
        };

        let mut primaries = dedup_by_identity(self.primary.find(&ctx.address()));
        primaries.retain(|rule| rule.should_match_req(&ctx));
        if primaries.is_empty() {
            return BlockerResult::default();
        }

        let mut exceptions = dedup_by_identity(self.exceptions.find(&ctx.address()));
        exceptions.retain(|rule| rule.should_match_req(&ctx));

        // $important rules go first; traversal order is kept within each class.
        primaries.sort_by_key(|rule| !rule.is_important());

        let initial_uri = req.uri().to_string();
        let mut result = BlockerResult::default();

        'primaries: for rule in &primaries {
            for ex in &exceptions {
                if ex.cancels(rule) {
                    debug!(rule = %rule.raw, exception = %ex.raw, "rule cancelled");
                    continue 'primaries;
                }
            }

            if rule.should_block_req() {
                return BlockerResult {
                    applied: vec![AppliedRule::from_primary(rule)],
                    should_block: true,
                    redirect: None,
                };
            }

            let mut applied = rule.modify_req(req);
            if let Some(target) = rule.redirect_resource() {
                result.redirect = Some(target.to_string());
                applied = true;
            }
            if applied {
                result.applied.push(AppliedRule::from_primary(rule));
            }
        }

        if result.redirect.is_none() {
            let final_uri = req.uri().to_string();
            if final_uri != initial_uri {
                result.redirect = Some(final_uri);
            }
        }

        result
    }

    /// Response-side filtering. A failing mutator leaves the response as
    /// the remaining rules produced it and surfaces as the returned error.
    pub async fn modify_res<B>(
        &self,
        req: &http::Request<B>,
        res: &mut http::Response<Body>,
    ) -> Result<Vec<AppliedRule>, ApplyError> {
        let Some(ctx) = RequestContext::from_request(req) else {
            return Ok(Vec::new());
        };

        let mut primaries = dedup_by_identity(self.primary.find(&ctx.address()));
        primaries.retain(|rule| rule.should_match_res(&ctx));
        if primaries.is_empty() {
            return Ok(Vec::new());
        }

        let mut exceptions = dedup_by_identity(self.exceptions.find(&ctx.address()));
        exceptions.retain(|rule| rule.should_match_res(&ctx));

        primaries.sort_by_key(|rule| !rule.is_important());

        let mut applied = Vec::new();
        let mut first_error: Option<ApplyError> = None;

        'primaries: for rule in &primaries {
            for ex in &exceptions {
                if ex.cancels(rule) {
                    continue 'primaries;
                }
            }
            if rule.should_block_req() {
                // Pure blocking rules have no response-side effect.
                continue;
            }
            match rule.modify_res(res).await {
                Ok(true) => applied.push(AppliedRule::from_primary(rule)),
                Ok(false) => {}
                Err(source) => {
                    warn!(rule = %rule.raw, error = %source, "response mutator failed");
                    if first_error.is_none() {
                        first_error = Some(ApplyError {
                            rule: rule.raw.clone(),
                            source,
                        });
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }

    /// Shrinks both tries; called once after the bulk load.
    pub fn compact(&self) {
        self.primary.compact();
        self.exceptions.compact();
    }
}

fn dedup_by_identity<T>(rules: Vec<Arc<T>>) -> Vec<Arc<T>> {
    let mut seen: Vec<*const T> = Vec::with_capacity(rules.len());
    rules
        .into_iter()
        .filter(|rule| {
            let ptr = Arc::as_ptr(rule);
            if seen.contains(&ptr) {
                false
            } else {
                seen.push(ptr);
                true
            }
        })
        .collect()
}
