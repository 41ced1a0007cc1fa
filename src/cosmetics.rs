//! Cosmetic rule store and `<style>` injection.
//!
//! Element-hiding selectors for the matched host aggregate into a single
//! inline `<style>` element; `#$#` style-injection blocks are emitted
//! verbatim after them. `#@#` exceptions subtract selectors per host. The
//! element is nonce-attached when the response carries a CSP.

use parking_lot::RwLock;

use crate::csp::{self, InlineKind};
use crate::filters::cosmetic::{CosmeticBody, CosmeticFilter, CosmeticParseError};
use crate::hostindex::HostnameIndex;
use crate::html;
use crate::rewrite::{self, Body, RewriteError};

#[derive(Default)]
struct CosmeticStore {
    hide: HostnameIndex<String>,
    unhide: HostnameIndex<String>,
    style: HostnameIndex<String>,
}

/// Parses `##`/`#@#`/`#$#` rules and splices the aggregated styles into
/// HTML responses.
#[derive(Default)]
pub struct CosmeticInjector {
    store: RwLock<CosmeticStore>,
}

impl CosmeticInjector {
    pub fn new() -> CosmeticInjector {
        CosmeticInjector::default()
    }

    pub fn add_rule(&self, line: &str) -> Result<(), CosmeticParseError> {
        let rule = CosmeticFilter::parse(line)?;
        let mut store = self.store.write();
        match rule.body {
            CosmeticBody::Hide(selector) => {
                if rule.unhide {
                    store.unhide.insert(rule.patterns, selector);
                } else {
                    store.hide.insert(rule.patterns, selector);
                }
            }
            CosmeticBody::Style(block) => {
                store.style.insert(rule.patterns, block);
            }
        }
        Ok(())
    }

    /// Splices one `<style>` element carrying every selector and style
    /// block applicable to `host`. Returns false when nothing applies.
    pub async fn inject(
        &self,
        host: &str,
        res: &mut http::Response<Body>,
    ) -> Result<bool, RewriteError> {
        let css = {
            let store = self.store.read();
            let unhidden: Vec<&String> = store.unhide.matching(host);
            let mut css = String::new();
            for selector in store.hide.matching(host) {
                if unhidden.iter().any(|u| *u == selector) {
                    continue;
                }
                css.push_str(selector);
                css.push_str("{display:none!important;}");
            }
            for block in store.style.matching(host) {
                css.push_str(block);
            }
            css
        };
        if css.is_empty() {
            return Ok(false);
        }

        let nonce = csp::patch_headers(res.headers_mut(), InlineKind::Style);
        rewrite::decode_in_place(res).await?;

        let element = if nonce.is_empty() {
            format!("<style>{}</style>", css)
        } else {
            format!("<style nonce=\"{}\">{}</style>", nonce, css)
        };
        html::inject_element(res, element.into_bytes());
        Ok(true)
    }

    pub fn compact(&self) {
        let mut store = self.store.write();
        store.hide.shrink();
        store.unhide.shrink();
        store.style.shrink();
    }
}
