//! The top-level filter facade.
//!
//! Composes the network-rule store, the scriptlet injector, and the
//! cosmetic injector behind the two hot entry points the proxy calls per
//! exchange, plus the ingestion API the host feeds filter lists through.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::allow_server::RuleSink;
use crate::blocker::{AppliedRule, ApplyError, Blocker, BlockerResult};
use crate::cosmetics::CosmeticInjector;
use crate::filters::network::FilterParseError;
use crate::lists::{detect_filter_type, FilterType, ListStats};
use crate::request::RequestContext;
use crate::rewrite::{self, Body, RewriteError};
use crate::scriptlets::ScriptletInjector;

/// Filter-list fetching is a collaborator: the host owns the HTTP client
/// and its caching policy, the engine only consumes readers.
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str) -> Result<Box<dyn BufRead + Send>, TransportError>;
}

#[derive(Debug, Error)]
#[error("fetch {url}: {message}")]
pub struct TransportError {
    pub url: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("read list: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error("inject: {0}")]
    Inject(#[from] RewriteError),
}

const ALLOWLIST_FILTER_NAME: &str = "Allowlist";

#[derive(Default)]
pub struct Engine {
    blocker: Blocker,
    scriptlets: ScriptletInjector,
    cosmetics: CosmeticInjector,
    finalized: AtomicBool,
}

impl Engine {
    pub fn new() -> Engine {
        Engine::default()
    }

    /// Line-iterates a filter list into the stores. Malformed lines are
    /// logged and skipped; ingestion always continues.
    pub fn add_list<R: BufRead>(
        &self,
        name: &str,
        trusted: bool,
        reader: R,
    ) -> std::io::Result<ListStats> {
        self.add_list_cancellable(name, trusted, reader, &AtomicBool::new(false))
    }

    /// Like [`Engine::add_list`], stopping at the next line boundary once
    /// `cancel` is set.
    pub fn add_list_cancellable<R: BufRead>(
        &self,
        name: &str,
        trusted: bool,
        reader: R,
        cancel: &AtomicBool,
    ) -> std::io::Result<ListStats> {
        let filter_name: Arc<str> = Arc::from(name);
        let mut stats = ListStats {
            name: name.to_string(),
            ..ListStats::default()
        };

        for line in reader.lines() {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.add_rule_line(line, &filter_name, trusted, &mut stats);
        }

        info!(
            list = name,
            network = stats.network,
            exceptions = stats.exceptions,
            hosts = stats.hosts,
            cosmetic = stats.cosmetic,
            scriptlets = stats.scriptlets,
            extended_css = stats.extended_css,
            errors = stats.errors,
            "filter list loaded"
        );
        Ok(stats)
    }

    /// Fetches a list through the host's client, then [`Engine::add_list`].
    pub fn add_url(
        &self,
        client: &dyn HttpClient,
        url: &str,
        name: &str,
        trusted: bool,
    ) -> Result<ListStats, EngineError> {
        let reader = client.get(url)?;
        Ok(self.add_list(name, trusted, reader)?)
    }

    fn add_rule_line(
        &self,
        line: &str,
        filter_name: &Arc<str>,
        trusted: bool,
        stats: &mut ListStats,
    ) {
        match detect_filter_type(line) {
            FilterType::Comment => {}
            FilterType::HostsFile => match self.blocker.add_rule(line, Some(filter_name.clone())) {
                Ok(_) => stats.hosts += 1,
                Err(err) => {
                    warn!(list = %filter_name, line, error = %err, "skipping hosts line");
                    stats.errors += 1;
                }
            },
            FilterType::Network => match self.blocker.add_rule(line, Some(filter_name.clone())) {
                Ok(true) => stats.exceptions += 1,
                Ok(false) => stats.network += 1,
                Err(err) => {
                    warn!(list = %filter_name, line, error = %err, "skipping network rule");
                    stats.errors += 1;
                }
            },
            FilterType::Cosmetic => match self.cosmetics.add_rule(line) {
                Ok(()) => stats.cosmetic += 1,
                Err(err) => {
                    warn!(list = %filter_name, line, error = %err, "skipping cosmetic rule");
                    stats.errors += 1;
                }
            },
            FilterType::Scriptlet => match self.scriptlets.add_rule(line, trusted) {
                Ok(()) => stats.scriptlets += 1,
                Err(err) => {
                    warn!(list = %filter_name, line, error = %err, "skipping scriptlet rule");
                    stats.errors += 1;
                }
            },
            // Classified and routed away; a separate runtime applies these.
            FilterType::ExtendedCss => stats.extended_css += 1,
        }
    }

    /// Compacts every store. Idempotent; rules added afterwards (the
    /// allow-rule endpoint) are uncompacted tails.
    pub fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.blocker.compact();
        self.scriptlets.compact();
        self.cosmetics.compact();
        info!("filter engine finalized");
    }

    /// Request-side entry point: blocks, redirects, or mutates in place.
    pub fn modify_req<B>(&self, req: &mut http::Request<B>) -> BlockerResult {
        self.blocker.modify_req(req)
    }

    /// Response-side entry point: network-rule mutators first, then
    /// scriptlet and cosmetic injection on HTML responses.
    pub async fn modify_res<B>(
        &self,
        req: &http::Request<B>,
        res: &mut http::Response<Body>,
    ) -> Result<Vec<AppliedRule>, EngineError> {
        let applied = self.blocker.modify_res(req, res).await?;

        if rewrite::media_type(res.headers()).as_deref() == Some("text/html") {
            if let Some(ctx) = RequestContext::from_request(req) {
                self.scriptlets.inject(ctx.host(), res).await?;
                self.cosmetics.inject(ctx.host(), res).await?;
            }
        }

        Ok(applied)
    }
}

impl RuleSink for Engine {
    fn add_allow_rule(&self, rule: &str) -> Result<(), FilterParseError> {
        let filter_name: Arc<str> = Arc::from(ALLOWLIST_FILTER_NAME);
        self.blocker.add_rule(rule, Some(filter_name)).map(|_| ())
    }
}
