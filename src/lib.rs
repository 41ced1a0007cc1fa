//! `adfilter` is the rule engine of a filtering HTTP/HTTPS intercepting
//! proxy. It ingests AdGuard/EasyList/uBlock Origin-style filter lists,
//! compiles them into token tries and hostname indexes, and answers the
//! two per-exchange questions the proxy asks: what to do with this
//! request, and how to mutate this response.
//!
//! The proxy loop, TLS interception, and list fetching/caching live in
//! the host; see [`engine::Engine`] for the offered surface and
//! [`engine::HttpClient`] for what the host supplies.

pub mod allow_server;
pub mod blocker;
pub mod cosmetics;
pub mod csp;
pub mod engine;
pub mod filters;
pub mod hostindex;
pub mod html;
pub mod interner;
pub mod lists;
pub mod redirect_resources;
pub mod request;
pub mod rewrite;
pub mod ruletree;
pub mod scriptlets;
pub mod utils;

pub use allow_server::{AllowRuleServer, RuleSink};
pub use blocker::{AppliedRule, Blocker, BlockerResult};
pub use engine::{Engine, EngineError, HttpClient};
pub use lists::{FilterType, ListStats};
pub use request::{ContentTypeMask, RequestContext};
pub use rewrite::{Body, BoxError};
