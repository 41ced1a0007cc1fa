//! Filter-list line classification and per-list statistics.

use serde::Serialize;

use crate::filters::cosmetic;
use crate::filters::network;
use crate::scriptlets;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FilterType {
    Comment,
    HostsFile,
    Network,
    Cosmetic,
    Scriptlet,
    ExtendedCss,
}

/// Given a single line, checks which rule family it belongs to. This check
/// is performed before calling the family-specific parser.
pub fn detect_filter_type(line: &str) -> FilterType {
    if line.starts_with('!') || line.starts_with("[Adblock") {
        return FilterType::Comment;
    }
    if line.starts_with('#') {
        // `# comment`, but not `##selector`.
        let rest = &line[1..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return FilterType::Comment;
        }
    }

    if scriptlets::is_scriptlet_rule(line) {
        return FilterType::Scriptlet;
    }
    if cosmetic::is_style_injection_rule(line) || cosmetic::is_cosmetic_rule(line) {
        return FilterType::Cosmetic;
    }
    if cosmetic::is_extended_css_rule(line) {
        return FilterType::ExtendedCss;
    }
    if network::parse_hosts_line(line).is_some() {
        return FilterType::HostsFile;
    }
    FilterType::Network
}

/// Ingestion counters for one filter list, reported back to the host.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ListStats {
    pub name: String,
    pub network: usize,
    pub exceptions: usize,
    pub hosts: usize,
    pub cosmetic: usize,
    pub scriptlets: usize,
    pub extended_css: usize,
    pub errors: usize,
}
