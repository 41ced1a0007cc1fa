//! Hostname-pattern index shared by the scriptlet and cosmetic stores.
//!
//! Entries carry a comma-separated hostname pattern list (`example.com`,
//! `~login.example.com`, empty for everywhere). Positive hostnames key the
//! entry in a suffix-probed map; entries with no positive hostnames live
//! in a generic bucket.

use rustc_hash::FxHashMap;

#[derive(Clone, Debug, PartialEq)]
pub struct HostnamePatterns {
    entries: Vec<HostPattern>,
}

#[derive(Clone, Debug, PartialEq)]
struct HostPattern {
    host: String,
    negated: bool,
}

impl HostnamePatterns {
    /// Parses a comma-separated hostname list. Wildcard entries other than
    /// a bare `*` are dropped: TLD wildcards are not supported.
    pub fn parse(list: &str) -> HostnamePatterns {
        let mut entries = Vec::new();
        for raw in list.split(',') {
            let raw = raw.trim();
            if raw.is_empty() || raw == "*" {
                continue;
            }
            let negated = raw.starts_with('~');
            let host = raw.trim_start_matches('~');
            if host.is_empty() || host.contains('*') {
                continue;
            }
            entries.push(HostPattern {
                host: host.to_ascii_lowercase(),
                negated,
            });
        }
        HostnamePatterns { entries }
    }

    /// No positive hostnames: applies everywhere (minus negations).
    pub fn is_generic(&self) -> bool {
        self.entries.iter().all(|e| e.negated)
    }

    pub fn positive_hosts(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| !e.negated)
            .map(|e| e.host.as_str())
    }

    pub fn matches(&self, host: &str) -> bool {
        let mut any_positive = false;
        let mut positive_hit = false;
        for entry in &self.entries {
            let hit = host_matches(host, &entry.host);
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

fn host_matches(host: &str, pattern: &str) -> bool {
    host == pattern
        || (host.len() > pattern.len()
            && host.ends_with(pattern)
            && host.as_bytes()[host.len() - pattern.len() - 1] == b'.')
}

pub struct HostnameIndex<T> {
    entries: Vec<(HostnamePatterns, T)>,
    by_host: FxHashMap<String, Vec<usize>>,
    generic: Vec<usize>,
}

impl<T> Default for HostnameIndex<T> {
    fn default() -> Self {
        HostnameIndex {
            entries: Vec::new(),
            by_host: FxHashMap::default(),
            generic: Vec::new(),
        }
    }
}

impl<T> HostnameIndex<T> {
    pub fn insert(&mut self, patterns: HostnamePatterns, value: T) {
        let index = self.entries.len();
        if patterns.is_generic() {
            self.generic.push(index);
        } else {
            for host in patterns.positive_hosts() {
                self.by_host
                    .entry(host.to_string())
                    .or_default()
                    .push(index);
            }
        }
        self.entries.push((patterns, value));
    }

    /// Entries whose pattern list matches `host`, in insertion order.
    pub fn matching(&self, host: &str) -> Vec<&T> {
        let mut indices: Vec<usize> = Vec::new();
        for &i in &self.generic {
            indices.push(i);
        }
        let mut suffix = host;
        loop {
            if let Some(bucket) = self.by_host.get(suffix) {
                indices.extend_from_slice(bucket);
            }
            match suffix.find('.') {
                Some(dot) if dot + 1 < suffix.len() => suffix = &suffix[dot + 1..],
                _ => break,
            }
        }
        indices.sort_unstable();
        indices.dedup();
        indices
            .into_iter()
            .filter(|&i| self.entries[i].0.matches(host))
            .map(|i| &self.entries[i].1)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn shrink(&mut self) {
        self.entries.shrink_to_fit();
        self.generic.shrink_to_fit();
        for bucket in self.by_host.values_mut() {
            bucket.shrink_to_fit();
        }
    }
}
