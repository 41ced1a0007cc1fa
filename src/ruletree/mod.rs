//! Token trie over compiled filter patterns.
//!
//! Patterns are lowered into a sequence of slots (exact token, `^`
//! separator, `*` wildcard, `|`/`||` anchors) and inserted as a path from
//! the root. Queries walk the trie in three directions at every step:
//! the exact-match child for the current token, the wildcard child
//! (consuming one token), and the separator child (consuming one separator
//! character, or matching the end of the address). Payloads are collected
//! from every node visited along the way.
//!
//! Writers take node-local locks; lookups only take read locks, so queries
//! stay safe alongside concurrent inserts into disjoint subtrees.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::interner::TokenInterner;
use crate::utils;

const KIND_SHIFT: u32 = 28;
const KIND_MASK: u32 = 0xF;
const TOKEN_ID_MASK: u32 = (1 << 28) - 1;

/// Children are kept in an inline array until this size, then promoted to
/// a hash map. Most nodes have one to three children; an empty map header
/// would dominate the footprint at filter-list scale.
const CHILDREN_MAX_INLINE: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum NodeKind {
    ExactMatch = 0,
    AddressRoot = 1,
    DomainAnchor = 2,
    Wildcard = 3,
    Separator = 4,
}

/// Packed `(kind:4 | token_id:28)` node identity. The token id is zero for
/// every kind except `ExactMatch`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeKey(u32);

impl NodeKey {
    pub fn new(kind: NodeKind, token_id: u32) -> NodeKey {
        debug_assert!(token_id <= TOKEN_ID_MASK, "token id exceeds 28-bit limit");
        NodeKey(((kind as u32) << KIND_SHIFT) | (token_id & TOKEN_ID_MASK))
    }

    pub fn kind(self) -> u32 {
        (self.0 >> KIND_SHIFT) & KIND_MASK
    }

    pub fn token_id(self) -> u32 {
        self.0 & TOKEN_ID_MASK
    }
}

enum Children<T> {
    Inline(Vec<(NodeKey, Arc<Node<T>>)>),
    Map(FxHashMap<NodeKey, Arc<Node<T>>>),
}

struct Node<T> {
    children: RwLock<Children<T>>,
    payload: RwLock<Vec<T>>,
}

impl<T: Clone> Node<T> {
    fn new() -> Arc<Node<T>> {
        Arc::new(Node {
            children: RwLock::new(Children::Inline(Vec::new())),
            payload: RwLock::new(Vec::new()),
        })
    }

    fn find_or_add_child(&self, key: NodeKey) -> Arc<Node<T>> {
        let mut children = self.children.write();
        let promote = match &mut *children {
            Children::Inline(arr) => {
                if let Some((_, node)) = arr.iter().find(|(k, _)| *k == key) {
                    return Arc::clone(node);
                }
                if arr.len() < CHILDREN_MAX_INLINE {
                    let node = Node::new();
                    arr.push((key, Arc::clone(&node)));
                    return node;
                }
                true
            }
            Children::Map(map) => {
                return Arc::clone(map.entry(key).or_insert_with(Node::new));
            }
        };

        debug_assert!(promote);
        let previous = std::mem::replace(&mut *children, Children::Map(FxHashMap::default()));
        let Children::Inline(arr) = previous else {
            unreachable!("promotion starts from the inline representation");
        };
        let node = Node::new();
        let mut map: FxHashMap<NodeKey, Arc<Node<T>>> = arr.into_iter().collect();
        map.insert(key, Arc::clone(&node));
        *children = Children::Map(map);
        node
    }

    fn find_child(&self, key: NodeKey) -> Option<Arc<Node<T>>> {
        match &*self.children.read() {
            Children::Inline(arr) => arr
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, n)| Arc::clone(n)),
            Children::Map(map) => map.get(&key).map(Arc::clone),
        }
    }

    fn collect_payload(&self, out: &mut Vec<T>) {
        let payload = self.payload.read();
        out.extend(payload.iter().cloned());
    }

    /// Enters this node: collect its payload, then continue the walk.
    fn walk(&self, tokens: &[&str], interner: &TokenInterner, out: &mut Vec<T>) {
        self.collect_payload(out);
        self.step(tokens, interner, out);
    }

    /// Continues the walk without collecting this node's payload.
    fn step(&self, tokens: &[&str], interner: &TokenInterner, out: &mut Vec<T>) {
        let Some((first, rest)) = tokens.split_first() else {
            // The end of the address is a valid separator.
            if let Some(sep) = self.find_child(NodeKey::new(NodeKind::Separator, 0)) {
                sep.walk(tokens, interner, out);
            }
            return;
        };

        if utils::is_separator_token(first) {
            if let Some(sep) = self.find_child(NodeKey::new(NodeKind::Separator, 0)) {
                sep.walk(rest, interner, out);
            }
        }
        if let Some(wild) = self.find_child(NodeKey::new(NodeKind::Wildcard, 0)) {
            wild.walk(rest, interner, out);
        }
        if let Some(id) = interner.get(first) {
            if let Some(exact) = self.find_child(NodeKey::new(NodeKind::ExactMatch, id)) {
                exact.walk(rest, interner, out);
            }
        }
    }

    fn compact(&self) {
        self.payload.write().shrink_to_fit();

        let mut children = self.children.write();
        let current = std::mem::replace(&mut *children, Children::Inline(Vec::new()));
        *children = match current {
            Children::Inline(mut arr) => {
                arr.shrink_to_fit();
                Children::Inline(arr)
            }
            Children::Map(map) => {
                if map.len() <= CHILDREN_MAX_INLINE {
                    Children::Inline(map.into_iter().collect())
                } else {
                    Children::Map(map)
                }
            }
        };
        let snapshot: Vec<Arc<Node<T>>> = match &*children {
            Children::Inline(arr) => arr.iter().map(|(_, n)| Arc::clone(n)).collect(),
            Children::Map(map) => map.values().map(Arc::clone).collect(),
        };
        drop(children);

        for child in snapshot {
            child.compact();
        }
    }
}

/// The address under lookup: the canonical URL, its hostname, and the
/// path-and-query remainder that follows the hostname.
pub struct QueryAddress<'a> {
    pub url: &'a str,
    pub host: &'a str,
    pub after_host: &'a str,
}

pub struct RuleTree<T: Clone> {
    root: Arc<Node<T>>,
    interner: TokenInterner,
}

impl<T: Clone> Default for RuleTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> RuleTree<T> {
    pub fn new() -> RuleTree<T> {
        RuleTree {
            root: Node::new(),
            interner: TokenInterner::new(),
        }
    }

    /// Compiles `pattern` and appends `data` to the terminal node. An empty
    /// pattern lands on the root and matches every address.
    pub fn insert(&self, pattern: &str, data: T) {
        let mut node = Arc::clone(&self.root);
        for key in self.compile_pattern(pattern) {
            let next = node.find_or_add_child(key);
            node = next;
        }
        node.payload.write().push(data);
    }

    /// Returns the payloads of every node reachable from `addr`, in
    /// traversal order. Overlapping walks may yield the same payload more
    /// than once; callers deduplicate by identity.
    pub fn find(&self, addr: &QueryAddress) -> Vec<T> {
        let tokens = utils::tokenize(addr.url);
        let mut out = Vec::new();

        self.root.collect_payload(&mut out);

        if let Some(anchor) = self
            .root
            .find_child(NodeKey::new(NodeKind::AddressRoot, 0))
        {
            anchor.walk(&tokens, &self.interner, &mut out);
        }

        for start in 0..tokens.len() {
            self.root.step(&tokens[start..], &self.interner, &mut out);
        }

        if let Some(domain_root) = self
            .root
            .find_child(NodeKey::new(NodeKind::DomainAnchor, 0))
        {
            let tail = utils::tokenize(addr.after_host);
            for offset in utils::host_label_offsets(addr.host) {
                let mut toks: Vec<&str> = Vec::with_capacity(tail.len() + 1);
                toks.push(&addr.host[offset..]);
                toks.extend_from_slice(&tail);
                domain_root.step(&toks, &self.interner, &mut out);
            }
        }

        out
    }

    /// Shrinks every payload and child list to its used length. Called once
    /// after the bulk load; inserts afterwards remain valid and are simply
    /// uncompacted tails.
    pub fn compact(&self) {
        self.root.compact();
    }

    fn compile_pattern(&self, pattern: &str) -> Vec<NodeKey> {
        let mut keys = Vec::new();
        let mut rest = pattern;

        let host_anchored = if let Some(stripped) = rest.strip_prefix("||") {
            keys.push(NodeKey::new(NodeKind::DomainAnchor, 0));
            rest = stripped;
            true
        } else if let Some(stripped) = rest.strip_prefix('|') {
            keys.push(NodeKey::new(NodeKind::AddressRoot, 0));
            rest = stripped;
            false
        } else {
            false
        };

        // Hostnames match case-insensitively; paths and queries do not.
        let folded;
        let rest = if host_anchored {
            let host_end = rest
                .find(|c| matches!(c, '/' | '^' | '*'))
                .unwrap_or(rest.len());
            folded = format!(
                "{}{}",
                utils::fold_case(&rest[..host_end]),
                &rest[host_end..]
            );
            folded.as_str()
        } else {
            rest
        };

        let mut run_start = 0;
        for (i, c) in rest.char_indices() {
            match c {
                '^' | '*' => {
                    self.push_exact_run(&rest[run_start..i], &mut keys);
                    run_start = i + 1;
                    let kind = if c == '^' {
                        NodeKind::Separator
                    } else {
                        NodeKind::Wildcard
                    };
                    keys.push(NodeKey::new(kind, 0));
                }
                _ => {}
            }
        }
        self.push_exact_run(&rest[run_start..], &mut keys);

        keys
    }

    fn push_exact_run(&self, run: &str, keys: &mut Vec<NodeKey>) {
        for token in utils::tokenize(run) {
            let id = self.interner.intern(token);
            keys.push(NodeKey::new(NodeKind::ExactMatch, id));
        }
    }
}
