//! Compacting prefix trie over state addresses
//!
//! Nodes live in an arena and refer to each other by index. A node's address is
//! always a strict prefix of each of its children's addresses, and every node other
//! than the root either carries data or has at least two children.

use std::collections::BTreeMap;
use thiserror::Error;

/// Index of a node in the trie arena
type NodeId = usize;

const ROOT: NodeId = 0;

/// Signal raised by [`AddressTrie::walk`] when the requested address has no node
///
/// `descendant` names the nearest existing node whose address extends the requested
/// one, so callers can retry against it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("address {address:?} is not in the tree")]
pub struct AddressNotInTree {
    /// Address that was looked up
    pub address: String,
    /// Existing address below the requested one, if any
    pub descendant: Option<String>,
}

#[derive(Debug)]
struct Node<T> {
    address: String,
    data: Option<T>,
    parent: NodeId,
    /// Keyed by the first character following this node's address
    children: BTreeMap<char, NodeId>,
}

impl<T> Node<T> {
    fn new(address: String, parent: NodeId) -> Self {
        Self {
            address,
            data: None,
            parent,
            children: BTreeMap::new(),
        }
    }
}

/// Arena-backed radix trie keyed by address strings
#[derive(Debug)]
pub struct AddressTrie<T> {
    nodes: Vec<Node<T>>,
    free: Vec<NodeId>,
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()))
}

fn first_char(s: &str) -> Option<char> {
    s.chars().next()
}

impl<T> AddressTrie<T> {
    /// Create an empty trie holding only the root node (address `""`)
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(String::new(), ROOT)],
            free: Vec::new(),
        }
    }

    /// Data stored at exactly `address`
    pub fn get(&self, address: &str) -> Option<&T> {
        let (_, found) = self.descend(address);
        found.ok().and_then(|id| self.nodes[id].data.as_ref())
    }

    /// Apply `updater` to the data at `address`, creating the node if needed
    ///
    /// With `prune` set, every descendant of the node is dropped afterwards.
    pub fn update<F>(&mut self, address: &str, updater: F, prune: bool)
    where
        F: FnOnce(Option<T>) -> T,
    {
        let id = self.get_or_create(address);
        let node = &mut self.nodes[id];
        node.data = Some(updater(node.data.take()));
        if prune {
            self.drop_children(id);
        }
    }

    /// Iterate over the ancestors of `address` from the root down to the node
    /// itself, followed by every descendant of the node
    ///
    /// If there is no node at `address` the iterator yields the existing ancestors
    /// and then a single [`AddressNotInTree`] error.
    pub fn walk<'a>(&'a self, address: &str) -> Walk<'a, T> {
        let (path, found) = self.descend(address);
        let missing = match found {
            Ok(_) => None,
            Err(descendant) => Some(AddressNotInTree {
                address: address.to_string(),
                descendant,
            }),
        };
        Walk {
            trie: self,
            ancestors: path.into_iter(),
            last: None,
            missing,
            stack: None,
        }
    }

    /// Drop every descendant of `address`, leaving its own data untouched
    ///
    /// A node left with neither data nor children is removed, and a branch left
    /// with a single child is merged into it.
    pub fn prune(&mut self, address: &str) {
        let (_, found) = self.descend(address);
        let Ok(id) = found else {
            return;
        };
        self.drop_children(id);
        if id == ROOT || self.nodes[id].data.is_some() {
            return;
        }

        let parent = self.nodes[id].parent;
        self.detach(id);
        self.release(id);
        self.splice_if_redundant(parent);
    }

    /// Number of live nodes, including the root
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Follow `address` from the root. Returns the visited path and either the
    /// node for `address` or the address of a descendant that extends it.
    fn descend(&self, address: &str) -> (Vec<NodeId>, Result<NodeId, Option<String>>) {
        let mut path = vec![ROOT];
        let mut current = ROOT;
        loop {
            let node = &self.nodes[current];
            if node.address.len() == address.len() {
                return (path, Ok(current));
            }
            let Some(next) = first_char(&address[node.address.len()..]) else {
                return (path, Err(None));
            };
            let Some(&child) = node.children.get(&next) else {
                return (path, Err(None));
            };
            let child_address = &self.nodes[child].address;
            if address.starts_with(child_address.as_str()) {
                path.push(child);
                current = child;
            } else if child_address.starts_with(address) {
                return (path, Err(Some(child_address.clone())));
            } else {
                return (path, Err(None));
            }
        }
    }

    fn get_or_create(&mut self, address: &str) -> NodeId {
        let mut current = ROOT;
        loop {
            let node_len = self.nodes[current].address.len();
            if node_len == address.len() {
                return current;
            }
            let rest = &address[node_len..];
            let Some(key) = first_char(rest) else {
                return current;
            };

            let Some(child) = self.nodes[current].children.get(&key).copied() else {
                let leaf = self.alloc(address.to_string(), current);
                self.nodes[current].children.insert(key, leaf);
                return leaf;
            };

            let child_address = self.nodes[child].address.clone();
            if address.starts_with(child_address.as_str()) {
                current = child;
                continue;
            }

            let common = common_prefix_len(&child_address, address);
            if common == address.len() {
                // The new node sits between `current` and `child`
                let node = self.alloc(address.to_string(), current);
                self.nodes[current].children.insert(key, node);
                self.adopt(node, child, &child_address[common..]);
                return node;
            }

            let branch = self.alloc(address[..common].to_string(), current);
            self.nodes[current].children.insert(key, branch);
            self.adopt(branch, child, &child_address[common..]);
            let leaf = self.alloc(address.to_string(), branch);
            if let Some(leaf_key) = first_char(&address[common..]) {
                self.nodes[branch].children.insert(leaf_key, leaf);
            }
            return leaf;
        }
    }

    fn adopt(&mut self, parent: NodeId, child: NodeId, suffix: &str) {
        if let Some(key) = first_char(suffix) {
            self.nodes[parent].children.insert(key, child);
            self.nodes[child].parent = parent;
        }
    }

    fn alloc(&mut self, address: String, parent: NodeId) -> NodeId {
        let node = Node::new(address, parent);
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id] = Node::new(String::new(), ROOT);
        self.free.push(id);
    }

    fn detach(&mut self, id: NodeId) {
        let parent = self.nodes[id].parent;
        let parent_len = self.nodes[parent].address.len();
        if let Some(key) = first_char(&self.nodes[id].address[parent_len..]) {
            self.nodes[parent].children.remove(&key);
        }
    }

    fn drop_children(&mut self, id: NodeId) {
        let mut stack: Vec<NodeId> = std::mem::take(&mut self.nodes[id].children)
            .into_values()
            .collect();
        while let Some(next) = stack.pop() {
            stack.extend(std::mem::take(&mut self.nodes[next].children).into_values());
            self.release(next);
        }
    }

    /// Remove a dataless, non-root node that has only one child left
    fn splice_if_redundant(&mut self, id: NodeId) {
        let node = &self.nodes[id];
        if id == ROOT || node.data.is_some() || node.children.len() != 1 {
            return;
        }
        let Some(&only) = node.children.values().next() else {
            return;
        };
        let parent = node.parent;
        let parent_len = self.nodes[parent].address.len();
        let Some(key) = first_char(&self.nodes[id].address[parent_len..]) else {
            return;
        };
        self.nodes[parent].children.insert(key, only);
        self.nodes[only].parent = parent;
        self.nodes[id].children.clear();
        self.release(id);
    }
}

impl<T> Default for AddressTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`AddressTrie::walk`]
pub struct Walk<'a, T> {
    trie: &'a AddressTrie<T>,
    ancestors: std::vec::IntoIter<NodeId>,
    last: Option<NodeId>,
    missing: Option<AddressNotInTree>,
    stack: Option<Vec<NodeId>>,
}

impl<'a, T> Walk<'a, T> {
    fn entry(&self, id: NodeId) -> (&'a str, Option<&'a T>) {
        let node = &self.trie.nodes[id];
        (node.address.as_str(), node.data.as_ref())
    }
}

impl<'a, T> Iterator for Walk<'a, T> {
    type Item = Result<(&'a str, Option<&'a T>), AddressNotInTree>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(id) = self.ancestors.next() {
            self.last = Some(id);
            return Some(Ok(self.entry(id)));
        }
        if let Some(err) = self.missing.take() {
            self.stack = Some(Vec::new());
            return Some(Err(err));
        }

        let trie = self.trie;
        let last = self.last;
        let stack = self.stack.get_or_insert_with(|| {
            last.map(|id| trie.nodes[id].children.values().rev().copied().collect())
                .unwrap_or_default()
        });
        let id = stack.pop()?;
        stack.extend(trie.nodes[id].children.values().rev().copied());
        Some(Ok(self.entry(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn walk_addresses(trie: &AddressTrie<u32>, address: &str) -> Vec<String> {
        trie.walk(address)
            .filter_map(Result::ok)
            .map(|(addr, _)| addr.to_string())
            .collect()
    }

    fn set(trie: &mut AddressTrie<u32>, address: &str, value: u32) {
        trie.update(address, |_| value, false);
    }

    /// Check the structural invariants over every reachable node
    fn assert_compact(trie: &AddressTrie<u32>) {
        let mut stack = vec![ROOT];
        let mut reachable = 0;
        while let Some(id) = stack.pop() {
            reachable += 1;
            let node = &trie.nodes[id];
            if id != ROOT {
                assert!(
                    node.data.is_some() || node.children.len() >= 2,
                    "node {:?} is redundant",
                    node.address
                );
            }
            for (key, &child) in &node.children {
                let child_node = &trie.nodes[child];
                assert!(child_node.address.len() > node.address.len());
                assert!(child_node.address.starts_with(&node.address));
                assert_eq!(first_char(&child_node.address[node.address.len()..]), Some(*key));
                assert_eq!(child_node.parent, id);
                stack.push(child);
            }
        }
        assert_eq!(reachable, trie.node_count());
    }

    // ==================== Update Tests ====================

    #[test]
    fn test_update_creates_and_modifies() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "abc", 1);
        trie.update("abc", |old| old.unwrap_or(0) + 10, false);

        assert_eq!(trie.get("abc"), Some(&11));
        assert_eq!(trie.get("ab"), None);
        assert_compact(&trie);
    }

    #[test]
    fn test_update_splits_at_common_prefix() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "radix", 1);
        set(&mut trie, "radish", 2);

        // "radi" becomes a dataless branch with two children
        assert_eq!(trie.node_count(), 4);
        assert_eq!(walk_addresses(&trie, "radish"), vec!["", "radi", "radish"]);
        assert_compact(&trie);
    }

    #[test]
    fn test_update_inserts_between_parent_and_child() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "abcdef", 1);
        set(&mut trie, "abc", 2);

        assert_eq!(walk_addresses(&trie, "abcdef"), vec!["", "abc", "abcdef"]);
        assert_eq!(trie.get("abc"), Some(&2));
        assert_compact(&trie);
    }

    #[test]
    fn test_update_on_existing_branch_sets_data() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "ax", 1);
        set(&mut trie, "ay", 2);
        set(&mut trie, "a", 3);

        assert_eq!(trie.get("a"), Some(&3));
        assert_eq!(trie.node_count(), 4);
        assert_compact(&trie);
    }

    #[test]
    fn test_update_with_prune_drops_descendants() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "a/x", 1);
        set(&mut trie, "a/y", 2);
        trie.update("a", |_| 3, true);

        assert_eq!(trie.get("a/x"), None);
        assert_eq!(walk_addresses(&trie, "a"), vec!["", "a"]);
        assert_compact(&trie);
    }

    #[test]
    fn test_update_root() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "", 7);
        set(&mut trie, "a", 1);

        assert_eq!(trie.get(""), Some(&7));
        assert_eq!(walk_addresses(&trie, "a"), vec!["", "a"]);
    }

    #[test]
    fn test_multibyte_addresses() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "añb", 1);
        set(&mut trie, "añc", 2);
        set(&mut trie, "aé", 3);

        assert_eq!(trie.get("añb"), Some(&1));
        assert_eq!(walk_addresses(&trie, "añc"), vec!["", "a", "añ", "añc"]);
        assert_compact(&trie);
    }

    // ==================== Walk Tests ====================

    #[test]
    fn test_walk_yields_ancestors_then_descendants() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "a", 1);
        set(&mut trie, "ab", 2);
        set(&mut trie, "abc", 3);
        set(&mut trie, "abd", 4);

        let visited = walk_addresses(&trie, "ab");
        assert_eq!(&visited[..3], &["", "a", "ab"]);
        let below: BTreeSet<_> = visited[3..].iter().cloned().collect();
        assert_eq!(below, BTreeSet::from(["abc".to_string(), "abd".to_string()]));
    }

    #[test]
    fn test_walk_missing_reports_descendant() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "radix", 1);
        set(&mut trie, "radish", 2);

        // "rad" sits above the "radi" branch
        let steps: Vec<_> = trie.walk("rad").collect();
        assert_eq!(steps.len(), 2);
        assert!(steps[0].is_ok());
        let err = steps[1].clone().unwrap_err();
        assert_eq!(err.descendant.as_deref(), Some("radi"));
    }

    #[test]
    fn test_walk_missing_without_descendant() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "radix", 1);

        let err = trie.walk("rat").find_map(Result::err).unwrap();
        assert_eq!(err.address, "rat");
        assert_eq!(err.descendant, None);

        let err = trie.walk("radixes").find_map(Result::err).unwrap();
        assert_eq!(err.descendant, None);
        // The ancestors that do exist are still visited
        assert_eq!(walk_addresses(&trie, "radixes"), vec!["", "radix"]);
    }

    #[test]
    fn test_walk_ends_after_error() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "b", 1);
        let mut walk = trie.walk("a");

        assert!(walk.next().unwrap().is_ok());
        assert!(walk.next().unwrap().is_err());
        assert!(walk.next().is_none());
    }

    // ==================== Prune Tests ====================

    #[test]
    fn test_prune_keeps_own_data() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "a", 1);
        set(&mut trie, "a/x", 2);
        trie.prune("a");

        assert_eq!(trie.get("a"), Some(&1));
        assert_eq!(trie.get("a/x"), None);
        assert_eq!(trie.node_count(), 2);
    }

    #[test]
    fn test_prune_removes_dataless_branch() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "ax", 1);
        set(&mut trie, "ay", 2);
        set(&mut trie, "b", 3);
        trie.prune("a");

        assert_eq!(trie.get("ax"), None);
        assert_eq!(walk_addresses(&trie, ""), vec!["", "b"]);
        assert_compact(&trie);
    }

    #[test]
    fn test_prune_splices_parent_left_with_one_child() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "abx1", 1);
        set(&mut trie, "abx2", 2);
        set(&mut trie, "aby", 3);
        // "ab" branches to "abx" and "aby"; dropping "abx" leaves "ab" with one child
        trie.prune("abx");

        assert_eq!(walk_addresses(&trie, "aby"), vec!["", "aby"]);
        assert_compact(&trie);
    }

    #[test]
    fn test_prune_missing_is_noop() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "a", 1);
        trie.prune("zzz");
        assert_eq!(trie.node_count(), 2);
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut trie = AddressTrie::new();
        set(&mut trie, "a", 1);
        set(&mut trie, "a/1", 1);
        set(&mut trie, "a/2", 2);
        let high_water = trie.nodes.len();
        trie.prune("a");
        set(&mut trie, "a/3", 3);
        set(&mut trie, "a/4", 4);

        assert_eq!(trie.nodes.len(), high_water);
        assert_compact(&trie);
    }

    // ==================== Property Tests ====================

    fn address_strategy() -> impl Strategy<Value = String> {
        "[ab/]{0,6}"
    }

    proptest! {
        #[test]
        fn prop_trie_matches_map(
            ops in prop::collection::vec((address_strategy(), any::<bool>()), 1..40)
        ) {
            let mut trie = AddressTrie::new();
            let mut model: BTreeMap<String, u32> = BTreeMap::new();

            for (i, (address, prune)) in ops.iter().enumerate() {
                let value = i as u32;
                trie.update(address, |_| value, *prune);
                if *prune {
                    model.retain(|k, _| !(k.starts_with(address.as_str()) && k != address));
                }
                model.insert(address.clone(), value);
                assert_compact(&trie);
            }

            for (address, value) in &model {
                prop_assert_eq!(trie.get(address), Some(value));
            }

            // Every stored address is visited by a walk from the root
            let stored: BTreeSet<String> = trie
                .walk("")
                .filter_map(Result::ok)
                .filter(|(_, data)| data.is_some())
                .map(|(addr, _)| addr.to_string())
                .collect();
            let expected: BTreeSet<String> = model.keys().cloned().collect();
            prop_assert_eq!(stored, expected);
        }

        #[test]
        fn prop_walk_ancestors_are_prefixes(
            addresses in prop::collection::vec(address_strategy(), 1..20),
            query in address_strategy(),
        ) {
            let mut trie = AddressTrie::new();
            for address in &addresses {
                trie.update(address, |_| 0u32, false);
            }

            let mut reached_target = false;
            for step in trie.walk(&query) {
                match step {
                    Ok((addr, _)) if !reached_target => {
                        prop_assert!(query.starts_with(addr));
                        reached_target = addr == query;
                    }
                    Ok((addr, _)) => prop_assert!(addr.starts_with(query.as_str())),
                    Err(err) => {
                        if let Some(descendant) = err.descendant {
                            prop_assert!(descendant.starts_with(query.as_str()));
                        }
                    }
                }
            }
        }
    }
}
