//! Predecessor tracking
//!
//! [`PredecessorTree`] records, per address, the most recent writer and the readers
//! since that write, and answers which transactions must precede a new read or write.
//! [`PredecessorChain`] memoizes the transitive predecessors of every transaction.

use crate::tree::AddressTrie;
use std::collections::{BTreeSet, HashMap, HashSet};
use weft_types::TxnId;

/// Readers and writer recorded at one address
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Predecessors {
    /// Transactions that read the address since the last write
    pub readers: BTreeSet<TxnId>,
    /// Most recent writer of the address
    pub writer: Option<TxnId>,
}

/// Address trie of [`Predecessors`]
#[derive(Debug, Default)]
pub struct PredecessorTree {
    tree: AddressTrie<Predecessors>,
}

impl PredecessorTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            tree: AddressTrie::new(),
        }
    }

    /// Record at `address`
    pub fn get(&self, address: &str) -> Option<&Predecessors> {
        self.tree.get(address)
    }

    /// Record `reader` as reading `address`, keeping the writer
    pub fn add_reader(&mut self, address: &str, reader: TxnId) {
        self.tree.update(
            address,
            |existing| {
                let mut predecessors = existing.unwrap_or_default();
                predecessors.readers.insert(reader);
                predecessors
            },
            false,
        );
    }

    /// Record `writer` as the writer of `address`
    ///
    /// The write supersedes the readers at `address` and everything recorded below it.
    pub fn set_writer(&mut self, address: &str, writer: TxnId) {
        self.tree.update(
            address,
            |_| Predecessors {
                readers: BTreeSet::new(),
                writer: Some(writer),
            },
            true,
        );
    }

    /// Transactions a read of `address` must follow: the nearest enclosing writer
    /// plus every writer below `address`
    pub fn find_read_predecessors(&self, address: &str) -> BTreeSet<TxnId> {
        let mut predecessors = BTreeSet::new();
        let mut enclosing_writer = None;
        let mut walk = self.tree.walk(address);

        for step in walk.by_ref() {
            match step {
                Ok((node_address, data)) => {
                    if let Some(writer) = data.and_then(|p| p.writer.as_ref()) {
                        enclosing_writer = Some(writer);
                    }
                    if node_address.len() >= address.len() {
                        break;
                    }
                }
                Err(missing) => {
                    if let Some(descendant) = missing.descendant {
                        return self.find_read_predecessors(&descendant);
                    }
                    predecessors.extend(enclosing_writer.cloned());
                    return predecessors;
                }
            }
        }
        predecessors.extend(enclosing_writer.cloned());

        for (_, data) in walk.flatten() {
            if let Some(writer) = data.and_then(|p| p.writer.as_ref()) {
                predecessors.insert(writer.clone());
            }
        }
        predecessors
    }

    /// Transactions a write of `address` must follow: the nearest enclosing writer,
    /// every enclosing reader, and every reader and writer below `address`
    pub fn find_write_predecessors(&self, address: &str) -> BTreeSet<TxnId> {
        let mut predecessors = BTreeSet::new();
        let mut enclosing_writer = None;
        let mut walk = self.tree.walk(address);

        for step in walk.by_ref() {
            match step {
                Ok((node_address, data)) => {
                    if let Some(p) = data {
                        predecessors.extend(p.readers.iter().cloned());
                        if let Some(writer) = &p.writer {
                            enclosing_writer = Some(writer);
                        }
                    }
                    if node_address.len() >= address.len() {
                        break;
                    }
                }
                Err(missing) => {
                    if let Some(descendant) = missing.descendant {
                        return self.find_write_predecessors(&descendant);
                    }
                    predecessors.extend(enclosing_writer.cloned());
                    return predecessors;
                }
            }
        }
        predecessors.extend(enclosing_writer.cloned());

        for (_, data) in walk.flatten() {
            if let Some(p) = data {
                predecessors.extend(p.readers.iter().cloned());
                predecessors.extend(p.writer.iter().cloned());
            }
        }
        predecessors
    }
}

/// Transitive predecessor sets keyed by transaction
#[derive(Debug, Default)]
pub struct PredecessorChain {
    chains: HashMap<TxnId, HashSet<TxnId>>,
}

impl PredecessorChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `txn_id`'s predecessors along with everything they transitively follow
    ///
    /// Predecessors must have had their own relationships recorded first.
    pub fn add_relationship<'a, I>(&mut self, txn_id: TxnId, predecessors: I)
    where
        I: IntoIterator<Item = &'a TxnId>,
    {
        let mut chain = HashSet::new();
        for predecessor in predecessors {
            if let Some(transitive) = self.chains.get(predecessor) {
                chain.extend(transitive.iter().cloned());
            }
            chain.insert(predecessor.clone());
        }
        self.chains.insert(txn_id, chain);
    }

    /// Whether `predecessor` transitively precedes any of `others`
    pub fn is_predecessor_of_other<'a, I>(&self, predecessor: &TxnId, others: I) -> bool
    where
        I: IntoIterator<Item = &'a TxnId>,
    {
        others.into_iter().any(|other| {
            self.chains
                .get(other)
                .is_some_and(|chain| chain.contains(predecessor))
        })
    }

    /// Forget `txn_id`'s own entry
    pub fn remove(&mut self, txn_id: &TxnId) {
        self.chains.remove(txn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(n: u32) -> TxnId {
        TxnId::new(n.to_string())
    }

    fn ids(ns: &[u32]) -> BTreeSet<TxnId> {
        ns.iter().copied().map(id).collect()
    }

    fn assert_preds(tree: &PredecessorTree, address: &str, read: &[u32], write: &[u32]) {
        assert_eq!(tree.find_read_predecessors(address), ids(read), "read preds of {:?}", address);
        assert_eq!(tree.find_write_predecessors(address), ids(write), "write preds of {:?}", address);
    }

    // ==================== Predecessor Tree Tests ====================

    #[test]
    fn test_empty_tree_has_no_predecessors() {
        let tree = PredecessorTree::new();
        assert_preds(&tree, "abc", &[], &[]);
        assert_preds(&tree, "", &[], &[]);
    }

    #[test]
    fn test_readers_then_writer_evolution() {
        let mut tree = PredecessorTree::new();
        for (address, reader) in [("radix", 1), ("radish", 2), ("radon", 3), ("razzle", 4), ("rustic", 5)] {
            tree.add_reader(address, id(reader));
        }

        assert_preds(&tree, "r", &[], &[1, 2, 3, 4, 5]);
        assert_preds(&tree, "rad", &[], &[1, 2, 3]);
        assert_preds(&tree, "radi", &[], &[1, 2]);
        assert_preds(&tree, "radix", &[], &[1]);

        tree.add_reader("rad", id(6));
        tree.add_reader("rust", id(7));

        assert_preds(&tree, "ra", &[], &[1, 2, 3, 4, 6]);
        assert_preds(&tree, "ru", &[], &[5, 7]);

        tree.set_writer("radi", id(8));

        assert_preds(&tree, "rad", &[8], &[3, 6, 8]);
        assert_preds(&tree, "radi", &[8], &[6, 8]);
        assert_preds(&tree, "radical", &[8], &[6, 8]);
        assert!(tree.get("radix").is_none());

        tree.add_reader("rad", id(9));
        tree.add_reader("radi", id(10));
        tree.add_reader("radio", id(11));
        tree.add_reader("radon", id(12));
        tree.add_reader("rust", id(13));

        assert_preds(&tree, "rad", &[8], &[3, 6, 8, 9, 10, 11, 12]);
        assert_preds(&tree, "ru", &[], &[5, 7, 13]);

        tree.set_writer("radii", id(14));

        assert_preds(&tree, "radi", &[8, 14], &[6, 8, 9, 10, 11, 14]);
        assert_preds(&tree, "radii", &[14], &[6, 9, 10, 14]);
        assert_preds(&tree, "radio", &[8], &[6, 8, 9, 10, 11]);

        tree.set_writer("rust", id(15));
        tree.set_writer("rad", id(16));

        assert_preds(&tree, "r", &[15, 16], &[4, 15, 16]);
        assert_preds(&tree, "ru", &[15], &[15]);
        assert_preds(&tree, "rustic", &[15], &[15]);
    }

    #[test]
    fn test_writer_clears_readers_at_address() {
        let mut tree = PredecessorTree::new();
        tree.add_reader("a", id(1));
        tree.add_reader("a", id(2));
        tree.set_writer("a", id(3));

        let record = tree.get("a").unwrap();
        assert!(record.readers.is_empty());
        assert_eq!(record.writer, Some(id(3)));

        tree.add_reader("a", id(4));
        let record = tree.get("a").unwrap();
        assert_eq!(record.readers, ids(&[4]));
        assert_eq!(record.writer, Some(id(3)));
    }

    #[test]
    fn test_parent_write_shadows_child_history() {
        let mut tree = PredecessorTree::new();
        tree.add_reader("a/x", id(1));
        tree.set_writer("a/x", id(2));
        tree.add_reader("a/x", id(3));
        tree.set_writer("a", id(4));

        assert!(tree.get("a/x").is_none());
        assert_preds(&tree, "a/x", &[4], &[4]);
    }

    #[test]
    fn test_root_writer_encloses_everything() {
        let mut tree = PredecessorTree::new();
        tree.add_reader("abc", id(1));
        tree.set_writer("", id(2));

        assert_preds(&tree, "abc", &[2], &[2]);
        assert_preds(&tree, "zzz", &[2], &[2]);
    }

    // ==================== Predecessor Chain Tests ====================

    #[test]
    fn test_chain_is_transitive() {
        let mut chain = PredecessorChain::new();
        chain.add_relationship(id(1), &[]);
        chain.add_relationship(id(2), &[id(1)]);
        chain.add_relationship(id(3), &[id(2)]);
        chain.add_relationship(id(4), &[]);

        assert!(chain.is_predecessor_of_other(&id(1), &[id(3)]));
        assert!(chain.is_predecessor_of_other(&id(2), &[id(4), id(3)]));
        assert!(!chain.is_predecessor_of_other(&id(3), &[id(1), id(2)]));
        assert!(!chain.is_predecessor_of_other(&id(1), &[id(4)]));
        assert!(!chain.is_predecessor_of_other(&id(1), &[]));
    }

    #[test]
    fn test_chain_remove() {
        let mut chain = PredecessorChain::new();
        chain.add_relationship(id(1), &[]);
        chain.add_relationship(id(2), &[id(1)]);
        chain.remove(&id(2));

        assert!(!chain.is_predecessor_of_other(&id(1), &[id(2)]));
    }

    // ==================== Property Tests ====================

    #[derive(Clone, Debug)]
    enum Access {
        Read(String),
        Write(String),
    }

    fn access_strategy() -> impl Strategy<Value = Access> {
        prop_oneof![
            "[ab]{0,4}".prop_map(Access::Read),
            "[ab]{0,4}".prop_map(Access::Write),
        ]
    }

    fn conflicts(access: &Access, query: &str, query_is_write: bool) -> bool {
        let (other, other_is_write) = match access {
            Access::Read(a) => (a.as_str(), false),
            Access::Write(a) => (a.as_str(), true),
        };
        let related = query.starts_with(other) || other.starts_with(query);
        related && (query_is_write || other_is_write)
    }

    proptest! {
        #[test]
        fn prop_predecessors_cover_every_conflict(
            accesses in prop::collection::vec(access_strategy(), 0..25),
            query in "[ab]{0,4}",
        ) {
            let mut tree = PredecessorTree::new();
            let mut chain = PredecessorChain::new();
            for (n, access) in accesses.iter().enumerate() {
                let txn = id(n as u32);
                match access {
                    Access::Read(a) => {
                        let preds = tree.find_read_predecessors(a);
                        chain.add_relationship(txn.clone(), &preds);
                        tree.add_reader(a, txn);
                    }
                    Access::Write(a) => {
                        let preds = tree.find_write_predecessors(a);
                        chain.add_relationship(txn.clone(), &preds);
                        tree.set_writer(a, txn);
                    }
                }
            }

            for is_write in [false, true] {
                let found = if is_write {
                    tree.find_write_predecessors(&query)
                } else {
                    tree.find_read_predecessors(&query)
                };
                for (n, access) in accesses.iter().enumerate() {
                    let txn = id(n as u32);
                    let conflicting = conflicts(access, &query, is_write);
                    // Conflicts are named directly or reached through the chain
                    if conflicting {
                        prop_assert!(
                            found.contains(&txn) || chain.is_predecessor_of_other(&txn, &found),
                            "{:?} not covered by {:?}", access, found
                        );
                    }
                    if found.contains(&txn) {
                        prop_assert!(conflicting, "{:?} named without a conflict", access);
                    }
                }
            }
        }
    }
}
