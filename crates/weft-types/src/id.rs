//! String identifiers used throughout the scheduler
//!
//! Transactions and batches are identified by their header signatures. Contexts and
//! state hashes are opaque handles minted by the state layer.

use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the identifier, returning the inner string
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Transaction identifier (the transaction's header signature)
    TxnId
);

string_id!(
    /// Batch identifier (the batch's header signature)
    BatchId
);

string_id!(
    /// Handle to the state changes produced by one transaction execution
    ContextId
);

string_id!(
    /// Root hash of a state snapshot
    StateHash
);

impl StateHash {
    /// Build a state hash from raw digest bytes
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_id_creation() {
        let id = TxnId::new("abc");
        assert_eq!(id.as_str(), "abc");
        assert_eq!(id, TxnId::from("abc"));
        assert_eq!(id, TxnId::from(String::from("abc")));
        assert_eq!(id.into_string(), "abc");
    }

    #[test]
    fn test_id_display_and_debug() {
        let id = BatchId::from("b1");
        assert_eq!(id.to_string(), "b1");
        assert_eq!(format!("{:?}", id), "BatchId(b1)");
    }

    #[test]
    fn test_id_borrow_lookup() {
        let mut map: HashMap<TxnId, u32> = HashMap::new();
        map.insert(TxnId::from("t1"), 7);

        // Maps keyed by ids can be queried with plain string slices
        assert_eq!(map.get("t1"), Some(&7));
        assert_eq!(map.get("t2"), None);
    }

    #[test]
    fn test_id_ordering() {
        assert!(TxnId::from("a") < TxnId::from("b"));
    }

    #[test]
    fn test_state_hash_from_digest() {
        let hash = StateHash::from_digest(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(hash.as_str(), "deadbeef");
    }
}
