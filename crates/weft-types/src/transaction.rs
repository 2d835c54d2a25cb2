//! Transaction types

use crate::id::TxnId;
use bytes::Bytes;

/// Transaction header
///
/// The scheduler only looks at `inputs`, `outputs` and `dependencies`; the remaining
/// fields are carried through to executors untouched.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransactionHeader {
    /// Transaction family that knows how to execute the payload
    #[cfg_attr(feature = "serde", serde(default))]
    pub family_name: String,
    /// Version of the transaction family
    #[cfg_attr(feature = "serde", serde(default))]
    pub family_version: String,
    /// State addresses the transaction may read, in order
    #[cfg_attr(feature = "serde", serde(default))]
    pub inputs: Vec<String>,
    /// State addresses the transaction may write, in order
    #[cfg_attr(feature = "serde", serde(default))]
    pub outputs: Vec<String>,
    /// Transactions whose batches must be fully resolved before this one runs
    #[cfg_attr(feature = "serde", serde(default))]
    pub dependencies: Vec<TxnId>,
    /// Arbitrary nonce keeping otherwise identical headers distinct
    #[cfg_attr(feature = "serde", serde(default))]
    pub nonce: String,
}

/// A signed transaction
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transaction {
    /// Signature over the header, used as the transaction id
    pub header_signature: TxnId,
    /// Decoded header
    pub header: TransactionHeader,
    /// Opaque payload interpreted by the transaction family
    #[cfg_attr(feature = "serde", serde(default))]
    pub payload: Bytes,
}

impl Transaction {
    /// Create a transaction from its parts
    pub fn new(header_signature: impl Into<TxnId>, header: TransactionHeader, payload: Bytes) -> Self {
        Self {
            header_signature: header_signature.into(),
            header,
            payload,
        }
    }

    /// Start building a transaction with the given signature
    pub fn builder(header_signature: impl Into<TxnId>) -> TransactionBuilder {
        TransactionBuilder::new(header_signature)
    }

    /// Transaction id
    pub fn id(&self) -> &TxnId {
        &self.header_signature
    }

    /// Input addresses
    pub fn inputs(&self) -> &[String] {
        &self.header.inputs
    }

    /// Output addresses
    pub fn outputs(&self) -> &[String] {
        &self.header.outputs
    }

    /// Explicit dependencies
    pub fn dependencies(&self) -> &[TxnId] {
        &self.header.dependencies
    }

    /// Payload bytes
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Builder for [`Transaction`]
#[derive(Clone, Debug)]
pub struct TransactionBuilder {
    header_signature: TxnId,
    header: TransactionHeader,
    payload: Bytes,
}

impl TransactionBuilder {
    /// Create a builder for the given signature
    pub fn new(header_signature: impl Into<TxnId>) -> Self {
        Self {
            header_signature: header_signature.into(),
            header: TransactionHeader::default(),
            payload: Bytes::new(),
        }
    }

    /// Set the transaction family
    pub fn family(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.header.family_name = name.into();
        self.header.family_version = version.into();
        self
    }

    /// Add an input address
    pub fn input(mut self, address: impl Into<String>) -> Self {
        self.header.inputs.push(address.into());
        self
    }

    /// Add several input addresses
    pub fn inputs<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header.inputs.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Add an output address
    pub fn output(mut self, address: impl Into<String>) -> Self {
        self.header.outputs.push(address.into());
        self
    }

    /// Add several output addresses
    pub fn outputs<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header.outputs.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Add an explicit dependency
    pub fn dependency(mut self, txn: impl Into<TxnId>) -> Self {
        self.header.dependencies.push(txn.into());
        self
    }

    /// Set the nonce
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.header.nonce = nonce.into();
        self
    }

    /// Set the payload
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Finish building
    pub fn build(self) -> Transaction {
        Transaction {
            header_signature: self.header_signature,
            header: self.header,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_header_fields() {
        let txn = Transaction::builder("t1")
            .family("intkey", "1.0")
            .input("a")
            .inputs(["b", "c"])
            .output("a")
            .dependency("t0")
            .nonce("1")
            .payload(Bytes::from_static(b"inc"))
            .build();

        assert_eq!(txn.id(), &TxnId::from("t1"));
        assert_eq!(txn.inputs(), &["a", "b", "c"]);
        assert_eq!(txn.outputs(), &["a"]);
        assert_eq!(txn.dependencies(), &[TxnId::from("t0")]);
        assert_eq!(txn.header.family_name, "intkey");
        assert_eq!(txn.payload().as_ref(), b"inc");
    }

    #[test]
    fn test_builder_defaults_are_empty() {
        let txn = TransactionBuilder::new("t1").build();

        assert!(txn.inputs().is_empty());
        assert!(txn.outputs().is_empty());
        assert!(txn.dependencies().is_empty());
        assert!(txn.payload().is_empty());
    }

    #[test]
    fn test_new_matches_builder() {
        let header = TransactionHeader {
            inputs: vec!["x".into()],
            outputs: vec!["x".into()],
            ..Default::default()
        };
        let txn = Transaction::new("t1", header, Bytes::new());
        let built = Transaction::builder("t1").input("x").output("x").build();

        assert_eq!(txn, built);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_header_deserializes_with_defaults() {
        let header: TransactionHeader =
            serde_json::from_str(r#"{"inputs": ["a"], "outputs": ["b"]}"#).unwrap();

        assert_eq!(header.inputs, vec!["a".to_string()]);
        assert_eq!(header.outputs, vec!["b".to_string()]);
        assert!(header.dependencies.is_empty());
    }
}
