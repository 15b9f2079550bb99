//! Namespace model.
//!
//! A proposal asks for chains, methods and events per namespace key; a
//! session grants accounts, methods and events per namespace key. Chains are
//! CAIP-2 (`namespace:reference`) and accounts CAIP-10
//! (`namespace:reference:address`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Namespaces requested by a proposal, keyed by namespace key (`eip155`).
pub type ProposalNamespaces = BTreeMap<String, ProposalNamespace>;

/// Namespaces granted by a session, keyed by namespace key.
pub type SessionNamespaces = BTreeMap<String, SessionNamespace>;

/// What a proposer asks for in one namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNamespace {
    /// CAIP-2 chain ids.
    pub chains: Vec<String>,
    /// JSON-RPC methods.
    pub methods: Vec<String>,
    /// Event names.
    pub events: Vec<String>,
}

impl ProposalNamespace {
    /// Create a proposal namespace.
    pub fn new<C, M, E>(chains: C, methods: M, events: E) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            chains: chains.into_iter().map(Into::into).collect(),
            methods: methods.into_iter().map(Into::into).collect(),
            events: events.into_iter().map(Into::into).collect(),
        }
    }
}

/// What a responder grants in one namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNamespace {
    /// CAIP-10 accounts.
    pub accounts: Vec<String>,
    /// JSON-RPC methods.
    pub methods: Vec<String>,
    /// Event names.
    pub events: Vec<String>,
}

impl SessionNamespace {
    /// Create a session namespace.
    pub fn new<A, M, E>(accounts: A, methods: M, events: E) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            accounts: accounts.into_iter().map(Into::into).collect(),
            methods: methods.into_iter().map(Into::into).collect(),
            events: events.into_iter().map(Into::into).collect(),
        }
    }

    /// Chain ids of the granted accounts, in account order.
    pub fn chains(&self) -> impl Iterator<Item = &str> {
        self.accounts.iter().filter_map(|a| account_chain(a))
    }

    /// Whether an account on `chain_id` is granted.
    pub fn has_chain(&self, chain_id: &str) -> bool {
        self.chains().any(|c| c == chain_id)
    }
}

/// Chain id (`namespace:reference`) of a CAIP-10 account.
///
/// Returns `None` when the account does not have three non-empty parts.
pub fn account_chain(account: &str) -> Option<&str> {
    let mut parts = account.splitn(3, ':');
    let namespace = parts.next().filter(|p| !p.is_empty())?;
    let reference = parts.next().filter(|p| !p.is_empty())?;
    let address = parts.next().filter(|p| !p.is_empty())?;
    if address.contains(':') {
        return None;
    }
    Some(&account[..namespace.len() + 1 + reference.len()])
}

/// Whether `chain_id` is a CAIP-2 chain id.
pub fn is_chain_id(chain_id: &str) -> bool {
    match chain_id.split_once(':') {
        Some((namespace, reference)) => {
            is_namespace_key(namespace)
                && !reference.is_empty()
                && reference.len() <= 32
                && reference
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        }
        None => false,
    }
}

/// Whether `key` is a valid namespace key: 3 to 8 of `[-a-z0-9]`.
pub fn is_namespace_key(key: &str) -> bool {
    (3..=8).contains(&key.len())
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_chain() {
        assert_eq!(account_chain("eip155:1:0xabc"), Some("eip155:1"));
        assert_eq!(
            account_chain("cosmos:cosmoshub-4:cosmos1xyz"),
            Some("cosmos:cosmoshub-4")
        );
        assert_eq!(account_chain("eip155:1"), None);
        assert_eq!(account_chain("eip155::0xabc"), None);
        assert_eq!(account_chain("eip155:1:0xabc:extra"), None);
    }

    #[test]
    fn test_chain_ids() {
        assert!(is_chain_id("eip155:1"));
        assert!(is_chain_id("cosmos:cosmoshub-4"));
        assert!(!is_chain_id("eip155"));
        assert!(!is_chain_id("EIP155:1"));
        assert!(!is_chain_id("ab:1"));
        assert!(!is_chain_id("eip155:"));
    }

    #[test]
    fn test_session_namespace_chains() {
        let ns = SessionNamespace::new(
            ["eip155:1:0xa", "eip155:137:0xb", "bad"],
            ["personal_sign"],
            Vec::<String>::new(),
        );
        assert_eq!(ns.chains().collect::<Vec<_>>(), vec!["eip155:1", "eip155:137"]);
        assert!(ns.has_chain("eip155:137"));
        assert!(!ns.has_chain("eip155:10"));
    }

    #[test]
    fn test_wire_shape() {
        let ns = ProposalNamespace::new(["eip155:1"], ["personal_sign"], ["chainChanged"]);
        let json = serde_json::to_value(&ns).unwrap();
        assert_eq!(json["chains"][0], "eip155:1");
        assert_eq!(json["methods"][0], "personal_sign");
        assert_eq!(json["events"][0], "chainChanged");
    }
}
