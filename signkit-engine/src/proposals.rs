//! Pending session proposals.
//!
//! The responder keeps inbound proposals until the app approves or rejects
//! them; the proposer keeps its own outbound proposal until the settlement
//! arrives. Both are keyed by the proposer's public key and lapse with the
//! relay TTL of the proposal.

use std::collections::HashMap;
use std::sync::Mutex;

use signkit_lib::{
    current_timestamp, PublicKey, Result, SignError, Topic, FIVE_MINUTES_IN_SECONDS,
};

use crate::interactor::WcRequest;
use crate::rpc::{RpcParams, SessionProposeParams};

/// A proposal request together with its decoded params.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingProposal {
    /// The `wc_sessionPropose` request, answered on approve or reject.
    pub request: WcRequest,
    pub params: SessionProposeParams,
}

impl PendingProposal {
    /// Wrap a `wc_sessionPropose` request; other methods are rejected.
    pub fn from_request(request: WcRequest) -> Result<Self> {
        match &request.params {
            RpcParams::SessionPropose(params) => Ok(Self {
                params: params.clone(),
                request,
            }),
            other => Err(SignError::Internal(format!(
                "{} is not a session proposal",
                other.method()
            ))),
        }
    }
}

/// Seconds a proposal stays answerable.
pub const PROPOSAL_TTL_SECONDS: u64 = FIVE_MINUTES_IN_SECONDS;

struct Entry {
    proposal: PendingProposal,
    expires_at: i64,
}

/// Keyed store of pending proposals.
pub struct ProposalStore {
    proposals: Mutex<HashMap<PublicKey, Entry>>,
}

fn lock_error() -> SignError {
    SignError::Internal("ProposalStore: lock poisoned".into())
}

impl ProposalStore {
    pub fn new() -> Self {
        Self {
            proposals: Mutex::new(HashMap::new()),
        }
    }

    /// Record a proposal, replacing any earlier one from the same proposer.
    pub fn insert(&self, proposer: PublicKey, proposal: PendingProposal) -> Result<()> {
        let expires_at = current_timestamp() + PROPOSAL_TTL_SECONDS as i64;
        self.proposals
            .lock()
            .map_err(|_| lock_error())?
            .insert(
                proposer,
                Entry {
                    proposal,
                    expires_at,
                },
            );
        Ok(())
    }

    /// Look up a proposal without consuming it.
    pub fn get(&self, proposer: &PublicKey) -> Result<PendingProposal> {
        self.proposals
            .lock()
            .map_err(|_| lock_error())?
            .get(proposer)
            .map(|entry| entry.proposal.clone())
            .ok_or_else(|| SignError::CannotFindSessionProposal(proposer.to_string()))
    }

    /// Consume a proposal. A second take of the same key fails.
    pub fn take(&self, proposer: &PublicKey) -> Result<PendingProposal> {
        self.proposals
            .lock()
            .map_err(|_| lock_error())?
            .remove(proposer)
            .map(|entry| entry.proposal)
            .ok_or_else(|| SignError::CannotFindSessionProposal(proposer.to_string()))
    }

    /// Drop a proposal if present.
    pub fn remove(&self, proposer: &PublicKey) -> Option<PendingProposal> {
        self.proposals
            .lock()
            .ok()?
            .remove(proposer)
            .map(|entry| entry.proposal)
    }

    /// Drop every proposal made on `pairing_topic`, returning the proposer keys.
    pub fn remove_for_pairing(&self, pairing_topic: &Topic) -> Vec<PublicKey> {
        self.drain_where(|entry| &entry.proposal.request.topic == pairing_topic)
    }

    /// Drop proposals lapsed at `now` (unix seconds), returning the proposer keys.
    pub fn prune_expired(&self, now: i64) -> Vec<PublicKey> {
        self.drain_where(|entry| entry.expires_at <= now)
    }

    fn drain_where(&self, lapsed: impl Fn(&Entry) -> bool) -> Vec<PublicKey> {
        let Ok(mut proposals) = self.proposals.lock() else {
            return Vec::new();
        };
        let keys: Vec<PublicKey> = proposals
            .iter()
            .filter(|(_, entry)| lapsed(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            proposals.remove(key);
        }
        keys
    }

    pub fn contains(&self, proposer: &PublicKey) -> bool {
        self.proposals
            .lock()
            .map(|p| p.contains_key(proposer))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.proposals.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProposalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::ProposalNamespaces;
    use crate::rpc::Participant;
    use signkit_lib::{AppMetaData, RelayProtocolOptions, Topic};

    fn proposal(key: &PublicKey) -> PendingProposal {
        proposal_on(key, Topic::generate())
    }

    fn proposal_on(key: &PublicKey, pairing_topic: Topic) -> PendingProposal {
        let params = SessionProposeParams {
            relays: vec![RelayProtocolOptions::default()],
            proposer: Participant {
                public_key: key.clone(),
                metadata: AppMetaData::default(),
            },
            required_namespaces: ProposalNamespaces::new(),
        };
        PendingProposal::from_request(WcRequest {
            topic: pairing_topic,
            id: 1,
            params: RpcParams::SessionPropose(params),
        })
        .unwrap()
    }

    #[test]
    fn test_take_consumes_once() {
        let store = ProposalStore::new();
        let key = PublicKey::from_bytes(&[3u8; 32]);
        store.insert(key.clone(), proposal(&key)).unwrap();

        assert!(store.get(&key).is_ok());
        assert!(store.take(&key).is_ok());
        assert!(matches!(
            store.take(&key),
            Err(SignError::CannotFindSessionProposal(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejects_non_proposal_requests() {
        let err = PendingProposal::from_request(WcRequest {
            topic: Topic::generate(),
            id: 1,
            params: RpcParams::SessionPing,
        })
        .unwrap_err();
        assert!(matches!(err, SignError::Internal(_)));
    }

    #[test]
    fn test_proposals_lapse_with_ttl() {
        let store = ProposalStore::new();
        let key = PublicKey::from_bytes(&[4u8; 32]);
        store.insert(key.clone(), proposal(&key)).unwrap();

        assert!(store.prune_expired(current_timestamp()).is_empty());
        let lapsed =
            store.prune_expired(current_timestamp() + PROPOSAL_TTL_SECONDS as i64 + 1);
        assert_eq!(lapsed, vec![key.clone()]);
        assert!(!store.contains(&key));
    }

    #[test]
    fn test_pairing_teardown_drops_its_proposals() {
        let store = ProposalStore::new();
        let pairing = Topic::generate();
        let (on_pairing, elsewhere) = (
            PublicKey::from_bytes(&[5u8; 32]),
            PublicKey::from_bytes(&[6u8; 32]),
        );
        store
            .insert(on_pairing.clone(), proposal_on(&on_pairing, pairing.clone()))
            .unwrap();
        store
            .insert(elsewhere.clone(), proposal(&elsewhere))
            .unwrap();

        assert_eq!(store.remove_for_pairing(&pairing), vec![on_pairing]);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&elsewhere));
    }
}
