//! Pairing and session records.

use serde::{Deserialize, Serialize};
use signkit_lib::{
    AppMetaData, Expiry, PairingUri, PublicKey, RelayProtocolOptions, Topic,
    FIVE_MINUTES_IN_SECONDS, MONTH_IN_SECONDS, WEEK_IN_SECONDS,
};

use crate::namespace::{ProposalNamespaces, SessionNamespaces};
use crate::rpc::{Participant, SessionProposeParams, SessionSettleParams};

/// Provisional channel used to negotiate sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub topic: Topic,
    pub relay: RelayProtocolOptions,
    /// Pairing URI shared out of band.
    pub uri: String,
    /// Whether the peer has answered on this pairing yet.
    pub is_active: bool,
    pub expiry: Expiry,
    pub peer_metadata: Option<AppMetaData>,
}

impl Pairing {
    /// Pairing created by the proposer; lives for one proposal round-trip.
    pub fn inactive(uri: &PairingUri) -> Self {
        Self {
            topic: uri.topic.clone(),
            relay: uri.relay.clone(),
            uri: uri.to_absolute_string(),
            is_active: false,
            expiry: Expiry::in_seconds(FIVE_MINUTES_IN_SECONDS),
            peer_metadata: None,
        }
    }

    /// Pairing joined by the responder from a scanned URI.
    pub fn active(uri: &PairingUri) -> Self {
        Self {
            is_active: true,
            expiry: Expiry::in_seconds(MONTH_IN_SECONDS),
            ..Self::inactive(uri)
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiry.is_expired_at(now)
    }
}

/// Established channel with negotiated namespaces and a controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub topic: Topic,
    pub self_participant: Participant,
    pub peer_participant: Option<Participant>,
    /// Public key of the participant allowed to update, extend and emit.
    pub controller_key: PublicKey,
    pub namespaces: SessionNamespaces,
    /// Namespaces of the proposal this session settled; bounds every update.
    pub proposal_namespaces: ProposalNamespaces,
    /// Id of the request that last set `namespaces`.
    pub namespaces_request_id: u64,
    pub relay: RelayProtocolOptions,
    pub is_acknowledged: bool,
    pub expiry: Expiry,
}

impl Session {
    /// Session built by the responder when approving; the responder controls it.
    pub fn unacknowledged(
        topic: Topic,
        proposal: &SessionProposeParams,
        proposal_request_id: u64,
        self_participant: Participant,
        namespaces: SessionNamespaces,
        relay: RelayProtocolOptions,
    ) -> Self {
        Self {
            topic,
            controller_key: self_participant.public_key.clone(),
            self_participant,
            peer_participant: Some(proposal.proposer.clone()),
            namespaces,
            proposal_namespaces: proposal.required_namespaces.clone(),
            namespaces_request_id: proposal_request_id,
            relay,
            is_acknowledged: false,
            expiry: Expiry::in_seconds(WEEK_IN_SECONDS),
        }
    }

    /// Session accepted by the proposer from the peer's settlement; the peer controls it.
    pub fn acknowledged(
        topic: Topic,
        settle: &SessionSettleParams,
        settle_request_id: u64,
        self_participant: Participant,
        proposal_namespaces: ProposalNamespaces,
    ) -> Self {
        Self {
            topic,
            self_participant,
            peer_participant: Some(settle.controller.clone()),
            controller_key: settle.controller.public_key.clone(),
            namespaces: settle.namespaces.clone(),
            proposal_namespaces,
            namespaces_request_id: settle_request_id,
            relay: settle.relay.clone(),
            is_acknowledged: true,
            expiry: Expiry(settle.expiry),
        }
    }

    pub fn is_self_controller(&self) -> bool {
        self.controller_key == self.self_participant.public_key
    }

    pub fn is_peer_controller(&self) -> bool {
        self.peer_participant
            .as_ref()
            .map(|peer| peer.public_key == self.controller_key)
            .unwrap_or(false)
    }

    pub fn peer_metadata(&self) -> Option<&AppMetaData> {
        self.peer_participant.as_ref().map(|p| &p.metadata)
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiry.is_expired_at(now)
    }
}

/// Outcome of proposing a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProposedSequence {
    /// A new pairing was created; share the URI with the peer.
    Pairing { uri: String },
    /// The proposal went out on an existing pairing.
    Session,
}

#[cfg(test)]
mod tests {
    use super::*;
    use signkit_lib::{current_timestamp, SymmetricKey, DAY_IN_SECONDS};

    fn participant(byte: u8) -> Participant {
        Participant {
            public_key: PublicKey::from_bytes(&[byte; 32]),
            metadata: AppMetaData::new(format!("p{}", byte), "https://p.example"),
        }
    }

    fn uri() -> PairingUri {
        PairingUri::new(
            Topic::generate(),
            SymmetricKey::generate(),
            RelayProtocolOptions::default(),
        )
    }

    #[test]
    fn test_pairing_lifetimes() {
        let uri = uri();
        let now = current_timestamp();

        let inactive = Pairing::inactive(&uri);
        assert!(!inactive.is_active);
        assert!(inactive.expiry.seconds() <= now + FIVE_MINUTES_IN_SECONDS as i64 + 1);
        assert!(inactive.is_expired_at(now + FIVE_MINUTES_IN_SECONDS as i64 + 2));

        let active = Pairing::active(&uri);
        assert!(active.is_active);
        assert!(active.expiry.seconds() >= now + 29 * DAY_IN_SECONDS as i64);
        assert_eq!(active.topic, inactive.topic);
        assert_eq!(active.uri, uri.to_absolute_string());
    }

    #[test]
    fn test_controller_roles() {
        let proposer = participant(1);
        let responder = participant(2);
        let proposal = SessionProposeParams {
            relays: vec![RelayProtocolOptions::default()],
            proposer: proposer.clone(),
            required_namespaces: ProposalNamespaces::new(),
        };

        let wallet_side = Session::unacknowledged(
            Topic::generate(),
            &proposal,
            1,
            responder.clone(),
            SessionNamespaces::new(),
            RelayProtocolOptions::default(),
        );
        assert!(wallet_side.is_self_controller());
        assert!(!wallet_side.is_peer_controller());
        assert!(!wallet_side.is_acknowledged);

        let settle = SessionSettleParams {
            relay: RelayProtocolOptions::default(),
            controller: responder,
            namespaces: SessionNamespaces::new(),
            expiry: wallet_side.expiry.seconds(),
        };
        let dapp_side = Session::acknowledged(
            wallet_side.topic.clone(),
            &settle,
            2,
            proposer,
            ProposalNamespaces::new(),
        );
        assert!(dapp_side.is_peer_controller());
        assert!(!dapp_side.is_self_controller());
        assert!(dapp_side.is_acknowledged);
        assert_eq!(dapp_side.expiry, wallet_side.expiry);
    }
}
