//! Domain events multicast by the engine.

use serde_json::Value;
use signkit_lib::{AppMetaData, Expiry, PublicKey, RelayProtocolOptions, SignError, Topic};

use crate::namespace::{ProposalNamespaces, SessionNamespaces};
use crate::rpc::JsonRpcResponse;
use crate::sequence::Session;

/// A proposal received on a pairing, awaiting approve or reject.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionProposal {
    pub pairing_topic: Topic,
    pub request_id: u64,
    /// Key to pass to `approve`/`reject`.
    pub proposer_public_key: PublicKey,
    pub metadata: AppMetaData,
    pub namespaces: ProposalNamespaces,
    pub relays: Vec<RelayProtocolOptions>,
}

/// A session request from the peer, awaiting `respond_session_request`.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRequest {
    pub topic: Topic,
    pub request_id: u64,
    pub chain_id: String,
    pub method: String,
    pub params: String,
    pub peer_metadata: Option<AppMetaData>,
}

/// Outcome of a settlement this side sent.
#[derive(Clone, Debug, PartialEq)]
pub enum SettledSessionResponse {
    /// The peer accepted the settlement; the session is acknowledged.
    Result(Session),
    Error { topic: Topic, reason: String },
}

/// Outcome of a namespace update this side sent.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateNamespacesResponse {
    Result {
        topic: Topic,
        namespaces: SessionNamespaces,
    },
    Error { topic: Topic, reason: String },
}

/// Event published to every engine subscriber.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    ConnectionState {
        is_available: bool,
    },
    SessionProposal(SessionProposal),
    /// The proposer accepted a settlement.
    SessionApproved(Session),
    /// The responder rejected a proposal.
    SessionRejected {
        topic: Topic,
        reason: String,
    },
    SessionDeleted {
        topic: Topic,
        reason: String,
    },
    SessionRequest(SessionRequest),
    /// The peer answered a session request.
    SessionRequestResponse {
        topic: Topic,
        chain_id: String,
        method: String,
        response: JsonRpcResponse,
    },
    SessionEvent {
        topic: Topic,
        chain_id: String,
        name: String,
        data: Value,
    },
    /// The peer updated the namespaces of a session it controls.
    SessionUpdateNamespaces {
        topic: Topic,
        namespaces: SessionNamespaces,
    },
    SessionUpdateNamespacesResponse(UpdateNamespacesResponse),
    SettledSessionResponse(SettledSessionResponse),
    SessionExtended {
        topic: Topic,
        expiry: Expiry,
    },
    DeletedPairing {
        topic: Topic,
        reason: String,
    },
    /// A failure with no caller to return it to.
    SdkError(SignError),
}

impl EngineEvent {
    /// Topic the event concerns, when it has one.
    pub fn topic(&self) -> Option<&Topic> {
        match self {
            Self::SessionProposal(p) => Some(&p.pairing_topic),
            Self::SessionApproved(s) => Some(&s.topic),
            Self::SessionRejected { topic, .. }
            | Self::SessionDeleted { topic, .. }
            | Self::SessionRequestResponse { topic, .. }
            | Self::SessionEvent { topic, .. }
            | Self::SessionUpdateNamespaces { topic, .. }
            | Self::SessionExtended { topic, .. }
            | Self::DeletedPairing { topic, .. } => Some(topic),
            Self::SessionRequest(r) => Some(&r.topic),
            Self::SessionUpdateNamespacesResponse(UpdateNamespacesResponse::Result {
                topic, ..
            })
            | Self::SessionUpdateNamespacesResponse(UpdateNamespacesResponse::Error {
                topic, ..
            }) => Some(topic),
            Self::SettledSessionResponse(SettledSessionResponse::Result(s)) => Some(&s.topic),
            Self::SettledSessionResponse(SettledSessionResponse::Error { topic, .. }) => {
                Some(topic)
            }
            Self::ConnectionState { .. } | Self::SdkError(_) => None,
        }
    }
}
