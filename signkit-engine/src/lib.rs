//! SignKit engine.
//!
//! Pairing and session protocol between a dapp and a wallet that talk only
//! through an untrusted publish/subscribe relay. Every message is sealed with
//! a key known to the two peers of its topic.
//!
//! A session is negotiated in three steps:
//!
//! 1. The proposer creates a pairing (shared as a `wc:` URI) and sends a
//!    `wc_sessionPropose` carrying its public key and required namespaces.
//! 2. The responder approves with a narrowed set of namespaces: both sides
//!    derive the session topic by X25519 key agreement, and the responder
//!    sends `wc_sessionSettle`, becoming the session's controller.
//! 3. The proposer acknowledges the settlement and the session is live.
//!
//! From there either side may send session requests, while only the
//! controller may update namespaces, extend the expiry or emit events.
//!
//! The engine is handed its collaborators already constructed: a
//! [`KeyManagement`](signkit_lib::crypto::KeyManagement) key directory, a
//! [`SequenceStorage`] repository and a
//! [`RelayTransport`](signkit_lib::RelayTransport).

pub mod config;
pub mod engine;
pub mod events;
pub mod expiration;
pub mod interactor;
pub mod namespace;
pub mod proposals;
pub mod rpc;
pub mod sequence;
pub mod storage;
pub mod validator;

pub use config::EngineConfig;
pub use engine::{EngineTasks, SignEngine};
pub use events::{
    EngineEvent, SessionProposal, SessionRequest, SettledSessionResponse, UpdateNamespacesResponse,
};
pub use expiration::{ExpirationSupervisor, SweepReport};
pub use namespace::{ProposalNamespace, ProposalNamespaces, SessionNamespace, SessionNamespaces};
pub use rpc::{
    EventParams, JsonRpcResponse, PeerError, SessionEventPayload, SessionRequestParams,
    SessionRequestPayload,
};
pub use sequence::{Pairing, ProposedSequence, Session};
pub use storage::{InMemorySequenceStore, SequenceStorage, StorageError, StorageResult};
pub use validator::ValidationError;

pub use signkit_lib::{Result, SignError};
