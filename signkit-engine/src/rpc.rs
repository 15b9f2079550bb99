//! JSON-RPC model of the pairing/session protocol.
//!
//! Requests travel as `{"id","jsonrpc":"2.0","method","params"}` and are
//! answered with either `{"id","jsonrpc","result"}` or
//! `{"id","jsonrpc","error":{"code","message"}}`. Params are decoded into the
//! typed [`RpcParams`] by method name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use signkit_lib::{
    generate_id, AppMetaData, IrnParams, PublicKey, RelayProtocolOptions, Result, SignError, Tag,
    Ttl, DAY_IN_SECONDS, FIVE_MINUTES_IN_SECONDS, THIRTY_SECONDS,
};

use crate::namespace::{ProposalNamespaces, SessionNamespaces};

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names of the protocol.
pub mod method {
    pub const SESSION_PROPOSE: &str = "wc_sessionPropose";
    pub const SESSION_SETTLE: &str = "wc_sessionSettle";
    pub const SESSION_REQUEST: &str = "wc_sessionRequest";
    pub const SESSION_DELETE: &str = "wc_sessionDelete";
    pub const PAIRING_DELETE: &str = "wc_pairingDelete";
    pub const SESSION_EVENT: &str = "wc_sessionEvent";
    pub const SESSION_UPDATE: &str = "wc_sessionUpdate";
    pub const SESSION_EXTEND: &str = "wc_sessionExtend";
    pub const SESSION_PING: &str = "wc_sessionPing";
    pub const PAIRING_PING: &str = "wc_pairingPing";
}

/// Relay parameters for answering a request by method name. Methods outside
/// the protocol are answered like a session request.
pub fn response_irn_params(method: &str) -> IrnParams {
    let five_minutes = Ttl(FIVE_MINUTES_IN_SECONDS);
    let day = Ttl(DAY_IN_SECONDS);
    let thirty_seconds = Ttl(THIRTY_SECONDS);
    match method {
        method::SESSION_PROPOSE => IrnParams::new(Tag::SessionProposeResponse, five_minutes),
        method::SESSION_SETTLE => IrnParams::new(Tag::SessionSettleResponse, five_minutes),
        method::SESSION_DELETE => IrnParams::new(Tag::SessionDeleteResponse, day),
        method::PAIRING_DELETE => IrnParams::new(Tag::PairingDeleteResponse, day),
        method::SESSION_EVENT => IrnParams::new(Tag::SessionEventResponse, five_minutes),
        method::SESSION_UPDATE => IrnParams::new(Tag::SessionUpdateResponse, day),
        method::SESSION_EXTEND => IrnParams::new(Tag::SessionExtendResponse, day),
        method::SESSION_PING => IrnParams::new(Tag::SessionPingResponse, thirty_seconds),
        method::PAIRING_PING => IrnParams::new(Tag::PairingPingResponse, thirty_seconds),
        _ => IrnParams::new(Tag::SessionRequestResponse, five_minutes),
    }
}

/// An outbound or inbound JSON-RPC request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    /// Build a request with a fresh id.
    pub fn new(params: &RpcParams) -> Result<Self> {
        Self::with_id(generate_id(), params)
    }

    /// Build a request with a given id.
    pub fn with_id(id: u64, params: &RpcParams) -> Result<Self> {
        Ok(Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: params.method().to_string(),
            params: params.to_value()?,
        })
    }

    /// Decode the params by method name.
    pub fn decode_params(&self) -> Result<RpcParams> {
        RpcParams::decode(&self.method, self.params.clone())
    }
}

/// Error object of a JSON-RPC error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

/// Successful JSON-RPC response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResult {
    pub id: u64,
    pub jsonrpc: String,
    pub result: Value,
}

/// Failed JSON-RPC response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub id: u64,
    pub jsonrpc: String,
    pub error: ErrorObject,
}

/// A JSON-RPC response, told apart by the presence of `error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponse {
    Error(JsonRpcError),
    Result(JsonRpcResult),
}

impl JsonRpcResponse {
    /// Successful response carrying `result`.
    pub fn success(id: u64, result: Value) -> Self {
        Self::Result(JsonRpcResult {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
        })
    }

    /// Error response carrying a peer error.
    pub fn error(id: u64, error: PeerError) -> Self {
        Self::Error(JsonRpcError {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorObject {
                code: error.code,
                message: error.message,
            },
        })
    }

    /// Id of the request this response answers.
    pub fn id(&self) -> u64 {
        match self {
            Self::Error(e) => e.id,
            Self::Result(r) => r.id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Error message, if this is an error response.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(e) => Some(&e.error.message),
            Self::Result(_) => None,
        }
    }

    /// Convert into the caller-facing result of an outbound request.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Self::Result(r) => Ok(r.result),
            Self::Error(e) => Err(SignError::PeerRejected {
                code: e.error.code,
                message: e.error.message,
            }),
        }
    }
}

/// A party of a proposal or settlement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub public_key: PublicKey,
    pub metadata: AppMetaData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeParams {
    pub relays: Vec<RelayProtocolOptions>,
    pub proposer: Participant,
    pub required_namespaces: ProposalNamespaces,
}

/// Result of a successful `wc_sessionPropose`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalParams {
    pub relay: RelayProtocolOptions,
    pub responder_public_key: PublicKey,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettleParams {
    pub relay: RelayProtocolOptions,
    pub controller: Participant,
    pub namespaces: SessionNamespaces,
    pub expiry: i64,
}

/// The app-level call carried by `wc_sessionRequest`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequestPayload {
    pub method: String,
    /// Method params, JSON encoded by the app.
    pub params: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    pub request: SessionRequestPayload,
    pub chain_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEventPayload {
    pub name: String,
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParams {
    pub event: SessionEventPayload,
    pub chain_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateNamespacesParams {
    pub namespaces: SessionNamespaces,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendParams {
    pub expiry: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteParams {
    pub code: i64,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingParams {}

/// Typed params of every protocol method.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcParams {
    SessionPropose(SessionProposeParams),
    SessionSettle(SessionSettleParams),
    SessionRequest(SessionRequestParams),
    SessionDelete(DeleteParams),
    PairingDelete(DeleteParams),
    SessionEvent(EventParams),
    SessionUpdate(UpdateNamespacesParams),
    SessionExtend(ExtendParams),
    SessionPing,
    PairingPing,
}

impl RpcParams {
    /// Method name these params travel under.
    pub fn method(&self) -> &'static str {
        match self {
            Self::SessionPropose(_) => method::SESSION_PROPOSE,
            Self::SessionSettle(_) => method::SESSION_SETTLE,
            Self::SessionRequest(_) => method::SESSION_REQUEST,
            Self::SessionDelete(_) => method::SESSION_DELETE,
            Self::PairingDelete(_) => method::PAIRING_DELETE,
            Self::SessionEvent(_) => method::SESSION_EVENT,
            Self::SessionUpdate(_) => method::SESSION_UPDATE,
            Self::SessionExtend(_) => method::SESSION_EXTEND,
            Self::SessionPing => method::SESSION_PING,
            Self::PairingPing => method::PAIRING_PING,
        }
    }

    /// Relay parameters for publishing the request.
    pub fn irn_params(&self) -> IrnParams {
        let five_minutes = Ttl(FIVE_MINUTES_IN_SECONDS);
        let day = Ttl(DAY_IN_SECONDS);
        let thirty_seconds = Ttl(THIRTY_SECONDS);
        match self {
            Self::SessionPropose(_) => IrnParams::prompted(Tag::SessionPropose, five_minutes),
            Self::SessionSettle(_) => IrnParams::new(Tag::SessionSettle, five_minutes),
            Self::SessionRequest(_) => IrnParams::prompted(Tag::SessionRequest, five_minutes),
            Self::SessionDelete(_) => IrnParams::new(Tag::SessionDelete, day),
            Self::PairingDelete(_) => IrnParams::new(Tag::PairingDelete, day),
            Self::SessionEvent(_) => IrnParams::prompted(Tag::SessionEvent, five_minutes),
            Self::SessionUpdate(_) => IrnParams::new(Tag::SessionUpdate, day),
            Self::SessionExtend(_) => IrnParams::new(Tag::SessionExtend, day),
            Self::SessionPing => IrnParams::new(Tag::SessionPing, thirty_seconds),
            Self::PairingPing => IrnParams::new(Tag::PairingPing, thirty_seconds),
        }
    }

    /// Relay parameters for publishing the response to this request.
    pub fn response_irn_params(&self) -> IrnParams {
        response_irn_params(self.method())
    }

    /// Encode the params as a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::SessionPropose(p) => serde_json::to_value(p)?,
            Self::SessionSettle(p) => serde_json::to_value(p)?,
            Self::SessionRequest(p) => serde_json::to_value(p)?,
            Self::SessionDelete(p) | Self::PairingDelete(p) => serde_json::to_value(p)?,
            Self::SessionEvent(p) => serde_json::to_value(p)?,
            Self::SessionUpdate(p) => serde_json::to_value(p)?,
            Self::SessionExtend(p) => serde_json::to_value(p)?,
            Self::SessionPing | Self::PairingPing => serde_json::to_value(PingParams::default())?,
        };
        Ok(value)
    }

    /// Decode params of `method`.
    ///
    /// # Errors
    ///
    /// `SignError::Serialization` for unknown methods or params that do not
    /// match the method's shape.
    pub fn decode(method: &str, params: Value) -> Result<Self> {
        let decoded = match method {
            method::SESSION_PROPOSE => Self::SessionPropose(serde_json::from_value(params)?),
            method::SESSION_SETTLE => Self::SessionSettle(serde_json::from_value(params)?),
            method::SESSION_REQUEST => Self::SessionRequest(serde_json::from_value(params)?),
            method::SESSION_DELETE => Self::SessionDelete(serde_json::from_value(params)?),
            method::PAIRING_DELETE => Self::PairingDelete(serde_json::from_value(params)?),
            method::SESSION_EVENT => Self::SessionEvent(serde_json::from_value(params)?),
            method::SESSION_UPDATE => Self::SessionUpdate(serde_json::from_value(params)?),
            method::SESSION_EXTEND => Self::SessionExtend(serde_json::from_value(params)?),
            method::SESSION_PING => Self::SessionPing,
            method::PAIRING_PING => Self::PairingPing,
            other => {
                return Err(SignError::Serialization(format!(
                    "unsupported method {}",
                    other
                )))
            }
        };
        Ok(decoded)
    }
}

/// Sequence kind named in peer error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sequence {
    Pairing,
    Session,
}

impl Sequence {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pairing => "PAIRING",
            Self::Session => "SESSION",
        }
    }
}

/// Structured error sent to the peer in an error response.
///
/// Codes follow the protocol's shared table so both sides agree on the
/// meaning without parsing messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerError {
    pub code: i64,
    pub message: String,
}

impl PeerError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    // Invalid (1xxx)

    pub fn invalid_method(msg: &str) -> Self {
        Self::new(1001, format!("Invalid method: {}", msg))
    }

    pub fn invalid_event(msg: &str) -> Self {
        Self::new(1002, format!("Invalid event: {}", msg))
    }

    pub fn invalid_update_request(msg: &str) -> Self {
        Self::new(1003, format!("Invalid update request: {}", msg))
    }

    pub fn invalid_extend_request(msg: &str) -> Self {
        Self::new(1004, format!("Invalid extend request: {}", msg))
    }

    pub fn no_matching_topic(sequence: Sequence, topic: &str) -> Self {
        Self::new(
            1301,
            format!("No matching {} with topic: {}", sequence.name(), topic),
        )
    }

    // Unauthorized (3xxx)

    pub fn unauthorized_method(msg: &str) -> Self {
        Self::new(3001, format!("Unauthorized method: {}", msg))
    }

    pub fn unauthorized_event(msg: &str) -> Self {
        Self::new(3002, format!("Unauthorized event: {}", msg))
    }

    pub fn unauthorized_update_request(sequence: Sequence) -> Self {
        Self::new(
            3003,
            format!("Unauthorized update request: {}", sequence.name()),
        )
    }

    pub fn unauthorized_extend_request(sequence: Sequence) -> Self {
        Self::new(
            3004,
            format!("Unauthorized extend request: {}", sequence.name()),
        )
    }

    /// An event from a peer that does not control the session.
    pub fn unauthorized_peer_event(sequence: Sequence) -> Self {
        Self::new(3002, format!("Unauthorized event: {}", sequence.name()))
    }

    // Rejected (4xxx/5xxx)

    pub fn user_rejected(reason: &str) -> Self {
        if reason.is_empty() {
            Self::new(5000, "User rejected")
        } else {
            Self::new(5000, format!("User rejected: {}", reason))
        }
    }

    pub fn unsupported_chains(msg: &str) -> Self {
        Self::new(5100, format!("Unsupported chains: {}", msg))
    }

    pub fn unsupported_methods(msg: &str) -> Self {
        Self::new(5101, format!("Unsupported methods: {}", msg))
    }

    pub fn unsupported_events(msg: &str) -> Self {
        Self::new(5102, format!("Unsupported events: {}", msg))
    }

    pub fn unsupported_accounts(msg: &str) -> Self {
        Self::new(5103, format!("Unsupported accounts: {}", msg))
    }

    pub fn unsupported_namespace_key(msg: &str) -> Self {
        Self::new(5104, format!("Unsupported namespace key: {}", msg))
    }

    // Reason (6xxx) and failure (7xxx)

    pub fn user_disconnected() -> Self {
        Self::new(6000, "User disconnected")
    }

    pub fn session_settlement_failed(msg: &str) -> Self {
        Self::new(7000, format!("Session settlement failed: {}", msg))
    }
}

impl From<PeerError> for DeleteParams {
    fn from(err: PeerError) -> Self {
        Self {
            code: err.code,
            message: err.message,
        }
    }
}
