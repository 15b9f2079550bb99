//! Relay transport contract and per-message relay parameters.

mod traits;

pub use traits::{RelayMessage, RelayTransport};

use serde::{Deserialize, Serialize};

/// Routing tag attached to every published message.
///
/// The relay uses the tag to decide push delivery; request tags and their
/// response tags are always consecutive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Tag {
    PairingDelete = 1000,
    PairingDeleteResponse = 1001,
    PairingPing = 1002,
    PairingPingResponse = 1003,
    SessionPropose = 1100,
    SessionProposeResponse = 1101,
    SessionSettle = 1102,
    SessionSettleResponse = 1103,
    SessionUpdate = 1104,
    SessionUpdateResponse = 1105,
    SessionExtend = 1106,
    SessionExtendResponse = 1107,
    SessionRequest = 1108,
    SessionRequestResponse = 1109,
    SessionEvent = 1110,
    SessionEventResponse = 1111,
    SessionDelete = 1112,
    SessionDeleteResponse = 1113,
    SessionPing = 1114,
    SessionPingResponse = 1115,
}

impl Tag {
    /// Numeric tag value sent to the relay.
    pub fn code(&self) -> u32 {
        *self as u32
    }
}

/// Relay time-to-live in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ttl(pub u64);

impl Ttl {
    /// Ttl as a duration.
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.0)
    }
}

/// Per-message relay quality-of-service parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrnParams {
    /// Routing tag.
    pub tag: Tag,
    /// How long the relay keeps the message.
    pub ttl: Ttl,
    /// Whether the relay should prompt the receiving user (push).
    pub prompt: bool,
}

impl IrnParams {
    /// Parameters without the prompt flag.
    pub fn new(tag: Tag, ttl: Ttl) -> Self {
        Self {
            tag,
            ttl,
            prompt: false,
        }
    }

    /// Parameters with the prompt flag set.
    pub fn prompted(tag: Tag, ttl: Ttl) -> Self {
        Self {
            tag,
            ttl,
            prompt: true,
        }
    }
}
