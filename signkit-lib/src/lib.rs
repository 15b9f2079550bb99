//! SignKit library.
//!
//! Shared building blocks for the SignKit pairing/session protocol engine.
//! The crate holds no protocol state: it defines the value types both peers
//! agree on and the collaborator contracts (key directory, relay transport)
//! that the engine receives already constructed.
//!
//! # Features
//!
//! - **Value types**: [`Topic`], [`PublicKey`], [`SymmetricKey`], [`Expiry`]
//! - **Pairing URIs**: encode and parse `wc:` pairing links
//! - **Key directory**: X25519 key agreement with sealed relay envelopes
//! - **Transport abstraction**: trait-based relay publish/subscribe contract
//!
//! # Example
//!
//! ```
//! use signkit_lib::{Topic, crypto::{InMemoryKeyManagement, KeyManagement}};
//!
//! let keys = InMemoryKeyManagement::new();
//! let topic = Topic::generate();
//! keys.generate_and_store_symmetric_key(&topic).unwrap();
//!
//! let sealed = keys.encrypt(&topic, b"hello").unwrap();
//! assert_eq!(keys.decrypt(&topic, &sealed).unwrap(), b"hello");
//! ```

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod crypto;
pub mod errors;
pub mod prelude;
mod transport;
pub mod uri;

/// Test utilities for protocol testing.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use errors::{SignError, SignErrorCode};
pub use transport::{IrnParams, RelayMessage, RelayTransport, Tag, Ttl};
pub use uri::PairingUri;

/// Common result alias for SignKit operations.
pub type Result<T> = std::result::Result<T, SignError>;

/// Thirty seconds, the relay ttl of pings.
pub const THIRTY_SECONDS: u64 = 30;
/// Five minutes, the relay ttl of proposals, settlements and requests.
pub const FIVE_MINUTES_IN_SECONDS: u64 = 5 * 60;
/// One day, the relay ttl of updates, extends and deletes.
pub const DAY_IN_SECONDS: u64 = 24 * 60 * 60;
/// One week, the lifetime of a fresh session and the maximum extension.
pub const WEEK_IN_SECONDS: u64 = 7 * DAY_IN_SECONDS;
/// Thirty days, the lifetime of an active pairing.
pub const MONTH_IN_SECONDS: u64 = 30 * DAY_IN_SECONDS;

/// Identifier of a relay channel.
///
/// Either 32 random bytes or the SHA-256 of a derived symmetric key, always
/// hex encoded.
///
/// # Example
///
/// ```
/// use signkit_lib::Topic;
///
/// let topic = Topic::generate();
/// assert_eq!(topic.as_str().len(), 64);
/// assert!(topic.is_well_formed());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Wrap an existing topic string.
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Generate a topic from 32 random bytes.
    pub fn generate() -> Self {
        Self(hex::encode(random_bytes::<32>()))
    }

    /// Get the topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the topic is 64 lowercase hex characters.
    pub fn is_well_formed(&self) -> bool {
        is_hex_32(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex-encoded X25519 public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(String);

impl PublicKey {
    /// Wrap a hex-encoded public key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build from raw key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Get the key as a hex string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the key into raw bytes.
    pub fn to_bytes(&self) -> Result<[u8; 32]> {
        decode_hex_32(&self.0).ok_or_else(|| {
            SignError::Crypto(format!("public key is not 32 hex-encoded bytes: {}", self.0))
        })
    }
}

impl From<&str> for PublicKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 32-byte symmetric key sealing all traffic on one topic.
///
/// The key is wiped from memory on drop and redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        Self(random_bytes::<32>())
    }

    /// Parse a hex-encoded key.
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex_32(s)
            .map(Self)
            .ok_or_else(|| SignError::Crypto("symmetric key is not 32 hex-encoded bytes".into()))
    }

    /// Hex encoding of the key, as carried in pairing URIs.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Absolute expiry of a sequence, in unix seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expiry(pub i64);

impl Expiry {
    /// Expiry `seconds` from now.
    pub fn in_seconds(seconds: u64) -> Self {
        Self(current_timestamp() + seconds as i64)
    }

    /// Unix seconds of the expiry.
    pub fn seconds(&self) -> i64 {
        self.0
    }

    /// A sequence is expired strictly after its expiry instant.
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.0
    }

    /// Whether the sequence is still valid at the current time.
    pub fn is_valid(&self) -> bool {
        !self.is_expired_at(current_timestamp())
    }

    /// Move the expiry forward by `seconds`.
    pub fn extended_by(&self, seconds: u64) -> Self {
        Self(self.0 + seconds as i64)
    }
}

/// Descriptive metadata a participant shares with its peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetaData {
    /// Display name.
    pub name: String,
    /// Short description.
    pub description: String,
    /// Home page.
    pub url: String,
    /// Icon URLs.
    #[serde(default)]
    pub icons: Vec<String>,
    /// Deep link back into the app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl AppMetaData {
    /// Create metadata with a name and url.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an icon.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icons.push(icon.into());
        self
    }
}

/// Relay protocol descriptor negotiated for a sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProtocolOptions {
    /// Relay protocol name.
    pub protocol: String,
    /// Protocol specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl RelayProtocolOptions {
    /// Default relay protocol name.
    pub const IRN: &'static str = "irn";

    /// Create options for a protocol.
    pub fn new(protocol: impl Into<String>, data: Option<String>) -> Self {
        Self {
            protocol: protocol.into(),
            data,
        }
    }
}

impl Default for RelayProtocolOptions {
    fn default() -> Self {
        Self::new(Self::IRN, None)
    }
}

static LAST_REQUEST_ID: AtomicU64 = AtomicU64::new(0);

/// Generate a JSON-RPC request id.
///
/// Ids are `unix_millis * 1000 + entropy`, so [`extract_timestamp`] recovers
/// the creation time. Ids are strictly increasing within a process, which
/// lets staleness checks compare them directly.
pub fn generate_id() -> u64 {
    let entropy = (rand::thread_rng().next_u32() % 1000) as u64;
    let candidate = current_timestamp_millis() * 1000 + entropy;

    let mut last = LAST_REQUEST_ID.load(Ordering::Relaxed);
    loop {
        let next = candidate.max(last + 1);
        match LAST_REQUEST_ID.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Millisecond timestamp encoded in a request id.
pub fn extract_timestamp(id: u64) -> u64 {
    id / 1000
}

/// Current unix time in seconds.
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current unix time in milliseconds.
pub fn current_timestamp_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Fill an array with OS randomness.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

fn is_hex_32(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn decode_hex_32(s: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_topics_are_unique_and_well_formed() {
        let a = Topic::generate();
        let b = Topic::generate();
        assert_ne!(a, b);
        assert!(a.is_well_formed());
        assert!(!Topic::from("t1").is_well_formed());
    }

    #[test]
    fn request_ids_are_strictly_increasing() {
        let mut previous = generate_id();
        for _ in 0..1000 {
            let next = generate_id();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn request_id_carries_its_timestamp() {
        let before = current_timestamp_millis();
        let id = generate_id();
        let after = current_timestamp_millis();
        let ts = extract_timestamp(id);
        // Monotonic bumping may push the id a few ms ahead under contention.
        assert!(ts >= before && ts <= after + 1000);
    }

    #[test]
    fn expiry_is_strict() {
        let expiry = Expiry(100);
        assert!(!expiry.is_expired_at(100));
        assert!(expiry.is_expired_at(101));
        assert_eq!(expiry.extended_by(5), Expiry(105));
    }

    #[test]
    fn symmetric_key_hex_round_trip_and_redacted_debug() {
        let key = SymmetricKey::generate();
        let parsed = SymmetricKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);
        assert_eq!(format!("{:?}", key), "SymmetricKey(<redacted>)");
        assert!(SymmetricKey::from_hex("abcd").is_err());
    }

    #[test]
    fn public_key_rejects_bad_hex() {
        assert!(PublicKey::from("zz").to_bytes().is_err());
        let pk = PublicKey::from_bytes(&[7u8; 32]);
        assert_eq!(pk.to_bytes().unwrap(), [7u8; 32]);
    }
}
