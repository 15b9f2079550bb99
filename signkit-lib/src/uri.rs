//! Pairing URI codec.
//!
//! A pairing URI carries everything a wallet needs to join the proposer's
//! pairing topic:
//!
//! ```text
//! wc:{topic}@2?relay-protocol={protocol}&symKey={hex}[&relay-data={data}]
//! ```
//!
//! # Examples
//!
//! ```rust
//! use signkit_lib::{PairingUri, RelayProtocolOptions, SymmetricKey, Topic};
//!
//! let uri = PairingUri::new(
//!     Topic::generate(),
//!     SymmetricKey::generate(),
//!     RelayProtocolOptions::default(),
//! );
//! let parsed = PairingUri::parse(&uri.to_absolute_string()).unwrap();
//! assert_eq!(parsed, uri);
//! ```

use std::fmt;
use std::str::FromStr;

use crate::{RelayProtocolOptions, Result, SignError, SymmetricKey, Topic};

/// URI scheme of pairing links.
pub const SCHEME: &str = "wc";

/// Protocol version carried in pairing links.
pub const VERSION: &str = "2";

/// A parsed pairing URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairingUri {
    /// Pairing topic.
    pub topic: Topic,
    /// Symmetric key sealing the pairing topic.
    pub sym_key: SymmetricKey,
    /// Relay the pairing is reachable on.
    pub relay: RelayProtocolOptions,
}

impl PairingUri {
    /// Assemble a pairing URI.
    pub fn new(topic: Topic, sym_key: SymmetricKey, relay: RelayProtocolOptions) -> Self {
        Self {
            topic,
            sym_key,
            relay,
        }
    }

    /// Parse a pairing URI string.
    ///
    /// # Errors
    ///
    /// Returns [`SignError::MalformedPairingUri`] if the scheme, version,
    /// topic, key or relay protocol is missing or invalid.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();

        let rest = uri
            .strip_prefix(SCHEME)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| malformed(format!("expected `{}:` scheme", SCHEME)))?;

        let (path, query) = rest
            .split_once('?')
            .ok_or_else(|| malformed("missing query"))?;

        let (topic, version) = path
            .split_once('@')
            .ok_or_else(|| malformed("missing protocol version"))?;
        if version != VERSION {
            return Err(malformed(format!("unsupported version {}", version)));
        }

        let topic = Topic::from(topic);
        if !topic.is_well_formed() {
            return Err(malformed(format!("invalid topic {}", topic)));
        }

        let mut protocol = None;
        let mut data = None;
        let mut sym_key = None;

        for param in query.split('&') {
            if let Some((key, value)) = param.split_once('=') {
                match key {
                    "relay-protocol" => protocol = Some(url_decode(value)?),
                    "relay-data" => data = Some(url_decode(value)?),
                    "symKey" => {
                        sym_key = Some(
                            SymmetricKey::from_hex(value)
                                .map_err(|_| malformed("symKey is not 32 hex-encoded bytes"))?,
                        )
                    }
                    _ => {
                        // Unknown parameters are ignored
                    }
                }
            }
        }

        let protocol = protocol
            .filter(|p| !p.is_empty())
            .ok_or_else(|| malformed("missing 'relay-protocol'"))?;
        let sym_key = sym_key.ok_or_else(|| malformed("missing 'symKey'"))?;

        Ok(Self {
            topic,
            sym_key,
            relay: RelayProtocolOptions::new(protocol, data),
        })
    }

    /// Render the URI handed to the peer out of band.
    pub fn to_absolute_string(&self) -> String {
        let mut uri = format!(
            "{}:{}@{}?relay-protocol={}&symKey={}",
            SCHEME,
            self.topic,
            VERSION,
            url_encode(&self.relay.protocol),
            self.sym_key.to_hex()
        );
        if let Some(data) = &self.relay.data {
            uri.push_str("&relay-data=");
            uri.push_str(&url_encode(data));
        }
        uri
    }
}

impl FromStr for PairingUri {
    type Err = SignError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_absolute_string())
    }
}

fn malformed(msg: impl Into<String>) -> SignError {
    SignError::MalformedPairingUri(msg.into())
}

fn url_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Percent decoding of a query value.
fn url_decode(encoded: &str) -> Result<String> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut iter = encoded.bytes();

    while let Some(b) = iter.next() {
        if b == b'%' {
            let hi = iter.next().ok_or_else(|| malformed("incomplete percent encoding"))?;
            let lo = iter.next().ok_or_else(|| malformed("incomplete percent encoding"))?;
            let pair = [hi, lo];
            let hex = std::str::from_utf8(&pair)
                .map_err(|_| malformed("invalid hex in percent encoding"))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| malformed("invalid hex in percent encoding"))?;
            bytes.push(byte);
        } else {
            bytes.push(b);
        }
    }

    String::from_utf8(bytes).map_err(|_| malformed("percent encoding is not utf-8"))
}
