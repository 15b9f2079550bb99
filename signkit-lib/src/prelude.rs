//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types and traits for
//! wiring the engine collaborators. Import everything with:
//!
//! ```rust
//! use signkit_lib::prelude::*;
//!
//! let params = IrnParams::new(Tag::SessionPing, Ttl(THIRTY_SECONDS));
//! assert!(!params.prompt);
//! ```
//!
//! ## What's Included
//!
//! - Core types: `Topic`, `PublicKey`, `SymmetricKey`, `Expiry`, `AppMetaData`
//! - Error types: `SignError`, `SignErrorCode`, `Result`
//! - Key directory: `KeyManagement`, `InMemoryKeyManagement`
//! - Transport: `RelayTransport`, `RelayMessage`, `IrnParams`, `Tag`, `Ttl`
//! - URI parsing: `PairingUri`

// Core types
pub use crate::{
    AppMetaData, Expiry, PublicKey, RelayProtocolOptions, SymmetricKey, Topic, DAY_IN_SECONDS,
    FIVE_MINUTES_IN_SECONDS, MONTH_IN_SECONDS, THIRTY_SECONDS, WEEK_IN_SECONDS,
};
pub use crate::{current_timestamp, generate_id};

// Error handling
pub use crate::errors::{SignError, SignErrorCode};
pub use crate::Result;

// Key directory
pub use crate::crypto::{InMemoryKeyManagement, KeyManagement};

// Transport
pub use crate::transport::{IrnParams, RelayMessage, RelayTransport, Tag, Ttl};

// URI parsing
pub use crate::uri::PairingUri;
