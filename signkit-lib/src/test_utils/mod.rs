//! Test utilities for SignKit.
//!
//! This module provides testing infrastructure including:
//! - An in-memory relay hub connecting any number of parties
//! - Fixtures for chains, accounts and app metadata
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signkit_lib::test_utils::MockRelayHub;
//!
//! let hub = MockRelayHub::new();
//! let dapp_relay = hub.client();
//! let wallet_relay = hub.client();
//! ```

mod fixtures;
mod mock_relay;

pub use fixtures::{dapp_metadata, expired_by, wallet_metadata, TestFixtures};

pub use mock_relay::{MockRelay, MockRelayHub, RelayAction};
