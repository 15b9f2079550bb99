//! Test fixtures and data generators.

use crate::{AppMetaData, Expiry};

/// Collection of commonly used test fixtures.
pub struct TestFixtures;

impl TestFixtures {
    /// Ethereum mainnet chain id.
    pub const ETH_MAINNET: &'static str = "eip155:1";

    /// Polygon chain id.
    pub const POLYGON: &'static str = "eip155:137";

    /// Cosmos hub chain id.
    pub const COSMOS_HUB: &'static str = "cosmos:cosmoshub-4";

    /// Sample account addresses.
    pub const ADDRESSES: &'static [&'static str] = &[
        "0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb",
        "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
        "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359",
    ];

    /// Methods a typical dapp asks for.
    pub const METHODS: &'static [&'static str] =
        &["eth_sendTransaction", "eth_signTransaction", "personal_sign"];

    /// Events a typical dapp asks for.
    pub const EVENTS: &'static [&'static str] = &["chainChanged", "accountsChanged"];

    /// CAIP-10 account on `chain` for the sample address at `index`.
    pub fn account(chain: &str, index: usize) -> String {
        format!("{}:{}", chain, Self::ADDRESSES[index % Self::ADDRESSES.len()])
    }
}

/// Metadata of the proposing app.
pub fn dapp_metadata() -> AppMetaData {
    AppMetaData::new("Test Dapp", "https://dapp.example")
        .with_description("Dapp under test")
        .with_icon("https://dapp.example/icon.png")
}

/// Metadata of the responding wallet.
pub fn wallet_metadata() -> AppMetaData {
    AppMetaData::new("Test Wallet", "https://wallet.example").with_description("Wallet under test")
}

/// An expiry `seconds` in the past.
pub fn expired_by(seconds: u64) -> Expiry {
    Expiry(crate::current_timestamp() - seconds as i64)
}
