//! Key/topic directory.
//!
//! The protocol engine never touches raw key bytes: it asks the directory to
//! generate key pairs, derive a shared topic from two public keys, and seal
//! or open envelopes for a topic. All material is indexed by topic so a
//! sequence teardown can erase it in one call.
//!
//! # Envelope format
//!
//! ```text
//! 0x00 | nonce (12 bytes) | ChaCha20-Poly1305 ciphertext + tag
//! ```

mod memory;

pub use memory::InMemoryKeyManagement;

use crate::{PublicKey, Result, SymmetricKey, Topic};

/// Envelope type byte for symmetric-key sealed messages.
pub const ENVELOPE_TYPE_0: u8 = 0;

/// Nonce length of sealed envelopes.
pub const NONCE_LENGTH: usize = 12;

/// Authentication tag length of sealed envelopes.
pub const TAG_LENGTH: usize = 16;

/// Contract of the key directory consumed by the protocol engine.
pub trait KeyManagement: Send + Sync {
    /// Generate and keep an X25519 key pair, returning its public half.
    fn generate_key_pair(&self) -> Result<PublicKey>;

    /// Derive the topic and symmetric key two parties share.
    ///
    /// `self_public` must have been produced by [`generate_key_pair`](Self::generate_key_pair).
    /// The derivation is symmetric: the peer computes the same pair.
    fn derive_shared_topic_and_key(
        &self,
        self_public: &PublicKey,
        peer_public: &PublicKey,
    ) -> Result<(Topic, SymmetricKey)>;

    /// Store the symmetric key for a topic, replacing any previous key.
    fn store_symmetric_key(&self, topic: &Topic, key: SymmetricKey) -> Result<()>;

    /// Record which key pair a derived topic belongs to.
    fn store_key_agreement(
        &self,
        topic: &Topic,
        self_public: &PublicKey,
        peer_public: &PublicKey,
    ) -> Result<()>;

    /// The `(self, peer)` public keys a derived topic was agreed with.
    fn get_key_agreement(&self, topic: &Topic) -> Result<(PublicKey, PublicKey)>;

    /// Whether a symmetric key is stored for the topic.
    fn has_symmetric_key(&self, topic: &Topic) -> bool;

    /// Seal `plaintext` with the topic's symmetric key.
    fn encrypt(&self, topic: &Topic, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Open an envelope sealed with the topic's symmetric key.
    fn decrypt(&self, topic: &Topic, envelope: &[u8]) -> Result<Vec<u8>>;

    /// Erase every key stored for the topic.
    fn remove_keys(&self, topic: &Topic) -> Result<()>;

    /// Erase a key pair no topic was derived from.
    fn remove_key_pair(&self, self_public: &PublicKey) -> Result<()>;

    /// Generate a random symmetric key and store it under `topic`.
    fn generate_and_store_symmetric_key(&self, topic: &Topic) -> Result<SymmetricKey> {
        let key = SymmetricKey::generate();
        self.store_symmetric_key(topic, key.clone())?;
        Ok(key)
    }

    /// Derive the shared topic, store its key and the agreement, return the topic.
    fn generate_topic_from_key_agreement(
        &self,
        self_public: &PublicKey,
        peer_public: &PublicKey,
    ) -> Result<Topic> {
        let (topic, key) = self.derive_shared_topic_and_key(self_public, peer_public)?;
        self.store_symmetric_key(&topic, key)?;
        self.store_key_agreement(&topic, self_public, peer_public)?;
        Ok(topic)
    }
}
