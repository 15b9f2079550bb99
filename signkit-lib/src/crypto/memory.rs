//! In-memory key directory.
//!
//! Keys live only for the lifetime of the process. Hosts that need keys to
//! survive restarts implement [`KeyManagement`] over their platform keystore.
//!
//! # Thread Safety
//!
//! This directory uses `RwLock` for thread-safe access. Lock poisoning
//! is handled gracefully by returning an error rather than panicking.

use std::collections::HashMap;
use std::sync::RwLock;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::StaticSecret;

use super::{KeyManagement, ENVELOPE_TYPE_0, NONCE_LENGTH, TAG_LENGTH};
use crate::{random_bytes, PublicKey, Result, SignError, SymmetricKey, Topic};

/// In-memory implementation of the key directory.
pub struct InMemoryKeyManagement {
    key_pairs: RwLock<HashMap<PublicKey, StaticSecret>>,
    symmetric_keys: RwLock<HashMap<Topic, SymmetricKey>>,
    agreements: RwLock<HashMap<Topic, (PublicKey, PublicKey)>>,
}

/// Helper function to handle lock poisoning gracefully.
fn lock_error(context: &str) -> SignError {
    SignError::Internal(format!(
        "InMemoryKeyManagement: lock poisoned during {}",
        context
    ))
}

impl InMemoryKeyManagement {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            key_pairs: RwLock::new(HashMap::new()),
            symmetric_keys: RwLock::new(HashMap::new()),
            agreements: RwLock::new(HashMap::new()),
        }
    }

    /// Number of topics holding a symmetric key.
    ///
    /// Returns 0 if the lock is poisoned.
    pub fn topic_count(&self) -> usize {
        self.symmetric_keys.read().map(|k| k.len()).unwrap_or(0)
    }

    /// Number of key pairs held.
    ///
    /// Returns 0 if the lock is poisoned.
    pub fn key_pair_count(&self) -> usize {
        self.key_pairs.read().map(|k| k.len()).unwrap_or(0)
    }

    fn symmetric_key(&self, topic: &Topic) -> Result<SymmetricKey> {
        let keys = self
            .symmetric_keys
            .read()
            .map_err(|_| lock_error("symmetric_key"))?;
        keys.get(topic)
            .cloned()
            .ok_or_else(|| SignError::Crypto(format!("no symmetric key for topic {}", topic)))
    }
}

impl Default for InMemoryKeyManagement {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyManagement for InMemoryKeyManagement {
    fn generate_key_pair(&self) -> Result<PublicKey> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from_bytes(x25519_dalek::PublicKey::from(&secret).as_bytes());

        let mut pairs = self
            .key_pairs
            .write()
            .map_err(|_| lock_error("generate_key_pair"))?;
        pairs.insert(public.clone(), secret);
        Ok(public)
    }

    fn derive_shared_topic_and_key(
        &self,
        self_public: &PublicKey,
        peer_public: &PublicKey,
    ) -> Result<(Topic, SymmetricKey)> {
        let peer = x25519_dalek::PublicKey::from(peer_public.to_bytes()?);

        let shared = {
            let pairs = self
                .key_pairs
                .read()
                .map_err(|_| lock_error("derive_shared_topic_and_key"))?;
            let secret = pairs.get(self_public).ok_or_else(|| {
                SignError::Crypto(format!("no key pair for public key {}", self_public))
            })?;
            secret.diffie_hellman(&peer)
        };

        let mut okm = [0u8; 32];
        Hkdf::<Sha256>::new(None, shared.as_bytes())
            .expand(&[], &mut okm)
            .map_err(|e| SignError::Crypto(format!("key derivation failed: {}", e)))?;
        let key = SymmetricKey::new(okm);

        let topic = Topic::new(hex::encode(Sha256::digest(key.as_bytes())));
        Ok((topic, key))
    }

    fn store_symmetric_key(&self, topic: &Topic, key: SymmetricKey) -> Result<()> {
        let mut keys = self
            .symmetric_keys
            .write()
            .map_err(|_| lock_error("store_symmetric_key"))?;
        keys.insert(topic.clone(), key);
        Ok(())
    }

    fn store_key_agreement(
        &self,
        topic: &Topic,
        self_public: &PublicKey,
        peer_public: &PublicKey,
    ) -> Result<()> {
        let mut agreements = self
            .agreements
            .write()
            .map_err(|_| lock_error("store_key_agreement"))?;
        agreements.insert(topic.clone(), (self_public.clone(), peer_public.clone()));
        Ok(())
    }

    fn get_key_agreement(&self, topic: &Topic) -> Result<(PublicKey, PublicKey)> {
        let agreements = self
            .agreements
            .read()
            .map_err(|_| lock_error("get_key_agreement"))?;
        agreements
            .get(topic)
            .cloned()
            .ok_or_else(|| SignError::Crypto(format!("no key agreement for topic {}", topic)))
    }

    fn has_symmetric_key(&self, topic: &Topic) -> bool {
        self.symmetric_keys
            .read()
            .map(|k| k.contains_key(topic))
            .unwrap_or(false)
    }

    fn encrypt(&self, topic: &Topic, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.symmetric_key(topic)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let nonce = random_bytes::<NONCE_LENGTH>();

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SignError::Crypto(format!("failed to seal message on {}", topic)))?;

        let mut envelope = Vec::with_capacity(1 + NONCE_LENGTH + sealed.len());
        envelope.push(ENVELOPE_TYPE_0);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&sealed);
        Ok(envelope)
    }

    fn decrypt(&self, topic: &Topic, envelope: &[u8]) -> Result<Vec<u8>> {
        if envelope.len() < 1 + NONCE_LENGTH + TAG_LENGTH {
            return Err(SignError::Crypto(format!(
                "envelope too short: {} bytes",
                envelope.len()
            )));
        }
        if envelope[0] != ENVELOPE_TYPE_0 {
            return Err(SignError::Crypto(format!(
                "unsupported envelope type {}",
                envelope[0]
            )));
        }

        let key = self.symmetric_key(topic)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let (nonce, sealed) = envelope[1..].split_at(NONCE_LENGTH);

        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| SignError::Crypto(format!("failed to open message on {}", topic)))
    }

    fn remove_keys(&self, topic: &Topic) -> Result<()> {
        let agreement = {
            let mut agreements = self
                .agreements
                .write()
                .map_err(|_| lock_error("remove_keys"))?;
            agreements.remove(topic)
        };

        if let Some((self_public, _)) = agreement {
            let mut pairs = self
                .key_pairs
                .write()
                .map_err(|_| lock_error("remove_keys"))?;
            pairs.remove(&self_public);
        }

        let mut keys = self
            .symmetric_keys
            .write()
            .map_err(|_| lock_error("remove_keys"))?;
        keys.remove(topic);
        Ok(())
    }

    fn remove_key_pair(&self, self_public: &PublicKey) -> Result<()> {
        let mut pairs = self
            .key_pairs
            .write()
            .map_err(|_| lock_error("remove_key_pair"))?;
        pairs.remove(self_public);
        Ok(())
    }
}
