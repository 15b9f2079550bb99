//! Sequence repository.
//!
//! The engine persists pairings, sessions and staged namespace updates
//! through [`SequenceStorage`]. Hosts back it with their database;
//! [`InMemorySequenceStore`] serves tests and short-lived processes.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use signkit_lib::{current_timestamp, AppMetaData, Expiry, SignError, Topic};
use tokio::sync::broadcast;

use crate::namespace::SessionNamespaces;
use crate::sequence::{Pairing, Session};

/// Error type for storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    Conflict(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<StorageError> for SignError {
    fn from(e: StorageError) -> Self {
        SignError::Storage(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A namespace update staged until the peer acknowledges it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingNamespaceUpdate {
    pub topic: Topic,
    pub namespaces: SessionNamespaces,
    pub request_id: u64,
    pub is_acknowledged: bool,
}

/// Trait for persisting pairing and session records.
///
/// Implementations should ensure thread-safety and handle concurrent access.
#[async_trait]
pub trait SequenceStorage: Send + Sync {
    /// Insert a new pairing. Fails with `Conflict` if the topic is taken.
    async fn insert_pairing(&self, pairing: Pairing) -> StorageResult<()>;

    async fn get_pairing(&self, topic: &Topic) -> StorageResult<Option<Pairing>>;

    /// Whether a pairing exists on the topic and has not expired.
    async fn is_pairing_valid(&self, topic: &Topic) -> StorageResult<bool>;

    /// Mark a pairing active and move its expiry.
    async fn activate_pairing(&self, topic: &Topic, expiry: Expiry) -> StorageResult<()>;

    async fn upsert_pairing_peer_metadata(
        &self,
        topic: &Topic,
        metadata: AppMetaData,
    ) -> StorageResult<()>;

    async fn delete_pairing(&self, topic: &Topic) -> StorageResult<()>;

    async fn list_pairings(&self) -> StorageResult<Vec<Pairing>>;

    /// Insert a new session. Fails with `Conflict` if the topic is taken.
    async fn insert_session(&self, session: Session) -> StorageResult<()>;

    async fn get_session(&self, topic: &Topic) -> StorageResult<Option<Session>>;

    /// Whether a session exists on the topic and has not expired.
    async fn is_session_valid(&self, topic: &Topic) -> StorageResult<bool>;

    async fn acknowledge_session(&self, topic: &Topic) -> StorageResult<()>;

    async fn extend_session(&self, topic: &Topic, expiry: Expiry) -> StorageResult<()>;

    /// Delete a session together with its staged namespace updates.
    async fn delete_session(&self, topic: &Topic) -> StorageResult<()>;

    async fn list_sessions(&self) -> StorageResult<Vec<Session>>;

    /// Stage namespaces under the id of the update request carrying them.
    ///
    /// Older staged updates of the topic are superseded and dropped.
    async fn insert_temp_namespaces(
        &self,
        topic: &Topic,
        namespaces: SessionNamespaces,
        request_id: u64,
    ) -> StorageResult<()>;

    async fn get_temp_namespaces(
        &self,
        request_id: u64,
    ) -> StorageResult<Option<PendingNamespaceUpdate>>;

    /// Mark a staged update committed and drop every older one of its topic.
    async fn mark_temp_namespaces_acknowledged(&self, request_id: u64) -> StorageResult<()>;

    async fn delete_temp_namespaces(&self, request_id: u64) -> StorageResult<()>;

    /// Replace a session's namespaces, recording the request that set them.
    async fn replace_namespaces(
        &self,
        topic: &Topic,
        namespaces: SessionNamespaces,
        request_id: u64,
    ) -> StorageResult<()>;

    /// Whether an inbound update with `request_id` is newer than the
    /// session's current namespaces.
    async fn is_update_request_valid(&self, topic: &Topic, request_id: u64) -> StorageResult<bool>;

    /// Whether `request_id` is the newest update staged on the topic, still
    /// unacknowledged and newer than the session's namespaces. Responses to
    /// superseded updates are stale, whatever order they arrive in.
    async fn is_update_response_valid(&self, topic: &Topic, request_id: u64)
        -> StorageResult<bool>;

    /// Topics whose records the store expired on its own.
    fn topic_expired(&self) -> broadcast::Receiver<Topic>;
}

const EXPIRED_CAPACITY: usize = 64;

/// In-memory storage for pairings and sessions.
///
/// This is useful for testing and short-lived processes.
/// Data is not persisted across restarts.
pub struct InMemorySequenceStore {
    pairings: RwLock<HashMap<Topic, Pairing>>,
    sessions: RwLock<HashMap<Topic, Session>>,
    temp_namespaces: RwLock<BTreeMap<u64, PendingNamespaceUpdate>>,
    expired: broadcast::Sender<Topic>,
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(e.to_string())
}

impl InMemorySequenceStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        let (expired, _) = broadcast::channel(EXPIRED_CAPACITY);
        Self {
            pairings: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            temp_namespaces: RwLock::new(BTreeMap::new()),
            expired,
        }
    }

    /// Drop every pairing and session expired at `now` and announce their
    /// topics on [`SequenceStorage::topic_expired`].
    pub fn purge_expired(&self, now: i64) -> StorageResult<Vec<Topic>> {
        let mut topics = Vec::new();
        {
            let mut pairings = self.pairings.write().map_err(lock_error)?;
            pairings.retain(|topic, p| {
                let expired = p.is_expired_at(now);
                if expired {
                    topics.push(topic.clone());
                }
                !expired
            });
        }
        {
            let mut sessions = self.sessions.write().map_err(lock_error)?;
            sessions.retain(|topic, s| {
                let expired = s.is_expired_at(now);
                if expired {
                    topics.push(topic.clone());
                }
                !expired
            });
        }
        {
            let mut temp = self.temp_namespaces.write().map_err(lock_error)?;
            temp.retain(|_, update| !topics.contains(&update.topic));
        }

        for topic in &topics {
            let _ = self.expired.send(topic.clone());
        }
        Ok(topics)
    }

    fn update_session<F>(&self, topic: &Topic, f: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().map_err(lock_error)?;
        let session = sessions
            .get_mut(topic)
            .ok_or_else(|| StorageError::NotFound(format!("session {}", topic)))?;
        f(session);
        Ok(())
    }

    fn update_pairing<F>(&self, topic: &Topic, f: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Pairing),
    {
        let mut pairings = self.pairings.write().map_err(lock_error)?;
        let pairing = pairings
            .get_mut(topic)
            .ok_or_else(|| StorageError::NotFound(format!("pairing {}", topic)))?;
        f(pairing);
        Ok(())
    }
}

impl Default for InMemorySequenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SequenceStorage for InMemorySequenceStore {
    async fn insert_pairing(&self, pairing: Pairing) -> StorageResult<()> {
        let mut pairings = self.pairings.write().map_err(lock_error)?;
        if pairings.contains_key(&pairing.topic) {
            return Err(StorageError::Conflict(format!("pairing {}", pairing.topic)));
        }
        pairings.insert(pairing.topic.clone(), pairing);
        Ok(())
    }

    async fn get_pairing(&self, topic: &Topic) -> StorageResult<Option<Pairing>> {
        let pairings = self.pairings.read().map_err(lock_error)?;
        Ok(pairings.get(topic).cloned())
    }

    async fn is_pairing_valid(&self, topic: &Topic) -> StorageResult<bool> {
        let now = current_timestamp();
        let pairings = self.pairings.read().map_err(lock_error)?;
        Ok(pairings
            .get(topic)
            .map(|p| !p.is_expired_at(now))
            .unwrap_or(false))
    }

    async fn activate_pairing(&self, topic: &Topic, expiry: Expiry) -> StorageResult<()> {
        self.update_pairing(topic, |p| {
            p.is_active = true;
            p.expiry = expiry;
        })
    }

    async fn upsert_pairing_peer_metadata(
        &self,
        topic: &Topic,
        metadata: AppMetaData,
    ) -> StorageResult<()> {
        self.update_pairing(topic, |p| p.peer_metadata = Some(metadata))
    }

    async fn delete_pairing(&self, topic: &Topic) -> StorageResult<()> {
        let mut pairings = self.pairings.write().map_err(lock_error)?;
        pairings.remove(topic);
        Ok(())
    }

    async fn list_pairings(&self) -> StorageResult<Vec<Pairing>> {
        let pairings = self.pairings.read().map_err(lock_error)?;
        Ok(pairings.values().cloned().collect())
    }

    async fn insert_session(&self, session: Session) -> StorageResult<()> {
        let mut sessions = self.sessions.write().map_err(lock_error)?;
        if sessions.contains_key(&session.topic) {
            return Err(StorageError::Conflict(format!("session {}", session.topic)));
        }
        sessions.insert(session.topic.clone(), session);
        Ok(())
    }

    async fn get_session(&self, topic: &Topic) -> StorageResult<Option<Session>> {
        let sessions = self.sessions.read().map_err(lock_error)?;
        Ok(sessions.get(topic).cloned())
    }

    async fn is_session_valid(&self, topic: &Topic) -> StorageResult<bool> {
        let now = current_timestamp();
        let sessions = self.sessions.read().map_err(lock_error)?;
        Ok(sessions
            .get(topic)
            .map(|s| !s.is_expired_at(now))
            .unwrap_or(false))
    }

    async fn acknowledge_session(&self, topic: &Topic) -> StorageResult<()> {
        self.update_session(topic, |s| s.is_acknowledged = true)
    }

    async fn extend_session(&self, topic: &Topic, expiry: Expiry) -> StorageResult<()> {
        self.update_session(topic, |s| s.expiry = expiry)
    }

    async fn delete_session(&self, topic: &Topic) -> StorageResult<()> {
        {
            let mut sessions = self.sessions.write().map_err(lock_error)?;
            sessions.remove(topic);
        }
        let mut temp = self.temp_namespaces.write().map_err(lock_error)?;
        temp.retain(|_, update| &update.topic != topic);
        Ok(())
    }

    async fn list_sessions(&self) -> StorageResult<Vec<Session>> {
        let sessions = self.sessions.read().map_err(lock_error)?;
        Ok(sessions.values().cloned().collect())
    }

    async fn insert_temp_namespaces(
        &self,
        topic: &Topic,
        namespaces: SessionNamespaces,
        request_id: u64,
    ) -> StorageResult<()> {
        let mut temp = self.temp_namespaces.write().map_err(lock_error)?;
        temp.retain(|id, update| &update.topic != topic || *id > request_id);
        temp.insert(
            request_id,
            PendingNamespaceUpdate {
                topic: topic.clone(),
                namespaces,
                request_id,
                is_acknowledged: false,
            },
        );
        Ok(())
    }

    async fn get_temp_namespaces(
        &self,
        request_id: u64,
    ) -> StorageResult<Option<PendingNamespaceUpdate>> {
        let temp = self.temp_namespaces.read().map_err(lock_error)?;
        Ok(temp.get(&request_id).cloned())
    }

    async fn mark_temp_namespaces_acknowledged(&self, request_id: u64) -> StorageResult<()> {
        let mut temp = self.temp_namespaces.write().map_err(lock_error)?;
        let update = temp
            .get_mut(&request_id)
            .ok_or_else(|| StorageError::NotFound(format!("staged update {}", request_id)))?;
        update.is_acknowledged = true;
        let topic = update.topic.clone();
        temp.retain(|id, update| update.topic != topic || *id >= request_id);
        Ok(())
    }

    async fn delete_temp_namespaces(&self, request_id: u64) -> StorageResult<()> {
        let mut temp = self.temp_namespaces.write().map_err(lock_error)?;
        temp.remove(&request_id);
        Ok(())
    }

    async fn replace_namespaces(
        &self,
        topic: &Topic,
        namespaces: SessionNamespaces,
        request_id: u64,
    ) -> StorageResult<()> {
        self.update_session(topic, |s| {
            s.namespaces = namespaces;
            s.namespaces_request_id = request_id;
        })
    }

    async fn is_update_request_valid(&self, topic: &Topic, request_id: u64) -> StorageResult<bool> {
        let sessions = self.sessions.read().map_err(lock_error)?;
        Ok(sessions
            .get(topic)
            .map(|s| request_id > s.namespaces_request_id)
            .unwrap_or(false))
    }

    async fn is_update_response_valid(
        &self,
        topic: &Topic,
        request_id: u64,
    ) -> StorageResult<bool> {
        let committed = {
            let sessions = self.sessions.read().map_err(lock_error)?;
            match sessions.get(topic) {
                Some(session) => session.namespaces_request_id,
                None => return Ok(false),
            }
        };
        if request_id <= committed {
            return Ok(false);
        }

        let temp = self.temp_namespaces.read().map_err(lock_error)?;
        let newest = temp
            .values()
            .filter(|u| &u.topic == topic)
            .max_by_key(|u| u.request_id);
        Ok(matches!(newest, Some(u) if u.request_id == request_id && !u.is_acknowledged))
    }

    fn topic_expired(&self) -> broadcast::Receiver<Topic> {
        self.expired.subscribe()
    }
}
