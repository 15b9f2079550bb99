//! Expiry supervision.
//!
//! Expired pairings and sessions are torn down (unsubscribed, keys erased,
//! record deleted); live ones are resubscribed. The engine runs a sweep
//! whenever the relay comes back and on a fixed interval, and tears down
//! single topics the store announces as expired.

use std::sync::Arc;

use signkit_lib::crypto::KeyManagement;
use signkit_lib::{current_timestamp, Result, Topic};
use tracing::{debug, info, warn};

use crate::interactor::JsonRpcInteractor;
use crate::storage::SequenceStorage;

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_pairings: Vec<Topic>,
    pub resubscribed_pairings: Vec<Topic>,
    pub expired_sessions: Vec<Topic>,
    pub resubscribed_sessions: Vec<Topic>,
}

impl SweepReport {
    /// Total number of topics torn down.
    pub fn expired_count(&self) -> usize {
        self.expired_pairings.len() + self.expired_sessions.len()
    }
}

/// Tears down expired sequences and keeps live ones subscribed.
pub struct ExpirationSupervisor {
    storage: Arc<dyn SequenceStorage>,
    keys: Arc<dyn KeyManagement>,
    interactor: Arc<JsonRpcInteractor>,
}

impl ExpirationSupervisor {
    pub fn new(
        storage: Arc<dyn SequenceStorage>,
        keys: Arc<dyn KeyManagement>,
        interactor: Arc<JsonRpcInteractor>,
    ) -> Self {
        Self {
            storage,
            keys,
            interactor,
        }
    }

    /// Sweep both record kinds against the current time.
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        self.sweep(current_timestamp()).await
    }

    /// Sweep both record kinds against `now` (unix seconds).
    ///
    /// Pairings and sessions are processed concurrently.
    pub async fn sweep(&self, now: i64) -> Result<SweepReport> {
        let (pairings, sessions) = tokio::join!(self.sweep_pairings(now), self.sweep_sessions(now));
        let (expired_pairings, resubscribed_pairings) = pairings?;
        let (expired_sessions, resubscribed_sessions) = sessions?;

        let report = SweepReport {
            expired_pairings,
            resubscribed_pairings,
            expired_sessions,
            resubscribed_sessions,
        };
        if report.expired_count() > 0 {
            info!(
                pairings = report.expired_pairings.len(),
                sessions = report.expired_sessions.len(),
                "expired sequences removed"
            );
        }
        Ok(report)
    }

    async fn sweep_pairings(&self, now: i64) -> Result<(Vec<Topic>, Vec<Topic>)> {
        let (expired, live): (Vec<_>, Vec<_>) = self
            .storage
            .list_pairings()
            .await?
            .into_iter()
            .partition(|p| p.is_expired_at(now));

        let mut expired_topics = Vec::with_capacity(expired.len());
        for pairing in expired {
            self.release_topic(&pairing.topic).await;
            self.interactor.clear_pending(&pairing.topic);
            if let Err(e) = self.storage.delete_pairing(&pairing.topic).await {
                warn!(topic = %pairing.topic, error = %e, "failed to delete expired pairing");
            }
            expired_topics.push(pairing.topic);
        }

        let live_topics = self.resubscribe(live.into_iter().map(|p| p.topic)).await;
        Ok((expired_topics, live_topics))
    }

    async fn sweep_sessions(&self, now: i64) -> Result<(Vec<Topic>, Vec<Topic>)> {
        let (expired, live): (Vec<_>, Vec<_>) = self
            .storage
            .list_sessions()
            .await?
            .into_iter()
            .partition(|s| s.is_expired_at(now));

        let mut expired_topics = Vec::with_capacity(expired.len());
        for session in expired {
            self.release_topic(&session.topic).await;
            self.interactor.clear_pending(&session.topic);
            if let Err(e) = self.storage.delete_session(&session.topic).await {
                warn!(topic = %session.topic, error = %e, "failed to delete expired session");
            }
            expired_topics.push(session.topic);
        }

        let live_topics = self.resubscribe(live.into_iter().map(|s| s.topic)).await;
        Ok((expired_topics, live_topics))
    }

    async fn resubscribe(&self, topics: impl Iterator<Item = Topic>) -> Vec<Topic> {
        let mut subscribed = Vec::new();
        for topic in topics {
            match self.interactor.subscribe(&topic).await {
                Ok(()) => subscribed.push(topic),
                Err(e) => warn!(topic = %topic, error = %e, "resubscribe failed"),
            }
        }
        subscribed
    }

    /// Tear down a topic the store expired on its own.
    pub async fn on_topic_expired(&self, topic: &Topic) {
        debug!(topic = %topic, "topic expired");
        self.interactor.clear_pending(topic);
        self.release_topic(topic).await;
    }

    /// Unsubscribe, then erase the topic's keys.
    async fn release_topic(&self, topic: &Topic) {
        if let Err(e) = self.interactor.unsubscribe(topic).await {
            warn!(topic = %topic, error = %e, "unsubscribe failed");
        }
        if let Err(e) = self.keys.remove_keys(topic) {
            warn!(topic = %topic, error = %e, "failed to erase keys");
        }
    }
}
