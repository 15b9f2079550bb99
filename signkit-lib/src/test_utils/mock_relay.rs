//! In-memory relay for multi-party tests.
//!
//! A [`MockRelayHub`] routes published envelopes to every other client
//! subscribed to the topic. Messages are kept per topic so a client that
//! subscribes late (a wallet scanning a pairing URI after the proposal was
//! published) still receives them, once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::transport::{IrnParams, RelayMessage, RelayTransport, Tag};
use crate::{Result, SignError, Topic};

const INBOUND_CAPACITY: usize = 256;

/// An operation a client performed against the hub, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayAction {
    /// Topic subscribed.
    Subscribe(Topic),
    /// Topic unsubscribed.
    Unsubscribe(Topic),
    /// Envelope published with the given tag.
    Publish {
        /// Target topic.
        topic: Topic,
        /// Routing tag.
        tag: Tag,
    },
}

struct StoredMessage {
    publisher: u64,
    message: Vec<u8>,
    delivered: HashSet<u64>,
}

struct ClientEntry {
    subscriptions: HashSet<Topic>,
    inbound: broadcast::Sender<RelayMessage>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<u64, ClientEntry>,
    mailbox: HashMap<Topic, Vec<StoredMessage>>,
}

/// Shared in-memory relay.
pub struct MockRelayHub {
    state: Mutex<HubState>,
    next_client: AtomicU64,
}

impl MockRelayHub {
    /// Create an empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            next_client: AtomicU64::new(1),
        })
    }

    /// Connect a new client to the hub.
    pub fn client(self: &Arc<Self>) -> Arc<MockRelay> {
        let id = self.next_client.fetch_add(1, Ordering::SeqCst);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let (connection, _) = watch::channel(true);

        if let Ok(mut state) = self.state.lock() {
            state.clients.insert(
                id,
                ClientEntry {
                    subscriptions: HashSet::new(),
                    inbound: inbound.clone(),
                },
            );
        }

        Arc::new(MockRelay {
            id,
            hub: self.clone(),
            inbound,
            connection,
            actions: Mutex::new(Vec::new()),
            fail_publish: AtomicBool::new(false),
        })
    }

    /// Number of envelopes ever published on a topic.
    pub fn published_count(&self, topic: &Topic) -> usize {
        self.state
            .lock()
            .map(|s| s.mailbox.get(topic).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HubState>> {
        self.state
            .lock()
            .map_err(|_| SignError::Internal("MockRelayHub: lock poisoned".into()))
    }

    fn subscribe(&self, client: u64, topic: &Topic) -> Result<()> {
        let mut state = self.lock()?;
        let HubState { clients, mailbox } = &mut *state;

        let entry = clients
            .get_mut(&client)
            .ok_or_else(|| SignError::Transport(format!("unknown client {}", client)))?;
        entry.subscriptions.insert(topic.clone());

        if let Some(stored) = mailbox.get_mut(topic) {
            for msg in stored
                .iter_mut()
                .filter(|m| m.publisher != client && !m.delivered.contains(&client))
            {
                msg.delivered.insert(client);
                let _ = entry.inbound.send(RelayMessage {
                    topic: topic.clone(),
                    message: msg.message.clone(),
                });
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, client: u64, topic: &Topic) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(entry) = state.clients.get_mut(&client) {
            entry.subscriptions.remove(topic);
        }
        Ok(())
    }

    fn publish(&self, publisher: u64, topic: &Topic, message: Vec<u8>) -> Result<()> {
        let mut state = self.lock()?;
        let mut delivered = HashSet::from([publisher]);
        tracing::trace!(topic = %topic, publisher, bytes = message.len(), "mock relay publish");

        for (id, entry) in state.clients.iter() {
            if *id != publisher && entry.subscriptions.contains(topic) {
                delivered.insert(*id);
                let _ = entry.inbound.send(RelayMessage {
                    topic: topic.clone(),
                    message: message.clone(),
                });
            }
        }

        state
            .mailbox
            .entry(topic.clone())
            .or_default()
            .push(StoredMessage {
                publisher,
                message,
                delivered,
            });
        Ok(())
    }

    fn is_subscribed(&self, client: u64, topic: &Topic) -> bool {
        self.state
            .lock()
            .map(|s| {
                s.clients
                    .get(&client)
                    .map(|c| c.subscriptions.contains(topic))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }
}

/// One party's connection to a [`MockRelayHub`].
pub struct MockRelay {
    id: u64,
    hub: Arc<MockRelayHub>,
    inbound: broadcast::Sender<RelayMessage>,
    connection: watch::Sender<bool>,
    actions: Mutex<Vec<RelayAction>>,
    fail_publish: AtomicBool,
}

impl MockRelay {
    /// Make subsequent publishes fail with a transport error.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Simulate the relay connection going down or coming back.
    pub fn set_connected(&self, connected: bool) {
        self.connection.send_replace(connected);
    }

    /// Whether this client is currently subscribed to `topic`.
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.hub.is_subscribed(self.id, topic)
    }

    /// All operations performed so far.
    pub fn actions(&self) -> Vec<RelayAction> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Tags of everything this client published, in order.
    pub fn published_tags(&self) -> Vec<Tag> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                RelayAction::Publish { tag, .. } => Some(tag),
                _ => None,
            })
            .collect()
    }

    /// Forget the recorded operations.
    pub fn clear_actions(&self) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.clear();
        }
    }

    fn record(&self, action: RelayAction) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action);
        }
    }
}

#[async_trait]
impl RelayTransport for MockRelay {
    async fn subscribe(&self, topic: &Topic) -> Result<()> {
        self.record(RelayAction::Subscribe(topic.clone()));
        self.hub.subscribe(self.id, topic)
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        self.record(RelayAction::Unsubscribe(topic.clone()));
        self.hub.unsubscribe(self.id, topic)
    }

    async fn publish(&self, topic: &Topic, message: Vec<u8>, params: IrnParams) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SignError::Transport(format!(
                "publish on {} refused by mock relay",
                topic
            )));
        }
        self.record(RelayAction::Publish {
            topic: topic.clone(),
            tag: params.tag,
        });
        self.hub.publish(self.id, topic, message)
    }

    fn inbound(&self) -> broadcast::Receiver<RelayMessage> {
        self.inbound.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<bool> {
        self.connection.subscribe()
    }
}
