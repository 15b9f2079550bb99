//! Shared test doubles and two-party setup for engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use signkit_engine::storage::PendingNamespaceUpdate;
use signkit_engine::{
    EngineConfig, EngineEvent, EngineTasks, InMemorySequenceStore, Pairing, ProposalNamespace,
    ProposalNamespaces, ProposedSequence, SequenceStorage, Session, SessionNamespace,
    SessionNamespaces, SessionProposal, SignEngine, StorageError, StorageResult,
};
use signkit_lib::crypto::{InMemoryKeyManagement, KeyManagement};
use signkit_lib::test_utils::{dapp_metadata, wallet_metadata, MockRelay, MockRelayHub, TestFixtures};
use signkit_lib::{
    generate_id, AppMetaData, Expiry, IrnParams, RelayMessage, RelayTransport, Tag, Topic, Ttl,
    FIVE_MINUTES_IN_SECONDS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Route engine logs to the test writer; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signkit_engine=warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Store that can be told to refuse inserts.
#[derive(Default)]
pub struct FailingStore {
    pub inner: InMemorySequenceStore,
    fail_insert_pairing: AtomicBool,
    fail_insert_session: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_pairing_inserts(&self, fail: bool) {
        self.fail_insert_pairing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_session_inserts(&self, fail: bool) {
        self.fail_insert_session.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SequenceStorage for FailingStore {
    async fn insert_pairing(&self, pairing: Pairing) -> StorageResult<()> {
        if self.fail_insert_pairing.load(Ordering::SeqCst) {
            return Err(StorageError::Other("disk full".into()));
        }
        self.inner.insert_pairing(pairing).await
    }

    async fn get_pairing(&self, topic: &Topic) -> StorageResult<Option<Pairing>> {
        self.inner.get_pairing(topic).await
    }

    async fn is_pairing_valid(&self, topic: &Topic) -> StorageResult<bool> {
        self.inner.is_pairing_valid(topic).await
    }

    async fn activate_pairing(&self, topic: &Topic, expiry: Expiry) -> StorageResult<()> {
        self.inner.activate_pairing(topic, expiry).await
    }

    async fn upsert_pairing_peer_metadata(
        &self,
        topic: &Topic,
        metadata: AppMetaData,
    ) -> StorageResult<()> {
        self.inner.upsert_pairing_peer_metadata(topic, metadata).await
    }

    async fn delete_pairing(&self, topic: &Topic) -> StorageResult<()> {
        self.inner.delete_pairing(topic).await
    }

    async fn list_pairings(&self) -> StorageResult<Vec<Pairing>> {
        self.inner.list_pairings().await
    }

    async fn insert_session(&self, session: Session) -> StorageResult<()> {
        if self.fail_insert_session.load(Ordering::SeqCst) {
            return Err(StorageError::Other("disk full".into()));
        }
        self.inner.insert_session(session).await
    }

    async fn get_session(&self, topic: &Topic) -> StorageResult<Option<Session>> {
        self.inner.get_session(topic).await
    }

    async fn is_session_valid(&self, topic: &Topic) -> StorageResult<bool> {
        self.inner.is_session_valid(topic).await
    }

    async fn acknowledge_session(&self, topic: &Topic) -> StorageResult<()> {
        self.inner.acknowledge_session(topic).await
    }

    async fn extend_session(&self, topic: &Topic, expiry: Expiry) -> StorageResult<()> {
        self.inner.extend_session(topic, expiry).await
    }

    async fn delete_session(&self, topic: &Topic) -> StorageResult<()> {
        self.inner.delete_session(topic).await
    }

    async fn list_sessions(&self) -> StorageResult<Vec<Session>> {
        self.inner.list_sessions().await
    }

    async fn insert_temp_namespaces(
        &self,
        topic: &Topic,
        namespaces: SessionNamespaces,
        request_id: u64,
    ) -> StorageResult<()> {
        self.inner
            .insert_temp_namespaces(topic, namespaces, request_id)
            .await
    }

    async fn get_temp_namespaces(
        &self,
        request_id: u64,
    ) -> StorageResult<Option<PendingNamespaceUpdate>> {
        self.inner.get_temp_namespaces(request_id).await
    }

    async fn mark_temp_namespaces_acknowledged(&self, request_id: u64) -> StorageResult<()> {
        self.inner.mark_temp_namespaces_acknowledged(request_id).await
    }

    async fn delete_temp_namespaces(&self, request_id: u64) -> StorageResult<()> {
        self.inner.delete_temp_namespaces(request_id).await
    }

    async fn replace_namespaces(
        &self,
        topic: &Topic,
        namespaces: SessionNamespaces,
        request_id: u64,
    ) -> StorageResult<()> {
        self.inner
            .replace_namespaces(topic, namespaces, request_id)
            .await
    }

    async fn is_update_request_valid(&self, topic: &Topic, request_id: u64) -> StorageResult<bool> {
        self.inner.is_update_request_valid(topic, request_id).await
    }

    async fn is_update_response_valid(
        &self,
        topic: &Topic,
        request_id: u64,
    ) -> StorageResult<bool> {
        self.inner.is_update_response_valid(topic, request_id).await
    }

    fn topic_expired(&self) -> broadcast::Receiver<Topic> {
        self.inner.topic_expired()
    }
}

/// One side of a conversation, wired to a shared hub.
pub struct Party {
    pub engine: Arc<SignEngine>,
    pub relay: Arc<MockRelay>,
    pub keys: Arc<InMemoryKeyManagement>,
    pub storage: Arc<FailingStore>,
    pub events: broadcast::Receiver<EngineEvent>,
    _tasks: EngineTasks,
}

impl Party {
    pub fn new(hub: &Arc<MockRelayHub>, metadata: AppMetaData) -> Self {
        Self::with_config(hub, EngineConfig::new(metadata))
    }

    pub fn with_config(hub: &Arc<MockRelayHub>, config: EngineConfig) -> Self {
        init_tracing();
        let relay = hub.client();
        let keys = Arc::new(InMemoryKeyManagement::new());
        let storage = Arc::new(FailingStore::new());
        let engine = SignEngine::new(
            config,
            keys.clone(),
            storage.clone(),
            relay.clone(),
            tokio::runtime::Handle::current(),
        );
        let events = engine.events();
        let tasks = engine.start();
        Self {
            engine,
            relay,
            keys,
            storage,
            events,
            _tasks: tasks,
        }
    }

    pub fn dapp(hub: &Arc<MockRelayHub>) -> Self {
        Self::new(hub, dapp_metadata())
    }

    pub fn wallet(hub: &Arc<MockRelayHub>) -> Self {
        Self::new(hub, wallet_metadata())
    }

    /// Wait for the next event matching `pred`, skipping others.
    pub async fn wait_for<F>(&mut self, pred: F) -> EngineEvent
    where
        F: Fn(&EngineEvent) -> bool,
    {
        self.next_matching(pred, Duration::from_secs(10))
            .await
            .expect("expected event did not arrive")
    }

    /// Next event matching `pred` within `within`, if any.
    pub async fn next_matching<F>(&mut self, pred: F, within: Duration) -> Option<EngineEvent>
    where
        F: Fn(&EngineEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(within, async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("engine event stream closed")
                    }
                }
            }
        })
        .await
        .ok()
    }

    pub async fn session(&self, topic: &Topic) -> Option<Session> {
        self.storage.get_session(topic).await.unwrap()
    }
}

/// A party whose engine is gone, speaking hand-written JSON-RPC with the
/// party's keys. Sends what a well-behaved engine never would.
pub struct RawPeer {
    pub relay: Arc<MockRelay>,
    pub keys: Arc<InMemoryKeyManagement>,
    inbound: broadcast::Receiver<RelayMessage>,
}

impl RawPeer {
    /// Stop `party`'s engine and take over its keys on `topics`.
    pub async fn replace(hub: &Arc<MockRelayHub>, party: Party, topics: &[&Topic]) -> Self {
        for topic in topics {
            party.relay.unsubscribe(topic).await.unwrap();
        }
        let keys = party.keys.clone();
        drop(party);

        let relay = hub.client();
        let mut inbound = relay.inbound();
        for topic in topics {
            relay.subscribe(topic).await.unwrap();
        }
        // History replayed to a new subscriber was already handled.
        while inbound.try_recv().is_ok() {}

        Self {
            relay,
            keys,
            inbound,
        }
    }

    /// Seal and publish a raw JSON-RPC payload.
    pub async fn send(&self, topic: &Topic, payload: Value) {
        let sealed = self
            .keys
            .encrypt(topic, &serde_json::to_vec(&payload).unwrap())
            .unwrap();
        let irn = IrnParams::new(Tag::SessionRequest, Ttl(FIVE_MINUTES_IN_SECONDS));
        self.relay.publish(topic, sealed, irn).await.unwrap();
    }

    /// Send a request with a fresh id and return the id.
    pub async fn request(&self, topic: &Topic, method: &str, params: Value) -> u64 {
        let id = generate_id();
        self.request_with_id(topic, id, method, params).await;
        id
    }

    pub async fn request_with_id(&self, topic: &Topic, id: u64, method: &str, params: Value) {
        self.send(
            topic,
            json!({"id": id, "jsonrpc": "2.0", "method": method, "params": params}),
        )
        .await;
    }

    pub async fn respond_ok(&self, topic: &Topic, id: u64) {
        self.send(topic, json!({"id": id, "jsonrpc": "2.0", "result": true}))
            .await;
    }

    /// Next opened message matching `pred` within `within`, if any.
    pub async fn next_message<F>(&mut self, pred: F, within: Duration) -> Option<Value>
    where
        F: Fn(&Value) -> bool,
    {
        let inbound = &mut self.inbound;
        let keys = &self.keys;
        tokio::time::timeout(within, async {
            loop {
                let message = match inbound.recv().await {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("relay stream closed"),
                };
                let Ok(plain) = keys.decrypt(&message.topic, &message.message) else {
                    continue;
                };
                match serde_json::from_slice::<Value>(&plain) {
                    Ok(value) if pred(&value) => return value,
                    _ => continue,
                }
            }
        })
        .await
        .ok()
    }

    /// Wait for the next request with `method`.
    pub async fn next_request(&mut self, method: &str) -> Value {
        self.next_message(|v| v["method"] == json!(method), Duration::from_secs(10))
            .await
            .expect("expected request did not arrive")
    }

    /// Wait for the response to request `id`.
    pub async fn response_to(&mut self, id: u64) -> Value {
        self.next_message(
            |v| v["id"] == json!(id) && v.get("method").is_none(),
            Duration::from_secs(10),
        )
        .await
        .expect("expected response did not arrive")
    }

    /// Error code of the response to request `id`.
    pub async fn error_code_for(&mut self, id: u64) -> i64 {
        let response = self.response_to(id).await;
        response["error"]["code"]
            .as_i64()
            .unwrap_or_else(|| panic!("expected an error response, got {}", response))
    }
}

/// Proposal asking for Ethereum mainnet and Polygon.
pub fn proposal_namespaces() -> ProposalNamespaces {
    ProposalNamespaces::from([(
        "eip155".to_string(),
        ProposalNamespace::new(
            [TestFixtures::ETH_MAINNET, TestFixtures::POLYGON],
            TestFixtures::METHODS.iter().copied(),
            TestFixtures::EVENTS.iter().copied(),
        ),
    )])
}

/// Grant of one mainnet account with every requested method and event.
pub fn session_namespaces() -> SessionNamespaces {
    SessionNamespaces::from([(
        "eip155".to_string(),
        SessionNamespace::new(
            [TestFixtures::account(TestFixtures::ETH_MAINNET, 0)],
            TestFixtures::METHODS.iter().copied(),
            TestFixtures::EVENTS.iter().copied(),
        ),
    )])
}

/// Grant adding a Polygon account.
pub fn widened_session_namespaces() -> SessionNamespaces {
    SessionNamespaces::from([(
        "eip155".to_string(),
        SessionNamespace::new(
            [
                TestFixtures::account(TestFixtures::ETH_MAINNET, 0),
                TestFixtures::account(TestFixtures::POLYGON, 1),
            ],
            TestFixtures::METHODS.iter().copied(),
            TestFixtures::EVENTS.iter().copied(),
        ),
    )])
}

/// Grant of one mainnet account with a single method and event.
pub fn narrowed_session_namespaces() -> SessionNamespaces {
    SessionNamespaces::from([(
        "eip155".to_string(),
        SessionNamespace::new(
            [TestFixtures::account(TestFixtures::ETH_MAINNET, 0)],
            TestFixtures::METHODS[..1].iter().copied(),
            TestFixtures::EVENTS[..1].iter().copied(),
        ),
    )])
}

pub fn is_proposal(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::SessionProposal(_))
}

/// Propose from the dapp on a fresh pairing and wait for the wallet to see it.
pub async fn propose(dapp: &mut Party, wallet: &mut Party) -> (Topic, SessionProposal) {
    let proposed = dapp
        .engine
        .propose_sequence(proposal_namespaces(), None, None)
        .await
        .unwrap();
    let ProposedSequence::Pairing { uri } = proposed else {
        panic!("expected a new pairing");
    };
    let pairing = wallet.engine.pair(&uri).await.unwrap();

    match wallet.wait_for(is_proposal).await {
        EngineEvent::SessionProposal(proposal) => (pairing.topic, proposal),
        _ => unreachable!(),
    }
}

/// Run the full handshake and return the session topic, acknowledged on both sides.
pub async fn connect(dapp: &mut Party, wallet: &mut Party) -> Topic {
    let (_, proposal) = propose(dapp, wallet).await;
    let topic = wallet
        .engine
        .approve(&proposal.proposer_public_key, session_namespaces())
        .await
        .unwrap();

    dapp.wait_for(|e| matches!(e, EngineEvent::SessionApproved(_)))
        .await;
    wallet
        .wait_for(|e| matches!(e, EngineEvent::SettledSessionResponse(_)))
        .await;
    topic
}
