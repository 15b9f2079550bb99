//! The sign engine.
//!
//! [`SignEngine`] drives the pairing and session lifecycle for one local
//! participant. Host calls (propose, approve, request, ...) live here;
//! inbound requests and responses are dispatched from the event loop into
//! [`requests`] and [`responses`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use signkit_engine::{EngineConfig, InMemorySequenceStore, SignEngine};
//! use signkit_lib::crypto::InMemoryKeyManagement;
//! use signkit_lib::{AppMetaData, RelayTransport};
//!
//! # async fn example(relay: Arc<dyn RelayTransport>) -> signkit_lib::Result<()> {
//! let config = EngineConfig::new(AppMetaData::new("Wallet", "https://wallet.example"));
//! let engine = SignEngine::new(
//!     config,
//!     Arc::new(InMemoryKeyManagement::new()),
//!     Arc::new(InMemorySequenceStore::new()),
//!     relay,
//!     tokio::runtime::Handle::current(),
//! );
//! let _tasks = engine.start();
//! let mut events = engine.events();
//! engine.pair("wc:...@2?relay-protocol=irn&symKey=...").await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

mod requests;
mod responses;

use std::sync::Arc;
use std::time::Duration;

use signkit_lib::crypto::KeyManagement;
use signkit_lib::{
    current_timestamp, Expiry, IrnParams, PairingUri, PublicKey, RelayProtocolOptions,
    RelayTransport, Result, SignError, Tag, Topic, Ttl, FIVE_MINUTES_IN_SECONDS,
    WEEK_IN_SECONDS,
};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::events::{EngineEvent, SessionRequest};
use crate::expiration::{ExpirationSupervisor, SweepReport};
use crate::interactor::{Inbound, JsonRpcInteractor, WcRequest, WcResponse};
use crate::namespace::{ProposalNamespaces, SessionNamespaces};
use crate::proposals::{PendingProposal, ProposalStore};
use crate::rpc::{
    ApprovalParams, EventParams, ExtendParams, JsonRpcResponse, Participant, PeerError,
    RpcParams, SessionProposeParams, SessionRequestParams, SessionSettleParams,
    UpdateNamespacesParams,
};
use crate::sequence::{Pairing, ProposedSequence, Session};
use crate::storage::SequenceStorage;
use crate::validator::{
    validate_event, validate_event_authorization, validate_extend,
    validate_method_authorization, validate_proposal_namespaces, validate_session_namespaces,
    validate_session_request,
};

/// Handles of the engine's background tasks. Dropping them stops the engine.
pub struct EngineTasks {
    handles: Vec<JoinHandle<()>>,
}

impl EngineTasks {
    /// Stop every background task.
    pub fn shutdown(self) {}

    /// Whether every background task has stopped.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|h| h.is_finished())
    }
}

impl Drop for EngineTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Protocol engine for one participant.
pub struct SignEngine {
    config: EngineConfig,
    keys: Arc<dyn KeyManagement>,
    storage: Arc<dyn SequenceStorage>,
    interactor: Arc<JsonRpcInteractor>,
    proposals: ProposalStore,
    supervisor: ExpirationSupervisor,
    events: broadcast::Sender<EngineEvent>,
    runtime: Handle,
}

impl SignEngine {
    /// Build an engine over its collaborators. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: EngineConfig,
        keys: Arc<dyn KeyManagement>,
        storage: Arc<dyn SequenceStorage>,
        relay: Arc<dyn RelayTransport>,
        runtime: Handle,
    ) -> Arc<Self> {
        let capacity = config.event_capacity.max(1);
        let interactor = Arc::new(JsonRpcInteractor::new(relay, keys.clone(), capacity));
        let supervisor =
            ExpirationSupervisor::new(storage.clone(), keys.clone(), interactor.clone());
        let (events, _) = broadcast::channel(capacity);

        Arc::new(Self {
            config,
            keys,
            storage,
            interactor,
            proposals: ProposalStore::new(),
            supervisor,
            events,
            runtime,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to engine events.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Spawn the inbound pump and the event loop on the engine's runtime.
    pub fn start(self: &Arc<Self>) -> EngineTasks {
        // Subscribe to every stream before the pump can deliver anything.
        let streams = EventStreams {
            messages: self.interactor.messages(),
            errors: self.interactor.internal_errors(),
            connection: self.interactor.connection_state(),
            expired: self.storage.topic_expired(),
        };
        let event_loop = self.runtime.spawn(self.clone().run(streams));
        let pump = self.runtime.spawn(self.interactor.clone().pump());
        info!(name = %self.config.metadata.name, "sign engine started");
        EngineTasks {
            handles: vec![pump, event_loop],
        }
    }

    // ----- pairing and proposal -----

    /// Propose a session, on an existing pairing or on a fresh one.
    ///
    /// Returns the pairing URI to share when a pairing was created.
    #[instrument(skip_all)]
    pub async fn propose_sequence(
        &self,
        namespaces: ProposalNamespaces,
        relays: Option<Vec<RelayProtocolOptions>>,
        pairing_topic: Option<Topic>,
    ) -> Result<ProposedSequence> {
        validate_proposal_namespaces(&namespaces)?;

        match pairing_topic {
            Some(topic) => {
                let pairing = self.valid_pairing(&topic).await?;
                let relays = relays.unwrap_or_else(|| vec![pairing.relay.clone()]);
                self.propose_session(&topic, namespaces, relays).await?;
                Ok(ProposedSequence::Session)
            }
            None => {
                let relay = relays
                    .as_ref()
                    .and_then(|r| r.first().cloned())
                    .unwrap_or_default();
                let uri = self.create_pairing(relay.clone()).await?;
                let relays = relays.unwrap_or_else(|| vec![relay]);
                self.propose_session(&uri.topic, namespaces, relays).await?;
                Ok(ProposedSequence::Pairing {
                    uri: uri.to_absolute_string(),
                })
            }
        }
    }

    async fn create_pairing(&self, relay: RelayProtocolOptions) -> Result<PairingUri> {
        let topic = Topic::generate();
        let sym_key = self.keys.generate_and_store_symmetric_key(&topic)?;
        let uri = PairingUri::new(topic.clone(), sym_key, relay);

        if let Err(e) = self.storage.insert_pairing(Pairing::inactive(&uri)).await {
            warn!(topic = %topic, error = %e, "failed to persist pairing");
            self.release_topic(&topic).await;
            self.discard_pairing(&topic).await;
            return Err(e.into());
        }
        if let Err(e) = self.interactor.subscribe(&topic).await {
            self.release_topic(&topic).await;
            self.discard_pairing(&topic).await;
            return Err(e);
        }

        debug!(topic = %topic, "pairing created");
        Ok(uri)
    }

    async fn propose_session(
        &self,
        pairing_topic: &Topic,
        namespaces: ProposalNamespaces,
        relays: Vec<RelayProtocolOptions>,
    ) -> Result<()> {
        let self_public = self.keys.generate_key_pair()?;
        let params = SessionProposeParams {
            relays,
            proposer: Participant {
                public_key: self_public.clone(),
                metadata: self.config.metadata.clone(),
            },
            required_namespaces: namespaces,
        };

        let sealed = self
            .interactor
            .seal_request(pairing_topic, RpcParams::SessionPropose(params))?;
        let proposal = PendingProposal::from_request(WcRequest {
            topic: pairing_topic.clone(),
            id: sealed.id,
            params: sealed.params.clone(),
        })?;
        self.proposals.insert(self_public.clone(), proposal)?;

        if let Err(e) = self.interactor.publish_sealed(sealed).await {
            self.proposals.remove(&self_public);
            self.forget_proposals(vec![self_public]);
            return Err(e);
        }
        Ok(())
    }

    /// Join a pairing from a scanned URI.
    #[instrument(skip_all)]
    pub async fn pair(&self, uri: &str) -> Result<Pairing> {
        let uri = PairingUri::parse(uri)?;
        let topic = uri.topic.clone();
        if self.storage.get_pairing(&topic).await?.is_some() {
            return Err(SignError::PairingAlreadyExists(topic.to_string()));
        }

        let pairing = Pairing::active(&uri);
        self.keys.store_symmetric_key(&topic, uri.sym_key.clone())?;
        if let Err(e) = self.storage.insert_pairing(pairing.clone()).await {
            if let Err(cleanup) = self.keys.remove_keys(&topic) {
                warn!(topic = %topic, error = %cleanup, "failed to erase pairing key");
            }
            return Err(e.into());
        }
        if let Err(e) = self.interactor.subscribe(&topic).await {
            self.discard_pairing(&topic).await;
            self.release_topic(&topic).await;
            return Err(e);
        }

        info!(topic = %topic, "paired");
        Ok(pairing)
    }

    /// Reject a pending proposal.
    #[instrument(skip_all, fields(proposer = %proposer_public_key))]
    pub async fn reject(&self, proposer_public_key: &PublicKey, reason: &str) -> Result<()> {
        let proposal = self.proposals.take(proposer_public_key)?;
        self.interactor
            .respond_error(&proposal.request, PeerError::user_rejected(reason))
            .await
    }

    /// Approve a pending proposal with the granted namespaces.
    ///
    /// Returns the topic of the new session, which stays unacknowledged
    /// until the proposer accepts the settlement.
    #[instrument(skip_all, fields(proposer = %proposer_public_key))]
    pub async fn approve(
        &self,
        proposer_public_key: &PublicKey,
        namespaces: SessionNamespaces,
    ) -> Result<Topic> {
        let proposal = self.proposals.get(proposer_public_key)?;
        validate_session_namespaces(&namespaces, &proposal.params.required_namespaces)?;
        let proposal = self.proposals.take(proposer_public_key)?;

        let self_public = self.keys.generate_key_pair()?;
        let session_topic = self
            .keys
            .generate_topic_from_key_agreement(&self_public, proposer_public_key)?;
        let relay = proposal.params.relays.first().cloned().unwrap_or_default();

        if let Err(e) = self.interactor.subscribe(&session_topic).await {
            self.release_topic(&session_topic).await;
            self.proposals
                .insert(proposer_public_key.clone(), proposal)?;
            return Err(e);
        }

        let approval = ApprovalParams {
            relay: relay.clone(),
            responder_public_key: self_public.clone(),
        };
        let result = serde_json::to_value(&approval)?;
        if let Err(e) = self
            .interactor
            .respond_success(&proposal.request, result)
            .await
        {
            self.release_topic(&session_topic).await;
            self.proposals
                .insert(proposer_public_key.clone(), proposal)?;
            return Err(e);
        }

        self.settle(session_topic.clone(), proposal, self_public, namespaces, relay)
            .await?;
        Ok(session_topic)
    }

    async fn settle(
        &self,
        topic: Topic,
        proposal: PendingProposal,
        self_public: PublicKey,
        namespaces: SessionNamespaces,
        relay: RelayProtocolOptions,
    ) -> Result<()> {
        let controller = Participant {
            public_key: self_public,
            metadata: self.config.metadata.clone(),
        };
        let session = Session::unacknowledged(
            topic.clone(),
            &proposal.params,
            proposal.request.id,
            controller.clone(),
            namespaces.clone(),
            relay.clone(),
        );

        if let Err(e) = self.storage.insert_session(session.clone()).await {
            // The approval is already out; the proposer's settlement wait
            // runs into nothing.
            warn!(topic = %topic, error = %e, "failed to persist session");
            self.release_topic(&topic).await;
            if let Err(cleanup) = self.storage.delete_session(&topic).await {
                warn!(topic = %topic, error = %cleanup, "failed to drop partial session");
            }
            self.proposals
                .insert(proposal.params.proposer.public_key.clone(), proposal)?;
            return Err(e.into());
        }
        if let Err(e) = self
            .storage
            .upsert_pairing_peer_metadata(
                &proposal.request.topic,
                proposal.params.proposer.metadata.clone(),
            )
            .await
        {
            debug!(topic = %proposal.request.topic, error = %e, "pairing metadata not stored");
        }

        let settle = SessionSettleParams {
            relay,
            controller,
            namespaces,
            expiry: session.expiry.seconds(),
        };
        self.interactor
            .publish_request(&topic, RpcParams::SessionSettle(settle))
            .await?;
        info!(topic = %topic, "session settlement sent");
        Ok(())
    }

    // ----- session operations -----

    /// Stage new namespaces and send them to the peer; returns the request id.
    ///
    /// The namespaces are committed when the peer acknowledges.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn session_update(&self, topic: &Topic, namespaces: SessionNamespaces) -> Result<u64> {
        let session = self.valid_session(topic).await?;
        Self::require_controller(&session)?;
        Self::require_acknowledged(&session)?;
        validate_session_namespaces(&namespaces, &session.proposal_namespaces)?;

        let sealed = self.interactor.seal_request(
            topic,
            RpcParams::SessionUpdate(UpdateNamespacesParams {
                namespaces: namespaces.clone(),
            }),
        )?;
        let id = sealed.id;
        self.storage
            .insert_temp_namespaces(topic, namespaces, id)
            .await?;

        if let Err(e) = self.interactor.publish_sealed(sealed).await {
            if let Err(cleanup) = self.storage.delete_temp_namespaces(id).await {
                warn!(id, error = %cleanup, "failed to drop staged namespaces");
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Send a session request and wait for the peer's response.
    ///
    /// A JSON-RPC error from the peer is returned as a response, not an
    /// `Err`. Waiting longer than the configured request timeout fails with
    /// [`SignError::Timeout`]; a response arriving after that is dropped.
    #[instrument(skip_all, fields(topic = %topic, method = %request.request.method))]
    pub async fn session_request(
        &self,
        topic: &Topic,
        request: SessionRequestParams,
    ) -> Result<JsonRpcResponse> {
        let session = self.valid_session(topic).await?;
        validate_session_request(&request)?;
        validate_method_authorization(
            &request.chain_id,
            &request.request.method,
            &session.namespaces,
        )?;

        let response = self
            .request_and_wait(
                topic,
                RpcParams::SessionRequest(request),
                self.config.request_timeout(),
                "session request",
            )
            .await?;
        Ok(response.response)
    }

    /// Answer a session request received from the peer.
    #[instrument(skip_all, fields(topic = %topic, id = response.id()))]
    pub async fn respond_session_request(
        &self,
        topic: &Topic,
        response: JsonRpcResponse,
    ) -> Result<()> {
        self.valid_session(topic).await?;
        let irn = IrnParams::new(Tag::SessionRequestResponse, Ttl(FIVE_MINUTES_IN_SECONDS));
        self.interactor.publish_response(topic, response, irn).await
    }

    /// Ping the peer of a session or pairing and wait for its answer.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn ping(&self, topic: &Topic) -> Result<()> {
        let params = if self.storage.is_session_valid(topic).await? {
            RpcParams::SessionPing
        } else if self.storage.is_pairing_valid(topic).await? {
            RpcParams::PairingPing
        } else {
            return Err(SignError::no_sequence(topic));
        };

        let response = self
            .request_and_wait(topic, params, self.config.ping_timeout(), "ping")
            .await?;
        response.response.into_result().map(|_| ())
    }

    /// Emit an event to the peer of a session this side controls.
    #[instrument(skip_all, fields(topic = %topic, event = %event.event.name))]
    pub async fn emit(&self, topic: &Topic, event: EventParams) -> Result<()> {
        let session = self.valid_session(topic).await?;
        Self::require_controller(&session)?;
        validate_event(&event)?;
        validate_event_authorization(&event.chain_id, &event.event.name, &session.namespaces)?;

        self.interactor
            .publish_request(topic, RpcParams::SessionEvent(event))
            .await
            .map(|_| ())
    }

    /// Push a controlled session's expiry one week further.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn extend(&self, topic: &Topic) -> Result<Expiry> {
        let session = self.valid_session(topic).await?;
        Self::require_controller(&session)?;
        Self::require_acknowledged(&session)?;

        let expiry = session.expiry.extended_by(WEEK_IN_SECONDS);
        validate_extend(expiry.seconds(), session.expiry.seconds())?;
        self.storage.extend_session(topic, expiry).await?;
        self.interactor
            .publish_request(
                topic,
                RpcParams::SessionExtend(ExtendParams {
                    expiry: expiry.seconds(),
                }),
            )
            .await?;
        Ok(expiry)
    }

    /// End a session.
    ///
    /// The delete notice is sealed first; the session and its keys are gone
    /// before the notice goes out, and a failed publish is only logged.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn disconnect(&self, topic: &Topic) -> Result<()> {
        if !self.storage.is_session_valid(topic).await? {
            return Err(SignError::no_sequence(topic));
        }

        let sealed = self.interactor.seal_request(
            topic,
            RpcParams::SessionDelete(PeerError::user_disconnected().into()),
        )?;
        self.storage.delete_session(topic).await?;
        self.interactor.clear_pending(topic);
        self.release_topic(topic).await;

        match self.interactor.publish_sealed(sealed).await {
            Ok(id) => self.interactor.forget_request(id),
            Err(e) => warn!(topic = %topic, error = %e, "delete notice not delivered"),
        }
        info!(topic = %topic, "session disconnected");
        Ok(())
    }

    // ----- queries -----

    /// Acknowledged, unexpired sessions.
    pub async fn settled_sessions(&self) -> Result<Vec<Session>> {
        let now = current_timestamp();
        Ok(self
            .storage
            .list_sessions()
            .await?
            .into_iter()
            .filter(|s| s.is_acknowledged && !s.is_expired_at(now))
            .collect())
    }

    /// Unexpired pairings.
    pub async fn settled_pairings(&self) -> Result<Vec<Pairing>> {
        let now = current_timestamp();
        Ok(self
            .storage
            .list_pairings()
            .await?
            .into_iter()
            .filter(|p| !p.is_expired_at(now))
            .collect())
    }

    /// Session requests from the peer not yet answered.
    pub async fn pending_requests(&self, topic: &Topic) -> Result<Vec<SessionRequest>> {
        let session = self.valid_session(topic).await?;
        let peer_metadata = session.peer_metadata().cloned();
        Ok(self
            .interactor
            .pending_requests(topic)
            .into_iter()
            .filter_map(|request| match request.params {
                RpcParams::SessionRequest(params) => Some(SessionRequest {
                    topic: request.topic,
                    request_id: request.id,
                    chain_id: params.chain_id,
                    method: params.request.method,
                    params: params.request.params,
                    peer_metadata: peer_metadata.clone(),
                }),
                _ => None,
            })
            .collect())
    }

    /// Whether a proposal from `proposer_public_key` is pending.
    pub fn has_pending_proposal(&self, proposer_public_key: &PublicKey) -> bool {
        self.proposals.contains(proposer_public_key)
    }

    /// Tear down expired sequences and lapsed proposals, resubscribe live
    /// sequences.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let lapsed = self.proposals.prune_expired(current_timestamp());
        if !lapsed.is_empty() {
            debug!(count = lapsed.len(), "unanswered proposals dropped");
        }
        self.forget_proposals(lapsed);

        let report = self.supervisor.sweep_now().await?;
        for topic in &report.expired_pairings {
            self.forget_proposals(self.proposals.remove_for_pairing(topic));
        }
        Ok(report)
    }

    // ----- helpers -----

    async fn valid_session(&self, topic: &Topic) -> Result<Session> {
        if !self.storage.is_session_valid(topic).await? {
            return Err(SignError::no_sequence(topic));
        }
        self.storage
            .get_session(topic)
            .await?
            .ok_or_else(|| SignError::no_sequence(topic))
    }

    async fn valid_pairing(&self, topic: &Topic) -> Result<Pairing> {
        if !self.storage.is_pairing_valid(topic).await? {
            return Err(SignError::no_sequence(topic));
        }
        self.storage
            .get_pairing(topic)
            .await?
            .ok_or_else(|| SignError::no_sequence(topic))
    }

    fn require_controller(session: &Session) -> Result<()> {
        if session.is_self_controller() {
            Ok(())
        } else {
            Err(SignError::UnauthorizedPeer(format!(
                "not the controller of session {}",
                session.topic
            )))
        }
    }

    fn require_acknowledged(session: &Session) -> Result<()> {
        if session.is_acknowledged {
            Ok(())
        } else {
            Err(SignError::SessionNotAcknowledged(session.topic.to_string()))
        }
    }

    /// Publish a request and wait up to `timeout` for its response.
    async fn request_and_wait(
        &self,
        topic: &Topic,
        params: RpcParams,
        timeout: Duration,
        operation: &str,
    ) -> Result<WcResponse> {
        // Subscribe before publishing so a fast answer is not missed.
        let mut responses = self.interactor.responses();
        let id = self.interactor.publish_request(topic, params).await?;

        match tokio::time::timeout(timeout, wait_for_response(&mut responses, id)).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(SignError::Internal("response stream closed".into())),
            Err(_) => {
                self.interactor.forget_request(id);
                warn!(topic = %topic, id, operation, "no response before timeout");
                Err(SignError::timeout(operation, timeout))
            }
        }
    }

    /// Erase key pairs generated for proposals that will never settle. Keys
    /// of remote proposers are not held, so erasing them is a no-op.
    fn forget_proposals(&self, proposers: Vec<PublicKey>) {
        for proposer in proposers {
            if let Err(e) = self.keys.remove_key_pair(&proposer) {
                warn!(proposer = %proposer, error = %e, "failed to erase proposal key pair");
            }
        }
    }

    /// Roll back a pairing row written earlier in a failed operation.
    async fn discard_pairing(&self, topic: &Topic) {
        if let Err(e) = self.storage.delete_pairing(topic).await {
            warn!(topic = %topic, error = %e, "failed to drop partial pairing");
        }
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

    fn publish_event(&self, event: EngineEvent) {
        // No receivers is fine; events are fire-and-forget.
        let _ = self.events.send(event);
    }

    // ----- event loop -----

    async fn run(self: Arc<Self>, mut streams: EventStreams) {
        let mut sweep = self
            .config
            .sweep_interval()
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));
        let mut connection_open = true;
        let mut expired_open = true;
        let mut errors_open = true;

        if *streams.connection.borrow_and_update() {
            self.on_connection_state(true).await;
        }

        loop {
            tokio::select! {
                message = streams.messages.recv() => match message {
                    Ok(Inbound::Request(request)) => self.on_request(request).await,
                    Ok(Inbound::Response(response)) => self.on_response(response).await,
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "inbound stream lagged"),
                    Err(RecvError::Closed) => break,
                },
                error = streams.errors.recv(), if errors_open => match error {
                    Ok(error) => self.publish_event(EngineEvent::SdkError(error)),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => errors_open = false,
                },
                changed = streams.connection.changed(), if connection_open => match changed {
                    Ok(()) => {
                        let available = *streams.connection.borrow_and_update();
                        self.on_connection_state(available).await;
                    }
                    Err(_) => connection_open = false,
                },
                topic = streams.expired.recv(), if expired_open => match topic {
                    Ok(topic) => {
                        self.supervisor.on_topic_expired(&topic).await;
                        self.forget_proposals(self.proposals.remove_for_pairing(&topic));
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "expiry stream lagged"),
                    Err(RecvError::Closed) => expired_open = false,
                },
                _ = next_tick(&mut sweep) => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "periodic sweep failed");
                    }
                }
            }
        }
        debug!("event loop stopped");
    }

    async fn on_connection_state(&self, available: bool) {
        info!(available, "relay connection changed");
        self.publish_event(EngineEvent::ConnectionState {
            is_available: available,
        });
        if available {
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "resubscribe sweep failed");
                self.publish_event(EngineEvent::SdkError(e));
            }
        }
    }
}

struct EventStreams {
    messages: broadcast::Receiver<Inbound>,
    errors: broadcast::Receiver<SignError>,
    connection: tokio::sync::watch::Receiver<bool>,
    expired: broadcast::Receiver<Topic>,
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn wait_for_response(
    responses: &mut broadcast::Receiver<WcResponse>,
    id: u64,
) -> Option<WcResponse> {
    loop {
        match responses.recv().await {
            Ok(response) if response.id() == id => return Some(response),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "response stream lagged while waiting");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}
