//! Relay interactor.
//!
//! Sits between the engine and the raw relay: seals outbound JSON-RPC
//! messages with the topic's key, opens inbound envelopes and decodes them.
//! Requests and responses leave on one [`Inbound`] stream in relay delivery
//! order. Responses are correlated by id with the outbound request they
//! answer, so handlers see the original method and params; they are also
//! fanned out on a response-only stream for callers awaiting one id.
//!
//! Outbound history is kept for the relay TTL of each request and dropped
//! with the topic on teardown.
//!
//! # Thread Safety
//!
//! Request history is guarded by `std::sync::Mutex`; no lock is held across
//! an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use signkit_lib::crypto::KeyManagement;
use signkit_lib::{IrnParams, RelayMessage, RelayTransport, Result, SignError, Topic};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::rpc::{response_irn_params, JsonRpcRequest, JsonRpcResponse, PeerError, RpcParams};

/// A decoded inbound request.
#[derive(Clone, Debug, PartialEq)]
pub struct WcRequest {
    pub topic: Topic,
    pub id: u64,
    pub params: RpcParams,
}

impl WcRequest {
    pub fn method(&self) -> &'static str {
        self.params.method()
    }
}

/// A decoded inbound response, joined with the request it answers.
#[derive(Clone, Debug, PartialEq)]
pub struct WcResponse {
    pub topic: Topic,
    /// Params of the outbound request.
    pub params: RpcParams,
    pub response: JsonRpcResponse,
}

impl WcResponse {
    pub fn id(&self) -> u64 {
        self.response.id()
    }
}

/// Inbound traffic in relay delivery order.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Request(WcRequest),
    Response(WcResponse),
}

/// A request sealed for its topic but not yet published.
///
/// Sealing ahead of publishing lets a caller erase the topic's keys in
/// between, as `disconnect` does.
#[derive(Clone, Debug)]
pub struct SealedRequest {
    pub id: u64,
    pub topic: Topic,
    pub params: RpcParams,
    envelope: Vec<u8>,
}

struct Outbound {
    topic: Topic,
    params: RpcParams,
    expires_at: Instant,
}

/// JSON-RPC layer over a relay transport and a key directory.
pub struct JsonRpcInteractor {
    relay: Arc<dyn RelayTransport>,
    keys: Arc<dyn KeyManagement>,
    inbound: Mutex<Option<broadcast::Receiver<RelayMessage>>>,
    outbound: Mutex<HashMap<u64, Outbound>>,
    pending: Mutex<BTreeMap<u64, WcRequest>>,
    messages: broadcast::Sender<Inbound>,
    responses: broadcast::Sender<WcResponse>,
    errors: broadcast::Sender<SignError>,
}

fn lock_error(context: &str) -> SignError {
    SignError::Internal(format!("JsonRpcInteractor: lock poisoned during {}", context))
}

impl JsonRpcInteractor {
    /// Create an interactor; inbound relay messages are buffered from here on.
    ///
    /// Streams hold at least one message whatever `capacity` says.
    pub fn new(
        relay: Arc<dyn RelayTransport>,
        keys: Arc<dyn KeyManagement>,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        let inbound = relay.inbound();
        let (messages, _) = broadcast::channel(capacity);
        let (responses, _) = broadcast::channel(capacity);
        let (errors, _) = broadcast::channel(capacity);
        Self {
            relay,
            keys,
            inbound: Mutex::new(Some(inbound)),
            outbound: Mutex::new(HashMap::new()),
            pending: Mutex::new(BTreeMap::new()),
            messages,
            responses,
            errors,
        }
    }

    /// Decoded inbound requests and responses, in delivery order.
    pub fn messages(&self) -> broadcast::Receiver<Inbound> {
        self.messages.subscribe()
    }

    /// Decoded inbound responses only.
    pub fn responses(&self) -> broadcast::Receiver<WcResponse> {
        self.responses.subscribe()
    }

    /// Errors raised while processing inbound traffic.
    pub fn internal_errors(&self) -> broadcast::Receiver<SignError> {
        self.errors.subscribe()
    }

    /// Relay connectivity.
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.relay.connection_state()
    }

    /// Process inbound relay traffic until the relay closes its stream.
    ///
    /// Only the first call does anything; the relay stream is consumed once.
    pub async fn pump(self: Arc<Self>) {
        let inbound = match self.inbound.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(mut inbound) = inbound else {
            warn!("relay inbound stream already taken");
            return;
        };

        loop {
            match inbound.recv().await {
                Ok(message) => self.handle_inbound(message).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "relay inbound lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("relay inbound stream closed");
    }

    pub async fn subscribe(&self, topic: &Topic) -> Result<()> {
        debug!(topic = %topic, "subscribe");
        self.relay.subscribe(topic).await
    }

    pub async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        debug!(topic = %topic, "unsubscribe");
        self.relay.unsubscribe(topic).await
    }

    /// Seal a request with a fresh id for `topic`.
    pub fn seal_request(&self, topic: &Topic, params: RpcParams) -> Result<SealedRequest> {
        let request = JsonRpcRequest::new(&params)?;
        let payload = serde_json::to_vec(&request)?;
        let envelope = self.keys.encrypt(topic, &payload)?;
        Ok(SealedRequest {
            id: request.id,
            topic: topic.clone(),
            params,
            envelope,
        })
    }

    /// Publish a sealed request and remember it for response correlation.
    pub async fn publish_sealed(&self, sealed: SealedRequest) -> Result<u64> {
        let SealedRequest {
            id,
            topic,
            params,
            envelope,
        } = sealed;
        let irn = params.irn_params();
        let method = params.method();

        {
            let mut outbound = self
                .outbound
                .lock()
                .map_err(|_| lock_error("publish_sealed"))?;
            let now = Instant::now();
            outbound.retain(|_, o| o.expires_at > now);
            outbound.insert(
                id,
                Outbound {
                    topic: topic.clone(),
                    params,
                    expires_at: now + irn.ttl.as_duration(),
                },
            );
        }

        if let Err(e) = self.relay.publish(&topic, envelope, irn).await {
            if let Ok(mut outbound) = self.outbound.lock() {
                outbound.remove(&id);
            }
            warn!(topic = %topic, id, method, error = %e, "publish request failed");
            return Err(e);
        }

        debug!(topic = %topic, id, method, "request published");
        Ok(id)
    }

    /// Seal and publish a request, returning its id.
    pub async fn publish_request(&self, topic: &Topic, params: RpcParams) -> Result<u64> {
        let sealed = self.seal_request(topic, params)?;
        self.publish_sealed(sealed).await
    }

    /// Forget an outbound request; a later response to it is dropped.
    pub fn forget_request(&self, id: u64) {
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.remove(&id);
        }
    }

    /// Answer `request` with a result.
    pub async fn respond_success(&self, request: &WcRequest, result: Value) -> Result<()> {
        let response = JsonRpcResponse::success(request.id, result);
        self.respond(request, response).await
    }

    /// Answer `request` with a peer error.
    pub async fn respond_error(&self, request: &WcRequest, error: PeerError) -> Result<()> {
        debug!(
            topic = %request.topic,
            id = request.id,
            code = error.code,
            message = %error.message,
            "responding with error"
        );
        let response = JsonRpcResponse::error(request.id, error);
        self.respond(request, response).await
    }

    /// Answer `request` with a prepared response.
    pub async fn respond(&self, request: &WcRequest, response: JsonRpcResponse) -> Result<()> {
        let irn = request.params.response_irn_params();
        self.publish_response(&request.topic, response, irn).await
    }

    /// Seal and publish a response on `topic`, settling the pending request
    /// with the same id.
    pub async fn publish_response(
        &self,
        topic: &Topic,
        response: JsonRpcResponse,
        irn: IrnParams,
    ) -> Result<()> {
        let id = response.id();
        let payload = serde_json::to_vec(&response)?;
        let envelope = self.keys.encrypt(topic, &payload)?;

        self.relay.publish(topic, envelope, irn).await?;
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
        debug!(topic = %topic, id, "response published");
        Ok(())
    }

    /// Inbound session requests on `topic` still awaiting the app's answer.
    pub fn pending_requests(&self, topic: &Topic) -> Vec<WcRequest> {
        self.pending
            .lock()
            .map(|p| p.values().filter(|r| &r.topic == topic).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop pending inbound requests and outbound history of a topic being
    /// torn down.
    pub fn clear_pending(&self, topic: &Topic) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|_, r| &r.topic != topic);
        }
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.retain(|_, o| &o.topic != topic);
        }
    }

    /// Number of outbound requests still awaiting a response.
    pub fn outbound_len(&self) -> usize {
        self.outbound.lock().map(|o| o.len()).unwrap_or(0)
    }

    async fn handle_inbound(&self, message: RelayMessage) {
        let RelayMessage { topic, message } = message;

        let payload = match self.keys.decrypt(&topic, &message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic = %topic, error = %e, "dropping undecryptable message");
                let _ = self.errors.send(e);
                return;
            }
        };

        let value: Value = match serde_json::from_slice(&payload) {
            Ok(value) => value,
            Err(e) => {
                let _ = self.errors.send(e.into());
                return;
            }
        };

        if value.get("method").is_some() {
            self.handle_request(topic, value).await;
        } else {
            self.handle_response(topic, value);
        }
    }

    async fn handle_request(&self, topic: Topic, value: Value) {
        let id = value.get("id").and_then(Value::as_u64);
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let decoded = serde_json::from_value::<JsonRpcRequest>(value)
            .map_err(SignError::from)
            .and_then(|request| Ok((request.id, request.decode_params()?)));
        let (id, params) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(topic = %topic, id, method = %method, error = %e, "undecodable request");
                if let Some(id) = id {
                    self.reject_undecodable(&topic, id, &method, &e).await;
                }
                let _ = self.errors.send(e);
                return;
            }
        };

        let request = WcRequest { topic, id, params };
        debug!(topic = %request.topic, id = request.id, method = request.method(), "request received");

        if matches!(request.params, RpcParams::SessionRequest(_)) {
            if let Ok(mut pending) = self.pending.lock() {
                pending.insert(request.id, request.clone());
            }
        }
        let _ = self.messages.send(Inbound::Request(request));
    }

    /// Tell the sender its request could not be understood.
    async fn reject_undecodable(&self, topic: &Topic, id: u64, method: &str, error: &SignError) {
        let response = JsonRpcResponse::error(id, PeerError::invalid_method(&error.to_string()));
        if let Err(e) = self
            .publish_response(topic, response, response_irn_params(method))
            .await
        {
            debug!(topic = %topic, id, error = %e, "error response dropped");
        }
    }

    fn handle_response(&self, topic: Topic, value: Value) {
        let response: JsonRpcResponse = match serde_json::from_value(value) {
            Ok(response) => response,
            Err(e) => {
                let _ = self.errors.send(e.into());
                return;
            }
        };

        let outbound = self
            .outbound
            .lock()
            .ok()
            .and_then(|mut outbound| outbound.remove(&response.id()))
            .filter(|outbound| outbound.expires_at > Instant::now());
        let Some(outbound) = outbound else {
            debug!(topic = %topic, id = response.id(), "dropping uncorrelated response");
            return;
        };
        if outbound.topic != topic {
            warn!(topic = %topic, expected = %outbound.topic, id = response.id(), "response on unexpected topic");
        }

        debug!(topic = %topic, id = response.id(), method = outbound.params.method(), "response received");
        let response = WcResponse {
            topic,
            params: outbound.params,
            response,
        };
        let _ = self.responses.send(response.clone());
        let _ = self.messages.send(Inbound::Response(response));
    }
}
