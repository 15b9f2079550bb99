//! Inbound request handlers.
//!
//! Each handler checks its preconditions, answers the peer with a peer
//! error when they fail, and otherwise updates state, acknowledges and
//! publishes an event. Failures with no peer to tell surface as
//! [`EngineEvent::SdkError`].

use serde_json::Value;
use signkit_lib::{Expiry, Result, Topic};
use tracing::{debug, info, warn};

use super::SignEngine;
use crate::events::{self, EngineEvent};
use crate::interactor::WcRequest;
use crate::proposals::PendingProposal;
use crate::rpc::{
    DeleteParams, EventParams, ExtendParams, Participant, PeerError, RpcParams, Sequence,
    SessionProposeParams, SessionRequestParams, SessionSettleParams, UpdateNamespacesParams,
};
use crate::sequence::Session;
use crate::validator::{
    validate_event, validate_event_authorization, validate_extend,
    validate_method_authorization, validate_proposal_namespaces, validate_session_namespaces,
    validate_session_request,
};

impl SignEngine {
    pub(super) async fn on_request(&self, request: WcRequest) {
        let method = request.method();
        let result = match request.params.clone() {
            RpcParams::SessionPropose(params) => self.on_session_propose(&request, params).await,
            RpcParams::SessionSettle(params) => self.on_session_settle(&request, params).await,
            RpcParams::SessionRequest(params) => self.on_session_request(&request, params).await,
            RpcParams::SessionDelete(params) => self.on_session_delete(&request, params).await,
            RpcParams::PairingDelete(params) => self.on_pairing_delete(&request, params).await,
            RpcParams::SessionEvent(params) => self.on_session_event(&request, params).await,
            RpcParams::SessionUpdate(params) => self.on_session_update(&request, params).await,
            RpcParams::SessionExtend(params) => self.on_session_extend(&request, params).await,
            RpcParams::SessionPing => self.on_ping(&request, Sequence::Session).await,
            RpcParams::PairingPing => self.on_ping(&request, Sequence::Pairing).await,
        };

        if let Err(e) = result {
            warn!(topic = %request.topic, id = request.id, method, error = %e, "request handling failed");
            self.publish_event(EngineEvent::SdkError(e));
        }
    }

    /// Answer with a peer error. Losing the answer is only logged: the
    /// topic's keys may already be gone.
    async fn reply_error(&self, request: &WcRequest, error: PeerError) {
        if let Err(e) = self.interactor.respond_error(request, error).await {
            debug!(topic = %request.topic, id = request.id, error = %e, "error response dropped");
        }
    }

    async fn reply_ok(&self, request: &WcRequest) -> Result<()> {
        self.interactor
            .respond_success(request, Value::Bool(true))
            .await
    }

    /// Reject a request on a topic with no valid session.
    async fn reply_no_session(&self, request: &WcRequest) {
        self.reply_error(
            request,
            PeerError::no_matching_topic(Sequence::Session, request.topic.as_str()),
        )
        .await
    }

    /// The session on the request's topic, if stored and unexpired.
    async fn session_for(&self, topic: &Topic) -> Result<Option<Session>> {
        if !self.storage.is_session_valid(topic).await? {
            return Ok(None);
        }
        Ok(self.storage.get_session(topic).await?)
    }

    async fn on_session_propose(
        &self,
        request: &WcRequest,
        params: SessionProposeParams,
    ) -> Result<()> {
        if let Err(e) = validate_proposal_namespaces(&params.required_namespaces) {
            self.reply_error(request, e.to_peer_error()).await;
            return Ok(());
        }

        let proposer = params.proposer.public_key.clone();
        self.proposals
            .insert(proposer.clone(), PendingProposal::from_request(request.clone())?)?;

        info!(topic = %request.topic, proposer = %proposer, "session proposal received");
        self.publish_event(EngineEvent::SessionProposal(events::SessionProposal {
            pairing_topic: request.topic.clone(),
            request_id: request.id,
            proposer_public_key: proposer,
            metadata: params.proposer.metadata,
            namespaces: params.required_namespaces,
            relays: params.relays,
        }));
        Ok(())
    }

    async fn on_session_settle(
        &self,
        request: &WcRequest,
        params: SessionSettleParams,
    ) -> Result<()> {
        let topic = request.topic.clone();
        let Ok((self_public, _)) = self.keys.get_key_agreement(&topic) else {
            debug!(topic = %topic, "settlement on a topic with no key agreement");
            return Ok(());
        };
        let Ok(proposal) = self.proposals.get(&self_public) else {
            debug!(topic = %topic, "settlement without a pending proposal");
            return Ok(());
        };

        if let Err(e) =
            validate_session_namespaces(&params.namespaces, &proposal.params.required_namespaces)
        {
            self.reply_error(request, e.to_peer_error()).await;
            return Ok(());
        }

        let proposal = self.proposals.take(&self_public)?;
        let self_participant = Participant {
            public_key: self_public.clone(),
            metadata: self.config.metadata.clone(),
        };
        let session = Session::acknowledged(
            topic.clone(),
            &params,
            request.id,
            self_participant,
            proposal.params.required_namespaces.clone(),
        );

        if let Err(e) = self.storage.insert_session(session.clone()).await {
            warn!(topic = %topic, error = %e, "failed to persist settled session");
            self.proposals.insert(self_public, proposal)?;
            if let Err(cleanup) = self.storage.delete_session(&topic).await {
                debug!(topic = %topic, error = %cleanup, "no session row to drop");
            }
            self.reply_error(
                request,
                PeerError::session_settlement_failed(&e.to_string()),
            )
            .await;
            return Err(e.into());
        }

        if let Err(e) = self
            .storage
            .upsert_pairing_peer_metadata(&proposal.request.topic, params.controller.metadata)
            .await
        {
            debug!(topic = %proposal.request.topic, error = %e, "pairing metadata not stored");
        }

        self.reply_ok(request).await?;
        info!(topic = %topic, "session approved");
        self.publish_event(EngineEvent::SessionApproved(session));
        Ok(())
    }

    async fn on_session_request(
        &self,
        request: &WcRequest,
        params: SessionRequestParams,
    ) -> Result<()> {
        if let Err(e) = validate_session_request(&params) {
            self.reply_error(request, e.to_peer_error()).await;
            return Ok(());
        }
        let Some(session) = self.session_for(&request.topic).await? else {
            self.reply_no_session(request).await;
            return Ok(());
        };
        if let Err(e) = validate_method_authorization(
            &params.chain_id,
            &params.request.method,
            &session.namespaces,
        ) {
            self.reply_error(request, e.to_peer_error()).await;
            return Ok(());
        }

        self.publish_event(EngineEvent::SessionRequest(events::SessionRequest {
            topic: request.topic.clone(),
            request_id: request.id,
            chain_id: params.chain_id,
            method: params.request.method,
            params: params.request.params,
            peer_metadata: session.peer_metadata().cloned(),
        }));
        Ok(())
    }

    async fn on_session_delete(&self, request: &WcRequest, params: DeleteParams) -> Result<()> {
        let topic = &request.topic;
        if self.session_for(topic).await?.is_none() {
            self.reply_no_session(request).await;
            return Ok(());
        }

        self.storage.delete_session(topic).await?;
        self.interactor.clear_pending(topic);
        self.release_topic(topic).await;

        info!(topic = %topic, code = params.code, "session deleted by peer");
        self.publish_event(EngineEvent::SessionDeleted {
            topic: topic.clone(),
            reason: params.message,
        });
        Ok(())
    }

    async fn on_pairing_delete(&self, request: &WcRequest, params: DeleteParams) -> Result<()> {
        let topic = &request.topic;
        if !self.storage.is_pairing_valid(topic).await? {
            self.reply_error(
                request,
                PeerError::no_matching_topic(Sequence::Pairing, topic.as_str()),
            )
            .await;
            return Ok(());
        }

        self.interactor.clear_pending(topic);
        self.release_topic(topic).await;
        self.forget_proposals(self.proposals.remove_for_pairing(topic));
        self.storage.delete_pairing(topic).await?;

        info!(topic = %topic, code = params.code, "pairing deleted by peer");
        self.publish_event(EngineEvent::DeletedPairing {
            topic: topic.clone(),
            reason: params.message,
        });
        Ok(())
    }

    async fn on_session_event(&self, request: &WcRequest, params: EventParams) -> Result<()> {
        if let Err(e) = validate_event(&params) {
            self.reply_error(request, e.to_peer_error()).await;
            return Ok(());
        }
        let Some(session) = self.session_for(&request.topic).await? else {
            self.reply_no_session(request).await;
            return Ok(());
        };
        if !session.is_peer_controller() {
            self.reply_error(request, PeerError::unauthorized_peer_event(Sequence::Session))
                .await;
            return Ok(());
        }
        if !session.is_acknowledged {
            self.reply_no_session(request).await;
            return Ok(());
        }
        if let Err(e) = validate_event_authorization(
            &params.chain_id,
            &params.event.name,
            &session.namespaces,
        ) {
            self.reply_error(request, e.to_peer_error()).await;
            return Ok(());
        }

        self.reply_ok(request).await?;
        self.publish_event(EngineEvent::SessionEvent {
            topic: request.topic.clone(),
            chain_id: params.chain_id,
            name: params.event.name,
            data: params.event.data,
        });
        Ok(())
    }

    async fn on_session_update(
        &self,
        request: &WcRequest,
        params: UpdateNamespacesParams,
    ) -> Result<()> {
        let topic = &request.topic;
        let Some(session) = self.session_for(topic).await? else {
            self.reply_no_session(request).await;
            return Ok(());
        };
        if !session.is_peer_controller() {
            self.reply_error(
                request,
                PeerError::unauthorized_update_request(Sequence::Session),
            )
            .await;
            return Ok(());
        }
        if let Err(e) =
            validate_session_namespaces(&params.namespaces, &session.proposal_namespaces)
        {
            self.reply_error(request, PeerError::invalid_update_request(&e.to_string()))
                .await;
            return Ok(());
        }
        if !self
            .storage
            .is_update_request_valid(topic, request.id)
            .await?
        {
            self.reply_error(
                request,
                PeerError::invalid_update_request("update request is older than the namespaces"),
            )
            .await;
            return Ok(());
        }

        if let Err(e) = self
            .storage
            .replace_namespaces(topic, params.namespaces.clone(), request.id)
            .await
        {
            self.reply_error(
                request,
                PeerError::invalid_update_request("namespaces could not be stored"),
            )
            .await;
            return Err(e.into());
        }

        self.reply_ok(request).await?;
        self.publish_event(EngineEvent::SessionUpdateNamespaces {
            topic: topic.clone(),
            namespaces: params.namespaces,
        });
        Ok(())
    }

    async fn on_session_extend(&self, request: &WcRequest, params: ExtendParams) -> Result<()> {
        let topic = &request.topic;
        let Some(session) = self.session_for(topic).await? else {
            self.reply_no_session(request).await;
            return Ok(());
        };
        if !session.is_peer_controller() {
            self.reply_error(
                request,
                PeerError::unauthorized_extend_request(Sequence::Session),
            )
            .await;
            return Ok(());
        }
        if let Err(e) = validate_extend(params.expiry, session.expiry.seconds()) {
            self.reply_error(request, e.to_peer_error()).await;
            return Ok(());
        }

        let expiry = Expiry(params.expiry);
        self.storage.extend_session(topic, expiry).await?;
        self.reply_ok(request).await?;
        self.publish_event(EngineEvent::SessionExtended {
            topic: topic.clone(),
            expiry,
        });
        Ok(())
    }

    async fn on_ping(&self, request: &WcRequest, sequence: Sequence) -> Result<()> {
        let valid = match sequence {
            Sequence::Session => self.storage.is_session_valid(&request.topic).await?,
            Sequence::Pairing => self.storage.is_pairing_valid(&request.topic).await?,
        };
        if !valid {
            self.reply_error(
                request,
                PeerError::no_matching_topic(sequence, request.topic.as_str()),
            )
            .await;
            return Ok(());
        }
        self.reply_ok(request).await
    }
}
