//! Inbound response handlers.

use signkit_lib::{Expiry, Result, SignError, MONTH_IN_SECONDS};
use tracing::{debug, info, warn};

use super::SignEngine;
use crate::events::{EngineEvent, SettledSessionResponse, UpdateNamespacesResponse};
use crate::interactor::WcResponse;
use crate::rpc::{
    ApprovalParams, JsonRpcResponse, RpcParams, SessionProposeParams, SessionRequestParams,
};

impl SignEngine {
    pub(super) async fn on_response(&self, response: WcResponse) {
        let method = response.params.method();
        let result = match response.params.clone() {
            RpcParams::SessionPropose(params) => {
                self.on_session_proposal_response(&response, params).await
            }
            RpcParams::SessionSettle(_) => self.on_session_settle_response(&response).await,
            RpcParams::SessionUpdate(_) => self.on_session_update_response(&response).await,
            RpcParams::SessionRequest(params) => {
                self.on_session_request_response(&response, params);
                Ok(())
            }
            _ => {
                if let Some(message) = response.response.error_message() {
                    debug!(topic = %response.topic, method, reason = message, "peer answered with an error");
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(topic = %response.topic, id = response.id(), method, error = %e, "response handling failed");
            self.publish_event(EngineEvent::SdkError(e));
        }
    }

    async fn on_session_proposal_response(
        &self,
        response: &WcResponse,
        params: SessionProposeParams,
    ) -> Result<()> {
        let pairing_topic = &response.topic;
        if !self.storage.is_pairing_valid(pairing_topic).await? {
            debug!(topic = %pairing_topic, "proposal answered on an unknown pairing");
            return Ok(());
        }
        let Some(pairing) = self.storage.get_pairing(pairing_topic).await? else {
            return Ok(());
        };

        match &response.response {
            JsonRpcResponse::Result(result) => {
                if !pairing.is_active {
                    self.storage
                        .activate_pairing(pairing_topic, Expiry::in_seconds(MONTH_IN_SECONDS))
                        .await?;
                }
                let approval: ApprovalParams = serde_json::from_value(result.result.clone())?;
                let session_topic = self.keys.generate_topic_from_key_agreement(
                    &params.proposer.public_key,
                    &approval.responder_public_key,
                )?;
                self.interactor.subscribe(&session_topic).await?;
                info!(pairing = %pairing_topic, session = %session_topic, "proposal approved, awaiting settlement");
            }
            JsonRpcResponse::Error(error) => {
                self.proposals.remove(&params.proposer.public_key);
                self.forget_proposals(vec![params.proposer.public_key.clone()]);
                if !pairing.is_active {
                    self.release_topic(pairing_topic).await;
                    self.storage.delete_pairing(pairing_topic).await?;
                }
                info!(pairing = %pairing_topic, code = error.error.code, "proposal rejected");
                self.publish_event(EngineEvent::SessionRejected {
                    topic: pairing_topic.clone(),
                    reason: error.error.message.clone(),
                });
            }
        }
        Ok(())
    }

    async fn on_session_settle_response(&self, response: &WcResponse) -> Result<()> {
        let topic = &response.topic;
        if !self.storage.is_session_valid(topic).await? {
            return Ok(());
        }
        let Some(mut session) = self.storage.get_session(topic).await? else {
            return Ok(());
        };

        match &response.response {
            JsonRpcResponse::Result(_) => {
                self.storage.acknowledge_session(topic).await?;
                session.is_acknowledged = true;
                info!(topic = %topic, "settlement acknowledged");
                self.publish_event(EngineEvent::SettledSessionResponse(
                    SettledSessionResponse::Result(session),
                ));
            }
            JsonRpcResponse::Error(error) => {
                self.interactor.clear_pending(topic);
                if let Err(e) = self.interactor.unsubscribe(topic).await {
                    warn!(topic = %topic, error = %e, "unsubscribe failed");
                }
                self.storage.delete_session(topic).await?;
                if let Err(e) = self.keys.remove_keys(topic) {
                    warn!(topic = %topic, error = %e, "failed to erase keys");
                }
                info!(topic = %topic, code = error.error.code, "settlement refused");
                self.publish_event(EngineEvent::SettledSessionResponse(
                    SettledSessionResponse::Error {
                        topic: topic.clone(),
                        reason: error.error.message.clone(),
                    },
                ));
            }
        }
        Ok(())
    }

    async fn on_session_update_response(&self, response: &WcResponse) -> Result<()> {
        let topic = &response.topic;
        let id = response.id();
        if !self.storage.is_session_valid(topic).await? {
            return Ok(());
        }
        if !self.storage.is_update_response_valid(topic, id).await? {
            debug!(topic = %topic, id, "ignoring response to a superseded update");
            return Ok(());
        }

        let event = match &response.response {
            JsonRpcResponse::Result(_) => {
                let staged = self
                    .storage
                    .get_temp_namespaces(id)
                    .await?
                    .ok_or_else(|| SignError::Storage(format!("no staged namespaces for {}", id)))?;
                match self
                    .storage
                    .replace_namespaces(topic, staged.namespaces.clone(), id)
                    .await
                {
                    Ok(()) => {
                        self.storage.mark_temp_namespaces_acknowledged(id).await?;
                        UpdateNamespacesResponse::Result {
                            topic: topic.clone(),
                            namespaces: staged.namespaces,
                        }
                    }
                    Err(e) => {
                        warn!(topic = %topic, id, error = %e, "failed to commit namespaces");
                        UpdateNamespacesResponse::Error {
                            topic: topic.clone(),
                            reason: "Unable to update the session".to_string(),
                        }
                    }
                }
            }
            JsonRpcResponse::Error(error) => {
                self.storage.delete_temp_namespaces(id).await?;
                UpdateNamespacesResponse::Error {
                    topic: topic.clone(),
                    reason: error.error.message.clone(),
                }
            }
        };
        self.publish_event(EngineEvent::SessionUpdateNamespacesResponse(event));
        Ok(())
    }

    fn on_session_request_response(&self, response: &WcResponse, params: SessionRequestParams) {
        self.publish_event(EngineEvent::SessionRequestResponse {
            topic: response.topic.clone(),
            chain_id: params.chain_id,
            method: params.request.method,
            response: response.response.clone(),
        });
    }
}
