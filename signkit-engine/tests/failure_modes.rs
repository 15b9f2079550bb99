//! Engine failure-mode tests
//!
//! Local validation, authorization, timeouts and rollback when a
//! collaborator fails.

mod mock_implementations;

use mock_implementations::{
    connect, propose, proposal_namespaces, session_namespaces, widened_session_namespaces, Party,
    RawPeer,
};
use serde_json::json;
use signkit_engine::{
    EngineConfig, EngineEvent, EventParams, JsonRpcResponse, ProposalNamespace,
    ProposalNamespaces, SequenceStorage, SessionEventPayload, SessionNamespace, SessionNamespaces,
    SessionRequestParams, SessionRequestPayload,
};
use signkit_lib::crypto::KeyManagement;
use signkit_lib::test_utils::{wallet_metadata, MockRelayHub, TestFixtures};
use signkit_lib::{PublicKey, SignError, Topic};
use std::time::Duration;

fn request(method: &str, chain: &str) -> SessionRequestParams {
    SessionRequestParams {
        request: SessionRequestPayload {
            method: method.to_string(),
            params: "[]".to_string(),
        },
        chain_id: chain.to_string(),
    }
}

fn chain_changed() -> EventParams {
    EventParams {
        event: SessionEventPayload {
            name: "chainChanged".to_string(),
            data: json!(137),
        },
        chain_id: TestFixtures::ETH_MAINNET.to_string(),
    }
}

// =============================================================================
// Unknown topics
// =============================================================================

#[tokio::test]
async fn test_unknown_topic_fails_every_operation() {
    let hub = MockRelayHub::new();
    let party = Party::dapp(&hub);
    let engine = &party.engine;
    let topic = Topic::from("t1");

    let no_sequence =
        |r: signkit_lib::Result<()>| matches!(r, Err(SignError::NoSequenceForTopic(_)));

    assert!(no_sequence(engine.disconnect(&topic).await));
    assert!(no_sequence(engine.ping(&topic).await));
    assert!(no_sequence(engine.emit(&topic, chain_changed()).await));
    assert!(no_sequence(engine.extend(&topic).await.map(|_| ())));
    assert!(no_sequence(
        engine
            .session_update(&topic, session_namespaces())
            .await
            .map(|_| ())
    ));
    assert!(no_sequence(
        engine
            .session_request(&topic, request("personal_sign", TestFixtures::ETH_MAINNET))
            .await
            .map(|_| ())
    ));
    assert!(no_sequence(
        engine
            .respond_session_request(&topic, JsonRpcResponse::success(1, json!(null)))
            .await
    ));
    assert!(no_sequence(
        engine
            .propose_sequence(proposal_namespaces(), None, Some(topic.clone()))
            .await
            .map(|_| ())
    ));
    assert!(no_sequence(engine.pending_requests(&topic).await.map(|_| ())));

    // Nothing reached the relay.
    assert!(party.relay.published_tags().is_empty());
}

// =============================================================================
// Pairing
// =============================================================================

#[tokio::test]
async fn test_pair_twice_fails() {
    let hub = MockRelayHub::new();
    let dapp = Party::dapp(&hub);
    let wallet = Party::wallet(&hub);

    let uri = match dapp
        .engine
        .propose_sequence(proposal_namespaces(), None, None)
        .await
        .unwrap()
    {
        signkit_engine::ProposedSequence::Pairing { uri } => uri,
        other => panic!("unexpected {:?}", other),
    };

    wallet.engine.pair(&uri).await.unwrap();
    let err = wallet.engine.pair(&uri).await.unwrap_err();
    assert!(matches!(err, SignError::PairingAlreadyExists(_)));
}

#[tokio::test]
async fn test_malformed_uri_is_rejected() {
    let hub = MockRelayHub::new();
    let wallet = Party::wallet(&hub);

    for uri in [
        "",
        "https://example.com",
        "wc:abc@2",
        "wc:abc@1?relay-protocol=irn&symKey=00",
    ] {
        let err = wallet.engine.pair(uri).await.unwrap_err();
        assert!(
            matches!(err, SignError::MalformedPairingUri(_)),
            "{} gave {:?}",
            uri,
            err
        );
    }
    assert!(wallet.engine.settled_pairings().await.unwrap().is_empty());
    assert_eq!(wallet.keys.topic_count(), 0);
}

#[tokio::test]
async fn test_pairing_persistence_failure_leaves_nothing() {
    let hub = MockRelayHub::new();
    let dapp = Party::dapp(&hub);
    dapp.storage.fail_pairing_inserts(true);

    let err = dapp
        .engine
        .propose_sequence(proposal_namespaces(), None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, SignError::Storage(_)));
    assert_eq!(dapp.keys.topic_count(), 0);
    assert!(dapp.engine.settled_pairings().await.unwrap().is_empty());
    assert!(dapp.relay.published_tags().is_empty());
}

#[tokio::test]
async fn test_invalid_proposal_namespaces_rejected_locally() {
    let hub = MockRelayHub::new();
    let dapp = Party::dapp(&hub);

    let mismatched = ProposalNamespaces::from([(
        "eip155".to_string(),
        ProposalNamespace::new(
            [TestFixtures::COSMOS_HUB],
            ["personal_sign"],
            Vec::<String>::new(),
        ),
    )]);
    let err = dapp
        .engine
        .propose_sequence(mismatched, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, SignError::InvalidNamespace(_)));
    assert!(dapp.engine.settled_pairings().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_proposal_publish_is_reported() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let (pairing_topic, _) = propose(&mut dapp, &mut wallet).await;
    let published = hub.published_count(&pairing_topic);

    dapp.relay.set_fail_publish(true);
    let err = dapp
        .engine
        .propose_sequence(proposal_namespaces(), None, Some(pairing_topic.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, SignError::Transport(_)));
    assert_eq!(hub.published_count(&pairing_topic), published);
    // The pairing itself is untouched.
    assert!(dapp.storage.is_pairing_valid(&pairing_topic).await.unwrap());
}

// =============================================================================
// Approve and reject
// =============================================================================

#[tokio::test]
async fn test_approve_outside_proposal_keeps_proposal() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let (_, proposal) = propose(&mut dapp, &mut wallet).await;

    let unrequested_method = SessionNamespaces::from([(
        "eip155".to_string(),
        SessionNamespace::new(
            [TestFixtures::account(TestFixtures::ETH_MAINNET, 0)],
            ["eth_signTypedData_v4"],
            Vec::<String>::new(),
        ),
    )]);
    let err = wallet
        .engine
        .approve(&proposal.proposer_public_key, unrequested_method)
        .await
        .unwrap_err();

    assert!(matches!(err, SignError::InvalidNamespace(_)));
    assert!(wallet.engine.settled_sessions().await.unwrap().is_empty());
    assert!(wallet.storage.list_sessions().await.unwrap().is_empty());
    assert!(wallet
        .engine
        .has_pending_proposal(&proposal.proposer_public_key));

    // The proposal can still be approved properly.
    wallet
        .engine
        .approve(&proposal.proposer_public_key, session_namespaces())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reject_twice() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let (_, proposal) = propose(&mut dapp, &mut wallet).await;

    wallet
        .engine
        .reject(&proposal.proposer_public_key, "")
        .await
        .unwrap();
    let err = wallet
        .engine
        .reject(&proposal.proposer_public_key, "")
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::CannotFindSessionProposal(_)));

    let err = wallet
        .engine
        .approve(&proposal.proposer_public_key, session_namespaces())
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::CannotFindSessionProposal(_)));
}

#[tokio::test]
async fn test_unknown_proposer() {
    let hub = MockRelayHub::new();
    let wallet = Party::wallet(&hub);
    let stranger = PublicKey::from_bytes(&[9u8; 32]);

    assert!(matches!(
        wallet.engine.reject(&stranger, "no").await,
        Err(SignError::CannotFindSessionProposal(_))
    ));
}

#[tokio::test]
async fn test_settlement_persistence_failure_rolls_back() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let (_, proposal) = propose(&mut dapp, &mut wallet).await;
    wallet.storage.fail_session_inserts(true);

    let err = wallet
        .engine
        .approve(&proposal.proposer_public_key, session_namespaces())
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::Storage(_)));

    assert!(wallet.storage.list_sessions().await.unwrap().is_empty());
    assert!(wallet
        .engine
        .has_pending_proposal(&proposal.proposer_public_key));
    // Only the pairing key is left.
    assert_eq!(wallet.keys.topic_count(), 1);
    assert!(!wallet
        .relay
        .published_tags()
        .contains(&signkit_lib::Tag::SessionSettle));
}

// =============================================================================
// Controller rules
// =============================================================================

#[tokio::test]
async fn test_non_controller_cannot_mutate_session() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;

    let dapp_before = dapp.session(&topic).await.unwrap();
    let wallet_before = wallet.session(&topic).await.unwrap();
    let published = dapp.relay.published_tags().len();

    let unauthorized =
        |r: signkit_lib::Result<()>| matches!(r, Err(SignError::UnauthorizedPeer(_)));
    assert!(unauthorized(
        dapp.engine
            .session_update(&topic, widened_session_namespaces())
            .await
            .map(|_| ())
    ));
    assert!(unauthorized(dapp.engine.extend(&topic).await.map(|_| ())));
    assert!(unauthorized(dapp.engine.emit(&topic, chain_changed()).await));

    // Nothing was staged, stored or sent.
    assert_eq!(dapp.relay.published_tags().len(), published);
    for (party, before) in [(&dapp, &dapp_before), (&wallet, &wallet_before)] {
        let after = party.session(&topic).await.unwrap();
        assert_eq!(after.namespaces, before.namespaces);
        assert_eq!(after.namespaces_request_id, before.namespaces_request_id);
        assert_eq!(after.expiry, before.expiry);
    }
    assert!(wallet
        .next_matching(|e| is_session_change(e), Duration::from_millis(300))
        .await
        .is_none());
}

#[tokio::test]
async fn test_update_before_acknowledgement_fails() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let (_, proposal) = propose(&mut dapp, &mut wallet).await;
    drop(dapp);

    let topic = wallet
        .engine
        .approve(&proposal.proposer_public_key, session_namespaces())
        .await
        .unwrap();

    assert!(matches!(
        wallet.engine.session_update(&topic, session_namespaces()).await,
        Err(SignError::SessionNotAcknowledged(_))
    ));
    assert!(matches!(
        wallet.engine.extend(&topic).await,
        Err(SignError::SessionNotAcknowledged(_))
    ));
}

#[tokio::test]
async fn test_update_outside_proposal_is_rejected() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;

    let cosmos = SessionNamespaces::from([(
        "cosmos".to_string(),
        SessionNamespace::new(
            [TestFixtures::account(TestFixtures::COSMOS_HUB, 0)],
            Vec::<String>::new(),
            Vec::<String>::new(),
        ),
    )]);
    let err = wallet
        .engine
        .session_update(&topic, cosmos)
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::InvalidNamespace(_)));
    assert_eq!(
        wallet.session(&topic).await.unwrap().namespaces,
        session_namespaces()
    );
}

#[tokio::test]
async fn test_unauthorized_request_and_event() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;

    let err = dapp
        .engine
        .session_request(&topic, request("eth_signTypedData_v4", TestFixtures::ETH_MAINNET))
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::UnauthorizedMethod(_)));

    // Polygon was requested but no Polygon account was granted.
    let err = dapp
        .engine
        .session_request(&topic, request("personal_sign", TestFixtures::POLYGON))
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::UnauthorizedMethod(_)));

    let err = dapp
        .engine
        .session_request(&topic, request("", TestFixtures::ETH_MAINNET))
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::InvalidRequest(_)));

    let mut unknown = chain_changed();
    unknown.event.name = "somethingElse".to_string();
    assert!(matches!(
        wallet.engine.emit(&topic, unknown).await,
        Err(SignError::UnauthorizedEvent(_))
    ));

    let mut empty = chain_changed();
    empty.event.data = serde_json::Value::Null;
    assert!(matches!(
        wallet.engine.emit(&topic, empty).await,
        Err(SignError::InvalidEvent(_))
    ));
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_session_request_times_out() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;

    let engine = dapp.engine.clone();
    let request_topic = topic.clone();
    let call = tokio::spawn(async move {
        engine
            .session_request(&request_topic, request("personal_sign", TestFixtures::ETH_MAINNET))
            .await
    });

    let EngineEvent::SessionRequest(pending) = wallet
        .wait_for(|e| matches!(e, EngineEvent::SessionRequest(_)))
        .await
    else {
        unreachable!()
    };

    let err = call.await.unwrap().unwrap_err();
    match err {
        SignError::Timeout { timeout_ms, .. } => assert_eq!(timeout_ms, 300_000),
        other => panic!("unexpected {:?}", other),
    }

    // A late answer is dropped by the requester.
    wallet
        .engine
        .respond_session_request(
            &topic,
            JsonRpcResponse::success(pending.request_id, json!("late")),
        )
        .await
        .unwrap();
    let late = dapp
        .next_matching(
            |e| matches!(e, EngineEvent::SessionRequestResponse { .. }),
            Duration::from_secs(5),
        )
        .await;
    assert!(late.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_ping_times_out_without_peer() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::with_config(
        &hub,
        EngineConfig::new(wallet_metadata()).with_ping_timeout(5),
    );
    let (pairing_topic, _) = propose(&mut dapp, &mut wallet).await;
    drop(dapp);

    let err = wallet.engine.ping(&pairing_topic).await.unwrap_err();
    match err {
        SignError::Timeout { timeout_ms, .. } => assert_eq!(timeout_ms, 5_000),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_failure_surfaces_as_transport_error() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;

    dapp.relay.set_fail_publish(true);
    let err = dapp
        .engine
        .session_request(&topic, request("personal_sign", TestFixtures::ETH_MAINNET))
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::Transport(_)));

    // A disconnect still completes locally when the notice cannot be sent.
    dapp.engine.disconnect(&topic).await.unwrap();
    assert!(dapp.session(&topic).await.is_none());
    assert!(!dapp.keys.has_symmetric_key(&topic));
}

// =============================================================================
// Misbehaving peers
// =============================================================================

const QUIET: Duration = Duration::from_millis(300);

/// Events a peer's session mutation would produce.
fn is_session_change(event: &EngineEvent) -> bool {
    matches!(
        event,
        EngineEvent::SessionUpdateNamespaces { .. }
            | EngineEvent::SessionExtended { .. }
            | EngineEvent::SessionEvent { .. }
            | EngineEvent::SessionRequest(_)
    )
}

fn event_params() -> serde_json::Value {
    json!({
        "event": {"name": "chainChanged", "data": 137},
        "chainId": TestFixtures::ETH_MAINNET,
    })
}

#[tokio::test]
async fn test_non_controller_requests_are_refused() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;
    let before = wallet.session(&topic).await.unwrap();
    let mut dapp = RawPeer::replace(&hub, dapp, &[&topic]).await;

    let update = dapp
        .request(
            &topic,
            "wc_sessionUpdate",
            json!({"namespaces": widened_session_namespaces()}),
        )
        .await;
    assert_eq!(dapp.error_code_for(update).await, 3003);

    let extend = dapp
        .request(
            &topic,
            "wc_sessionExtend",
            json!({"expiry": before.expiry.seconds() + 3600}),
        )
        .await;
    assert_eq!(dapp.error_code_for(extend).await, 3004);

    let event = dapp.request(&topic, "wc_sessionEvent", event_params()).await;
    assert_eq!(dapp.error_code_for(event).await, 3002);

    let after = wallet.session(&topic).await.unwrap();
    assert_eq!(after.namespaces, before.namespaces);
    assert_eq!(after.namespaces_request_id, before.namespaces_request_id);
    assert_eq!(after.expiry, before.expiry);
    assert!(wallet.next_matching(is_session_change, QUIET).await.is_none());
}

#[tokio::test]
async fn test_stale_update_from_controller_is_refused() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;
    let before = dapp.session(&topic).await.unwrap();
    let mut wallet = RawPeer::replace(&hub, wallet, &[&topic]).await;

    // Older than the settlement that set the current namespaces.
    wallet
        .request_with_id(
            &topic,
            1,
            "wc_sessionUpdate",
            json!({"namespaces": widened_session_namespaces()}),
        )
        .await;
    assert_eq!(wallet.error_code_for(1).await, 1003);

    let after = dapp.session(&topic).await.unwrap();
    assert_eq!(after.namespaces, before.namespaces);
    assert_eq!(after.namespaces_request_id, before.namespaces_request_id);
    assert!(dapp.next_matching(is_session_change, QUIET).await.is_none());
}

#[tokio::test]
async fn test_extend_outside_bounds_is_refused() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;
    let before = dapp.session(&topic).await.unwrap().expiry.seconds();
    let mut wallet = RawPeer::replace(&hub, wallet, &[&topic]).await;

    let week = signkit_lib::WEEK_IN_SECONDS as i64;
    for expiry in [before + week + 86_400, before - 60, before] {
        let id = wallet
            .request(&topic, "wc_sessionExtend", json!({ "expiry": expiry }))
            .await;
        assert_eq!(wallet.error_code_for(id).await, 1004, "expiry {}", expiry);
    }

    assert_eq!(dapp.session(&topic).await.unwrap().expiry.seconds(), before);
    assert!(dapp.next_matching(is_session_change, QUIET).await.is_none());
}

#[tokio::test]
async fn test_session_request_on_pairing_topic_finds_no_session() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;
    let pairing = dapp.engine.settled_pairings().await.unwrap()[0].topic.clone();
    let mut dapp = RawPeer::replace(&hub, dapp, &[&topic, &pairing]).await;

    let id = dapp
        .request(
            &pairing,
            "wc_sessionRequest",
            json!({
                "request": {"method": "personal_sign", "params": "[]"},
                "chainId": TestFixtures::ETH_MAINNET,
            }),
        )
        .await;
    assert_eq!(dapp.error_code_for(id).await, 1301);

    assert!(wallet.engine.pending_requests(&topic).await.unwrap().is_empty());
    assert!(wallet.next_matching(is_session_change, QUIET).await.is_none());
}

#[tokio::test]
async fn test_requests_on_deleted_session_find_no_session() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;
    let mut dapp = RawPeer::replace(&hub, dapp, &[&topic]).await;

    // The wallet forgets the session but still holds the topic key.
    wallet.storage.delete_session(&topic).await.unwrap();
    let ping = dapp.request(&topic, "wc_sessionPing", json!({})).await;
    assert_eq!(dapp.error_code_for(ping).await, 1301);
    let event = dapp.request(&topic, "wc_sessionEvent", event_params()).await;
    assert_eq!(dapp.error_code_for(event).await, 1301);
    assert!(wallet.next_matching(is_session_change, QUIET).await.is_none());
}

#[tokio::test]
async fn test_malformed_session_request_is_answered() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut wallet = Party::wallet(&hub);
    let topic = connect(&mut dapp, &mut wallet).await;
    let mut dapp = RawPeer::replace(&hub, dapp, &[&topic]).await;

    let missing_chain = dapp
        .request(
            &topic,
            "wc_sessionRequest",
            json!({"request": {"method": "personal_sign", "params": "[]"}}),
        )
        .await;
    assert_eq!(dapp.error_code_for(missing_chain).await, 1001);

    let unknown = dapp.request(&topic, "wc_sessionTeleport", json!({})).await;
    assert_eq!(dapp.error_code_for(unknown).await, 1001);

    assert!(wallet.engine.pending_requests(&topic).await.unwrap().is_empty());
    assert!(wallet.next_matching(is_session_change, QUIET).await.is_none());
}

#[tokio::test]
async fn test_zero_event_capacity_still_runs() {
    let hub = MockRelayHub::new();
    let mut dapp = Party::dapp(&hub);
    let mut config = EngineConfig::new(wallet_metadata());
    config.event_capacity = 0;
    let mut wallet = Party::with_config(&hub, config);

    let topic = connect(&mut dapp, &mut wallet).await;
    assert!(wallet.session(&topic).await.unwrap().is_acknowledged);
}
