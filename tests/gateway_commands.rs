// Integration test: outbound commands (readiness gate, addressing, media,
// provider failure wrapping, logout/destroy state handling).

use super::{controller, make_ready, Call, FakeResolver};
use chatbridge_lib::atoms::error::{CommandStage, EngineError};
use chatbridge_lib::atoms::types::{ConnectionPhase, SendOptions, StatusChangeKind};
use chatbridge_lib::engine::gateway::OutboundGateway;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn send_before_ready_fails_without_provider_call() {
    let (controller, provider) = controller();
    let gateway = OutboundGateway::new(controller.clone(), FakeResolver::new());
    controller.handle_event(chatbridge_lib::LifecycleEvent::Authenticated);

    let err = gateway
        .send_message("15551234567", "hi", SendOptions::default())
        .await
        .unwrap_err();
    match &err {
        EngineError::NotReady { phase } => assert_eq!(*phase, ConnectionPhase::Authenticated),
        other => panic!("unexpected {:?}", other),
    }
    assert!(err.is_transient());
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn send_text_normalizes_address_and_returns_receipt() {
    let (controller, provider) = controller();
    let gateway = OutboundGateway::new(controller.clone(), FakeResolver::new());
    make_ready(&controller);

    let receipt = gateway
        .send_message("15551234567", "hi", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(
        provider.calls(),
        vec![Call::SendText { to: "15551234567@c.us".into(), body: "hi".into() }]
    );
    assert_eq!(
        serde_json::to_value(&receipt).unwrap(),
        serde_json::json!({ "success": true, "messageId": "ID1" })
    );
}

#[tokio::test]
async fn media_send_is_one_combined_call() {
    let (controller, provider) = controller();
    let resolver = FakeResolver::new();
    let gateway = OutboundGateway::new(controller.clone(), resolver.clone());
    make_ready(&controller);

    let receipt = gateway
        .send_message(
            "120363000000@g.us",
            "look at this",
            SendOptions { media_url: Some("https://cdn.example.com/pic.png".into()), voice_note: true },
        )
        .await
        .unwrap();
    assert_eq!(receipt.message_id, "ID2");
    assert_eq!(*resolver.requested.lock(), vec!["https://cdn.example.com/pic.png".to_string()]);
    assert_eq!(
        provider.calls(),
        vec![Call::SendMedia {
            to: "120363000000@g.us".into(),
            mime: "image/png".into(),
            caption: "look at this".into(),
            voice_note: true,
        }]
    );
}

#[tokio::test]
async fn media_resolution_failure_sends_nothing() {
    let (controller, provider) = controller();
    let resolver = FakeResolver::new();
    resolver.fail.store(true, Ordering::SeqCst);
    let gateway = OutboundGateway::new(controller.clone(), resolver);
    make_ready(&controller);

    let err = gateway
        .send_message(
            "15551234567",
            "",
            SendOptions { media_url: Some("https://cdn.example.com/gone.png".into()), voice_note: false },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MediaResolutionFailed { .. }));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn provider_failure_is_wrapped_with_context() {
    let (controller, provider) = controller();
    provider.fail_send.store(true, Ordering::SeqCst);
    let gateway = OutboundGateway::new(controller.clone(), FakeResolver::new());
    make_ready(&controller);

    let err = gateway
        .send_message("15551234567", "hi", SendOptions::default())
        .await
        .unwrap_err();
    match err {
        EngineError::ProviderCommandFailed { stage, target, message } => {
            assert_eq!(stage, CommandStage::SendText);
            assert_eq!(target, "15551234567@c.us");
            assert!(message.contains("socket closed"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn empty_requests_are_rejected() {
    let (controller, provider) = controller();
    let gateway = OutboundGateway::new(controller.clone(), FakeResolver::new());
    make_ready(&controller);

    assert!(matches!(
        gateway.send_message("15551234567", "  ", SendOptions::default()).await,
        Err(EngineError::InvalidRequest(_))
    ));
    assert!(matches!(
        gateway.send_message("", "hi", SendOptions::default()).await,
        Err(EngineError::InvalidRequest(_))
    ));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn get_chat_is_gated_and_normalized() {
    let (controller, provider) = controller();
    let gateway = OutboundGateway::new(controller.clone(), FakeResolver::new());

    assert!(matches!(
        gateway.get_chat("15551234567").await,
        Err(EngineError::NotReady { .. })
    ));

    make_ready(&controller);
    let chat = gateway.get_chat("15551234567").await.unwrap();
    assert_eq!(chat.id, "15551234567@c.us");
    assert_eq!(chat.unread_count, 2);
    assert_eq!(provider.calls(), vec![Call::GetChat("15551234567@c.us".into())]);
}

#[tokio::test]
async fn logout_leaves_local_state_consistent_even_when_remote_fails() {
    let (controller, provider) = controller();
    provider.fail_logout.store(true, Ordering::SeqCst);
    let gateway = OutboundGateway::new(controller.clone(), FakeResolver::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    controller.on_status_change("recorder", move |change| {
        s.lock().push(change.change.clone());
        Ok(())
    });
    make_ready(&controller);

    let err = gateway.logout().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::ProviderCommandFailed { stage: CommandStage::Logout, .. }
    ));

    let status = controller.status();
    assert!(!status.ready && !status.authenticated);
    assert_eq!(status.phase, ConnectionPhase::RequiresManualRestart);
    assert_eq!(status.disconnect_reason.as_deref(), Some("logged-out"));
    assert_eq!(seen.lock().last(), Some(&StatusChangeKind::LoggedOut));

    // Sends are now refused with a non-transient NotReady.
    let err = gateway
        .send_message("15551234567", "hi", SendOptions::default())
        .await
        .unwrap_err();
    assert!(!err.is_transient());
}
