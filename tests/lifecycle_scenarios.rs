// Integration test: connection lifecycle driven through a fake provider
// (event stream, recovery timers, manual restart, destroy).

use super::{controller, make_ready, settle, FakeProvider};
use chatbridge_lib::atoms::error::EngineError;
use chatbridge_lib::atoms::types::{
    ConnectionPhase, LifecycleEvent, SessionInfo, StatusChangeKind,
};
use chatbridge_lib::engine::gateway::OutboundGateway;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn record_changes(
    controller: &chatbridge_lib::engine::lifecycle::LifecycleController,
) -> Arc<Mutex<Vec<StatusChangeKind>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    controller.on_status_change("recorder", move |change| {
        s.lock().push(change.change.clone());
        Ok(())
    });
    seen
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn start_subscribes_once_and_initializes() {
    let (controller, provider) = controller();
    controller.start().await.unwrap();
    assert_eq!(provider.initialize_count(), 1);
    assert!(controller.status_ticker_running());

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert_eq!(provider.initialize_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn provider_events_are_applied_in_order() {
    let (controller, provider) = controller();
    let seen = record_changes(&controller);
    controller.start().await.unwrap();

    *provider.account.lock() = Some(SessionInfo {
        id: "15550001111@c.us".into(),
        push_name: Some("Bridge".into()),
        platform: None,
    });
    for event in [
        LifecycleEvent::QrRequested("2@qr".into()),
        LifecycleEvent::Authenticated,
        LifecycleEvent::LoadingProgress { percent: 60, message: "Syncing".into() },
        LifecycleEvent::Ready,
    ] {
        provider.events.send(event).await.unwrap();
    }
    settle().await;

    assert_eq!(
        *seen.lock(),
        vec![
            StatusChangeKind::Qr,
            StatusChangeKind::Authenticated,
            StatusChangeKind::Loading { percent: 60, message: "Syncing".into() },
            StatusChangeKind::Ready,
        ]
    );
    let status = controller.status();
    assert!(status.ready && status.authenticated);
    assert_eq!(status.qr_payload, None);
    assert_eq!(status.info.map(|i| i.id).as_deref(), Some("15550001111@c.us"));
    assert!(!controller.status_ticker_running());

    let view = serde_json::to_value(controller.status_view()).unwrap();
    assert_eq!(view["ready"], true);
    assert_eq!(view["qr"], false);
    assert_eq!(view["info"]["pushName"], "Bridge");
}

#[tokio::test(start_paused = true)]
async fn auth_failure_reinitializes_exactly_once_after_fixed_delay() {
    let (controller, provider) = controller();
    controller.start().await.unwrap();
    assert_eq!(provider.initialize_count(), 1);

    controller.handle_event(LifecycleEvent::AuthFailed("invalid session".into()));
    let view = controller.status_view();
    assert_eq!(view.auth_failure.as_deref(), Some("invalid session"));
    assert!(!view.authenticated);
    assert!(controller.recovery_pending());

    sleep_ms(2_999).await;
    settle().await;
    assert_eq!(provider.initialize_count(), 1);

    sleep_ms(2).await;
    settle().await;
    assert_eq!(provider.initialize_count(), 2);

    sleep_ms(60_000).await;
    settle().await;
    assert_eq!(provider.initialize_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnects_back_off_linearly_then_require_manual_restart() {
    let (controller, provider) = controller();
    let seen = record_changes(&controller);
    make_ready(&controller);

    let mut expected_inits = 0;
    for delay in [5_000u64, 10_000, 15_000, 20_000, 25_000] {
        controller.handle_event(LifecycleEvent::Disconnected("NAVIGATION".into()));
        sleep_ms(delay - 1).await;
        settle().await;
        assert_eq!(provider.initialize_count(), expected_inits, "fired early for {}ms", delay);
        sleep_ms(2).await;
        settle().await;
        expected_inits += 1;
        assert_eq!(provider.initialize_count(), expected_inits);
    }
    assert_eq!(controller.status().reconnect_attempts, 5);

    controller.handle_event(LifecycleEvent::Disconnected("NAVIGATION".into()));
    assert!(!controller.recovery_pending());
    sleep_ms(120_000).await;
    settle().await;
    assert_eq!(provider.initialize_count(), 5);

    let status = controller.status();
    assert_eq!(status.phase, ConnectionPhase::RequiresManualRestart);
    assert!(status.view().requires_manual_restart);
    assert_eq!(seen.lock().last(), Some(&StatusChangeKind::RequiresManualRestart));
}

#[tokio::test(start_paused = true)]
async fn logged_out_stays_terminal_until_restart() {
    let (controller, provider) = controller();
    controller.start().await.unwrap();
    make_ready(&controller);

    controller.handle_event(LifecycleEvent::Disconnected("logged-out".into()));
    sleep_ms(60_000).await;
    settle().await;
    assert_eq!(provider.initialize_count(), 1);

    // Noise from the provider does not revive the session.
    controller.handle_event(LifecycleEvent::Ready);
    assert_eq!(controller.status().phase, ConnectionPhase::RequiresManualRestart);
    assert!(!controller.status().ready);

    controller.restart().await.unwrap();
    assert_eq!(provider.initialize_count(), 2);
    let status = controller.status();
    assert_eq!(status.phase, ConnectionPhase::Initializing);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(status.disconnect_reason, None);
    assert!(controller.status_ticker_running());

    make_ready(&controller);
    assert!(controller.status().ready);
}

#[tokio::test(start_paused = true)]
async fn ready_cancels_pending_reconnect_and_resets_counter() {
    let (controller, provider) = controller();
    make_ready(&controller);
    controller.handle_event(LifecycleEvent::Disconnected("NAVIGATION".into()));
    controller.handle_event(LifecycleEvent::Disconnected("NAVIGATION".into()));
    assert_eq!(controller.status().reconnect_attempts, 2);

    controller.handle_event(LifecycleEvent::Authenticated);
    controller.handle_event(LifecycleEvent::Ready);
    assert_eq!(controller.status().reconnect_attempts, 0);
    assert!(!controller.recovery_pending());

    sleep_ms(60_000).await;
    settle().await;
    assert_eq!(provider.initialize_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_observers_do_not_starve_the_others() {
    let (controller, _provider) = controller();
    controller.on_status_change("errors", |_| Err("boom".into()));
    controller.on_status_change("panics", |_| panic!("observer blew up"));
    let seen = record_changes(&controller);

    controller.handle_event(LifecycleEvent::QrRequested("2@qr".into()));
    controller.handle_event(LifecycleEvent::Authenticated);

    assert_eq!(*seen.lock(), vec![StatusChangeKind::Qr, StatusChangeKind::Authenticated]);
    assert!(controller.status().authenticated);
}

#[tokio::test(start_paused = true)]
async fn messages_reach_observers_without_touching_status() {
    let (controller, _provider) = controller();
    make_ready(&controller);
    let before = controller.status();

    let got = Arc::new(Mutex::new(Vec::new()));
    let g = got.clone();
    controller.on_message("collector", move |msg| {
        g.lock().push(msg.id.clone());
        Ok(())
    });
    controller.handle_event(LifecycleEvent::InboundMessage(super::message("M1", false)));
    controller.handle_event(LifecycleEvent::InboundMessage(super::message("M2", true)));

    assert_eq!(*got.lock(), vec!["M1".to_string(), "M2".to_string()]);
    assert_eq!(controller.status(), before);
}

#[tokio::test(start_paused = true)]
async fn watch_status_converges_to_latest() {
    let (controller, _provider) = controller();
    let mut rx = controller.watch_status();
    make_ready(&controller);
    assert!(rx.has_changed().unwrap());
    let latest = rx.borrow_and_update().clone();
    assert!(latest.ready);
    assert_eq!(latest.phase, ConnectionPhase::Ready);
}

#[tokio::test(start_paused = true)]
async fn destroy_cancels_timers_before_teardown() {
    let provider = FakeProvider::new();
    let controller = chatbridge_lib::engine::lifecycle::LifecycleController::new(
        provider.clone(),
        Default::default(),
        Duration::from_secs(10),
    );
    let gateway = OutboundGateway::new(controller.clone(), super::FakeResolver::new());
    let seen = record_changes(&controller);
    controller.start().await.unwrap();
    make_ready(&controller);
    controller.handle_event(LifecycleEvent::Disconnected("NAVIGATION".into()));
    assert!(controller.recovery_pending());

    gateway.destroy().await.unwrap();
    assert!(!controller.recovery_pending());
    assert!(!controller.status_ticker_running());

    sleep_ms(60_000).await;
    settle().await;
    assert_eq!(provider.initialize_count(), 1);
    assert_eq!(provider.calls().last(), Some(&super::Call::Destroy));

    controller.handle_event(LifecycleEvent::Ready);
    assert_eq!(controller.status().phase, ConnectionPhase::Destroyed);
    assert_eq!(seen.lock().last(), Some(&StatusChangeKind::Destroyed));

    assert!(matches!(controller.restart().await, Err(EngineError::InvalidRequest(_))));
}

#[tokio::test(start_paused = true)]
async fn destroy_aborts_a_reinitialize_in_flight() {
    let (controller, provider) = controller();
    let gateway = OutboundGateway::new(controller.clone(), super::FakeResolver::new());
    make_ready(&controller);
    *provider.init_delay.lock() = Some(Duration::from_secs(30));

    controller.handle_event(LifecycleEvent::Disconnected("NAVIGATION".into()));
    sleep_ms(5_001).await;
    settle().await;
    assert_eq!(provider.initialize_count(), 1);
    assert_eq!(provider.init_completed.load(Ordering::SeqCst), 0);

    gateway.destroy().await.unwrap();
    sleep_ms(60_000).await;
    settle().await;
    assert_eq!(provider.init_completed.load(Ordering::SeqCst), 0);
    assert_eq!(provider.initialize_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn ready_does_not_cut_a_reinitialize_short() {
    let (controller, provider) = controller();
    make_ready(&controller);
    *provider.init_delay.lock() = Some(Duration::from_secs(30));

    controller.handle_event(LifecycleEvent::Disconnected("NAVIGATION".into()));
    sleep_ms(5_001).await;
    settle().await;
    assert_eq!(provider.initialize_count(), 1);

    controller.handle_event(LifecycleEvent::Authenticated);
    controller.handle_event(LifecycleEvent::Ready);
    sleep_ms(30_000).await;
    settle().await;
    assert_eq!(provider.init_completed.load(Ordering::SeqCst), 1);
}
