// Chatbridge Engine — Lifecycle State Machine
//
// The single transition function for the session handshake. `apply` mutates
// the snapshot and returns what changed plus the side effects the controller
// must carry out; it never touches timers, the network, or observers itself.
//
//   Initializing ──qr──▶ QrPending ──authenticated──▶ Authenticated ──ready──▶ Ready
//        any ──auth_failure──▶ AuthFailed (fixed-delay re-init)
//        any ──disconnected──▶ Disconnected (backoff re-init)
//                          └──▶ RequiresManualRestart (logout / cap reached)

use crate::atoms::constants::{LOGGED_OUT_REASON, LOGOUT_REASONS};
use crate::atoms::types::{
    ConnectionPhase, InboundMessage, LifecycleEvent, LoadingProgress, StatusChangeKind,
    StatusSnapshot,
};
use crate::engine::backoff::ReconnectDecision;
use crate::engine::config::{AuthRetryPolicy, ReconnectPolicy};
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub reconnect: ReconnectPolicy,
    pub auth_retry: AuthRetryPolicy,
}

/// Work the controller performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Re-initialize the provider after `delay` (replaces any pending recovery).
    ScheduleReconnect { attempt: u32, delay: Duration },
    /// Re-initialize the provider after the fixed auth delay.
    ScheduleAuthRetry { delay: Duration },
    /// Drop any pending reconnect / auth-retry timer.
    CancelRecovery,
    /// Stop the periodic readiness log for the rest of this session.
    StopStatusTicker,
    /// Ask the provider for account details if the snapshot has none.
    RefreshInfo,
    /// Automatic recovery has ended.
    GiveUp { attempts: u32, reason: String },
    DispatchMessage(InboundMessage),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// `Some` whenever the snapshot changed and observers must hear about it.
    pub change: Option<StatusChangeKind>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn ignored() -> Self {
        Transition::default()
    }

    fn changed(change: StatusChangeKind) -> Self {
        Transition { change: Some(change), effects: Vec::new() }
    }

    fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

pub fn is_logout_reason(reason: &str) -> bool {
    LOGOUT_REASONS.iter().any(|r| r.eq_ignore_ascii_case(reason.trim()))
}

/// Apply one provider event to the snapshot.
pub fn apply(
    snap: &mut StatusSnapshot,
    event: &LifecycleEvent,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> Transition {
    if snap.phase == ConnectionPhase::Destroyed {
        return Transition::ignored();
    }

    // Messages never touch the snapshot.
    if let LifecycleEvent::InboundMessage(msg) = event {
        return Transition::ignored().with(Effect::DispatchMessage(msg.clone()));
    }

    // Once terminal, only auxiliary fields move until an explicit restart.
    let terminal = snap.phase == ConnectionPhase::RequiresManualRestart;
    let auxiliary = matches!(
        event,
        LifecycleEvent::StateChanged(_) | LifecycleEvent::InfoUpdated(_)
    );
    if terminal && !auxiliary {
        return Transition::ignored();
    }

    snap.last_event_at = Some(now);

    match event {
        LifecycleEvent::QrRequested(payload) => {
            snap.ready = false;
            snap.authenticated = false;
            snap.qr_pending = true;
            snap.qr_payload = Some(payload.clone());
            snap.loading = LoadingProgress::default();
            snap.phase = ConnectionPhase::QrPending;
            Transition::changed(StatusChangeKind::Qr)
        }

        LifecycleEvent::Authenticated => {
            snap.authenticated = true;
            snap.auth_failure_reason = None;
            snap.auth_failures = 0;
            // The scan has been consumed; the payload stays until Ready.
            snap.qr_pending = false;
            if !snap.ready {
                snap.phase = ConnectionPhase::Authenticated;
            }
            Transition::changed(StatusChangeKind::Authenticated)
        }

        LifecycleEvent::Ready => {
            snap.ready = true;
            snap.authenticated = true;
            snap.qr_pending = false;
            snap.qr_payload = None;
            snap.reconnect_attempts = 0;
            snap.auth_failures = 0;
            snap.auth_failure_reason = None;
            snap.disconnect_reason = None;
            snap.phase = ConnectionPhase::Ready;
            Transition::changed(StatusChangeKind::Ready)
                .with(Effect::CancelRecovery)
                .with(Effect::StopStatusTicker)
                .with(Effect::RefreshInfo)
        }

        LifecycleEvent::AuthFailed(reason) => {
            snap.ready = false;
            snap.authenticated = false;
            snap.qr_pending = false;
            snap.auth_failure_reason = Some(reason.clone());
            snap.auth_failures = snap.auth_failures.saturating_add(1);

            if let Some(limit) = policy.auth_retry.limit {
                if snap.auth_failures >= limit {
                    snap.phase = ConnectionPhase::RequiresManualRestart;
                    return Transition::changed(StatusChangeKind::RequiresManualRestart)
                        .with(Effect::CancelRecovery)
                        .with(Effect::GiveUp {
                            attempts: snap.auth_failures,
                            reason: reason.clone(),
                        });
                }
            }

            snap.phase = ConnectionPhase::AuthFailed;
            Transition::changed(StatusChangeKind::AuthFailure { reason: reason.clone() })
                .with(Effect::ScheduleAuthRetry { delay: policy.auth_retry.delay() })
        }

        LifecycleEvent::LoadingProgress { percent, message } => {
            let message = if message.trim().is_empty() {
                "Loading...".to_string()
            } else {
                message.clone()
            };
            snap.loading = LoadingProgress { percent: (*percent).min(100), message };
            Transition::changed(StatusChangeKind::Loading {
                percent: snap.loading.percent,
                message: snap.loading.message.clone(),
            })
        }

        LifecycleEvent::Disconnected(reason) => {
            snap.ready = false;
            snap.authenticated = false;
            snap.qr_pending = false;
            snap.disconnect_reason = Some(reason.clone());

            if is_logout_reason(reason) {
                snap.phase = ConnectionPhase::RequiresManualRestart;
                return Transition::changed(StatusChangeKind::RequiresManualRestart)
                    .with(Effect::CancelRecovery)
                    .with(Effect::GiveUp {
                        attempts: snap.reconnect_attempts,
                        reason: reason.clone(),
                    });
            }

            match policy.reconnect.next(snap.reconnect_attempts) {
                ReconnectDecision::Retry { attempt, delay } => {
                    snap.reconnect_attempts = attempt;
                    snap.phase = ConnectionPhase::Disconnected;
                    Transition::changed(StatusChangeKind::Disconnected { reason: reason.clone() })
                        .with(Effect::ScheduleReconnect { attempt, delay })
                }
                ReconnectDecision::GiveUp { attempts } => {
                    snap.phase = ConnectionPhase::RequiresManualRestart;
                    Transition::changed(StatusChangeKind::RequiresManualRestart)
                        .with(Effect::CancelRecovery)
                        .with(Effect::GiveUp { attempts, reason: reason.clone() })
                }
            }
        }

        LifecycleEvent::StateChanged(state) => {
            snap.provider_state = Some(state.clone());
            Transition::changed(StatusChangeKind::StateChanged { state: state.clone() })
        }

        LifecycleEvent::InfoUpdated(info) => {
            snap.info = Some(info.clone());
            Transition::changed(StatusChangeKind::Info)
        }

        LifecycleEvent::InboundMessage(_) => Transition::ignored(),
    }
}

// ── Operator-driven mutations ──────────────────────────────────────────

/// Back to `Initializing` with fresh counters (explicit restart).
pub fn reset_for_restart(snap: &mut StatusSnapshot, now: DateTime<Utc>) {
    let info = snap.info.take();
    *snap = StatusSnapshot {
        info,
        last_event_at: Some(now),
        ..StatusSnapshot::default()
    };
}

/// Local sign-out: leaves the snapshot consistent whatever the remote said.
pub fn mark_logged_out(snap: &mut StatusSnapshot, now: DateTime<Utc>) {
    snap.ready = false;
    snap.authenticated = false;
    snap.qr_pending = false;
    snap.qr_payload = None;
    snap.info = None;
    snap.disconnect_reason = Some(LOGGED_OUT_REASON.to_string());
    snap.phase = ConnectionPhase::RequiresManualRestart;
    snap.last_event_at = Some(now);
}

pub fn mark_destroyed(snap: &mut StatusSnapshot, now: DateTime<Utc>) {
    snap.ready = false;
    snap.authenticated = false;
    snap.qr_pending = false;
    snap.phase = ConnectionPhase::Destroyed;
    snap.last_event_at = Some(now);
}

/// Structural invariants every snapshot must satisfy after any transition.
pub fn check_invariants(snap: &StatusSnapshot, policy: &LifecyclePolicy) -> Result<(), String> {
    if snap.ready && !snap.authenticated {
        return Err("ready without authenticated".into());
    }
    if snap.ready && snap.qr_pending {
        return Err("ready while a QR scan is pending".into());
    }
    if snap.qr_pending && snap.authenticated {
        return Err("qr pending and authenticated at once".into());
    }
    if snap.ready != (snap.phase == ConnectionPhase::Ready) {
        return Err(format!("ready={} but phase={}", snap.ready, snap.phase));
    }
    if snap.ready && snap.reconnect_attempts != 0 {
        return Err("ready with a non-zero reconnect counter".into());
    }
    if snap.reconnect_attempts > policy.reconnect.max_attempts {
        return Err(format!(
            "reconnect_attempts {} above cap {}",
            snap.reconnect_attempts, policy.reconnect.max_attempts
        ));
    }
    if snap.loading.percent > 100 {
        return Err("loading percent above 100".into());
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────
