// Chatbridge Engine — Lifecycle Controller
//
// Owns the status snapshot. Provider events arrive on one channel and are
// applied strictly in order by a single event-loop task; the pure machine in
// `machine.rs` decides what changes and this module carries out the effects
// (timers, fan-out, status watch).
//
// Timer slots:
//   recovery      — the pending reconnect or auth retry (at most one)
//   reinit        — a re-initialize started by `recovery`, aborted only by halt
//   status_ticker — periodic readiness log while not ready

pub mod machine;

use crate::atoms::error::{CommandStage, EngineError, EngineResult};
use crate::atoms::traits::SessionProvider;
use crate::atoms::types::{
    ConnectionPhase, InboundMessage, LifecycleEvent, StatusChange, StatusChangeKind,
    StatusSnapshot, StatusView,
};
use crate::engine::config::BridgeConfig;
use crate::engine::observers::ObserverRegistry;
use crate::engine::scheduler::ScheduledTask;
use chrono::Utc;
use log::{debug, error, info, warn};
use machine::{Effect, LifecyclePolicy};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Timers {
    recovery: Option<ScheduledTask>,
    reinit: Option<JoinHandle<()>>,
    status_ticker: Option<ScheduledTask>,
    halted: bool,
}

struct Inner {
    provider: Arc<dyn SessionProvider>,
    policy: LifecyclePolicy,
    status_interval: Duration,
    snapshot: RwLock<StatusSnapshot>,
    status_tx: watch::Sender<StatusSnapshot>,
    observers: ObserverRegistry,
    timers: Mutex<Timers>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        policy: LifecyclePolicy,
        status_interval: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        LifecycleController {
            inner: Arc::new(Inner {
                provider,
                policy,
                status_interval,
                snapshot: RwLock::new(StatusSnapshot::default()),
                status_tx,
                observers: ObserverRegistry::new(),
                timers: Mutex::new(Timers::default()),
                event_loop: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(provider: Arc<dyn SessionProvider>, config: &BridgeConfig) -> Self {
        let policy = LifecyclePolicy {
            reconnect: config.reconnect.clone(),
            auth_retry: config.auth_retry.clone(),
        };
        Self::new(provider, policy, config.status_interval())
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        LifecycleController { inner }
    }

    pub fn provider(&self) -> &Arc<dyn SessionProvider> {
        &self.inner.provider
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.inner.policy
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.inner.observers
    }

    pub fn on_status_change<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&StatusChange) -> EngineResult<()> + Send + Sync + 'static,
    {
        self.inner.observers.on_status_change(name, callback);
    }

    pub fn on_message<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&InboundMessage) -> EngineResult<()> + Send + Sync + 'static,
    {
        self.inner.observers.on_message(name, callback);
    }

    // ── Startup ────────────────────────────────────────────────────────

    /// Subscribe to the provider's events, start the status ticker and kick
    /// off the first handshake. An initialize failure is logged, not returned:
    /// the session may still come up through its event stream.
    pub async fn start(&self) -> EngineResult<()> {
        let events = self.inner.provider.take_events().ok_or_else(|| {
            EngineError::Config(format!(
                "event stream of provider '{}' was already taken",
                self.inner.provider.name()
            ))
        })?;

        let weak = Arc::downgrade(&self.inner);
        *self.inner.event_loop.lock() = Some(tokio::spawn(run_event_loop(weak, events)));
        info!("[lifecycle] Started with provider '{}'", self.inner.provider.name());

        self.start_status_ticker();
        self.initialize("startup").await;
        Ok(())
    }

    async fn initialize(&self, context: &str) {
        if let Err(e) = self.inner.provider.initialize().await {
            let err = EngineError::provider_command(
                CommandStage::Initialize,
                self.inner.provider.name(),
                e,
            );
            error!("[lifecycle] Failed to initialize session ({}): {}", context, err);
        }
    }

    // ── Event handling ─────────────────────────────────────────────────

    /// Apply one provider event. Normally called by the event loop only.
    pub fn handle_event(&self, event: LifecycleEvent) {
        let (transition, snapshot) = {
            let mut snap = self.inner.snapshot.write();
            let transition = machine::apply(&mut snap, &event, &self.inner.policy, Utc::now());
            if transition.effects.contains(&Effect::RefreshInfo) && snap.info.is_none() {
                snap.info = self.inner.provider.info();
            }
            (transition, snap.clone())
        };

        if transition.change.is_none() && transition.effects.is_empty() {
            debug!("[lifecycle] Ignored '{}' in phase {}", event.name(), snapshot.phase);
            return;
        }
        if transition.change.is_some() {
            log_transition(&event, &snapshot);
        }

        for effect in transition.effects {
            self.run_effect(effect);
        }

        if let Some(change) = transition.change {
            self.broadcast(change, snapshot);
        }
    }

    fn run_effect(&self, effect: Effect) {
        match effect {
            Effect::ScheduleReconnect { attempt, delay } => {
                info!(
                    "[lifecycle] Re-initializing in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    attempt,
                    self.inner.policy.reconnect.max_attempts
                );
                self.schedule_recovery("reconnect", delay);
            }
            Effect::ScheduleAuthRetry { delay } => {
                warn!("[lifecycle] Retrying session initialization in {}ms", delay.as_millis());
                self.schedule_recovery("auth-retry", delay);
            }
            Effect::CancelRecovery => {
                self.inner.timers.lock().recovery = None;
            }
            Effect::StopStatusTicker => {
                self.inner.timers.lock().status_ticker = None;
            }
            Effect::RefreshInfo => {}
            Effect::GiveUp { attempts, reason } => {
                if machine::is_logout_reason(&reason) {
                    warn!("[lifecycle] Session logged out ({}); manual restart required", reason);
                } else {
                    error!(
                        "[lifecycle] {}",
                        EngineError::DisconnectedTerminal { attempts, reason }
                    );
                }
            }
            Effect::DispatchMessage(msg) => {
                let preview = if msg.body.is_empty() { "[Media]" } else { msg.body.as_str() };
                info!("[lifecycle] Received message from {}: {}", msg.from, preview);
                self.inner.observers.messages.dispatch(&msg);
            }
        }
    }

    fn broadcast(&self, change: StatusChangeKind, snapshot: StatusSnapshot) {
        self.inner.status_tx.send_replace(snapshot.clone());
        self.inner.observers.status.dispatch(&StatusChange { change, snapshot });
    }

    // ── Timers ─────────────────────────────────────────────────────────

    /// Replace the recovery slot. When the delay elapses the re-initialize
    /// runs on its own task, so cancelling the slot later never cuts a
    /// handshake short. Only `halt` aborts it.
    fn schedule_recovery(&self, label: &'static str, delay: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let task = ScheduledTask::after(label, delay, async move {
            let Some(inner) = weak.upgrade() else { return };
            let controller = LifecycleController::from_inner(inner);
            let phase = controller.status().phase;
            if phase.is_terminal() || phase == ConnectionPhase::Ready {
                debug!("[lifecycle] Skipping {} in phase {}", label, phase);
                return;
            }
            let mut timers = controller.inner.timers.lock();
            if timers.halted {
                return;
            }
            let reinit = controller.clone();
            timers.reinit = Some(tokio::spawn(async move { reinit.initialize(label).await }));
        });
        self.inner.timers.lock().recovery = Some(task);
    }

    fn start_status_ticker(&self) {
        let weak = Arc::downgrade(&self.inner);
        let task = ScheduledTask::every("status-ticker", self.inner.status_interval, move || {
            let Some(inner) = weak.upgrade() else { return };
            let snap = inner.snapshot.read().clone();
            if snap.ready {
                return;
            }
            info!(
                "[status] Ready: {} | Auth: {} | State: {}",
                snap.ready,
                snap.authenticated,
                snap.summary()
            );
            if snap.loading.percent > 0 {
                info!(
                    "[status] Sync progress: {}% - {}",
                    snap.loading.percent, snap.loading.message
                );
            }
        });
        self.inner.timers.lock().status_ticker = Some(task);
    }

    /// True while a reconnect or auth retry is waiting to fire.
    pub fn recovery_pending(&self) -> bool {
        self.inner
            .timers
            .lock()
            .recovery
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    pub fn status_ticker_running(&self) -> bool {
        self.inner.timers.lock().status_ticker.is_some()
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusSnapshot {
        self.inner.snapshot.read().clone()
    }

    pub fn status_view(&self) -> StatusView {
        self.inner.snapshot.read().view()
    }

    /// Latest-wins subscription: a slow reader only ever sees the newest snapshot.
    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.snapshot.read().ready
    }

    // ── Operator commands ──────────────────────────────────────────────

    /// Leave `RequiresManualRestart` (or any other phase): reset counters,
    /// restart the status ticker and re-run the handshake.
    pub async fn restart(&self) -> EngineResult<()> {
        if self.status().phase == ConnectionPhase::Destroyed {
            return Err(EngineError::InvalidRequest(
                "session has been destroyed; build a new bridge".into(),
            ));
        }
        info!("[lifecycle] Manual restart requested");
        self.inner.timers.lock().recovery = None;

        let snapshot = {
            let mut snap = self.inner.snapshot.write();
            machine::reset_for_restart(&mut snap, Utc::now());
            snap.clone()
        };
        self.broadcast(StatusChangeKind::Restarting, snapshot);
        self.start_status_ticker();

        self.inner.provider.initialize().await.map_err(|e| {
            EngineError::provider_command(CommandStage::Initialize, self.inner.provider.name(), e)
        })
    }

    /// Local half of a sign-out; see `OutboundGateway::logout`.
    pub(crate) fn mark_logged_out(&self) {
        self.inner.timers.lock().recovery = None;
        let snapshot = {
            let mut snap = self.inner.snapshot.write();
            if snap.phase == ConnectionPhase::Destroyed {
                return;
            }
            machine::mark_logged_out(&mut snap, Utc::now());
            snap.clone()
        };
        info!("[lifecycle] Logged out; manual restart required");
        self.broadcast(StatusChangeKind::LoggedOut, snapshot);
    }

    /// Cancel every timer and stop consuming events. Must run before the
    /// provider connection is torn down.
    pub(crate) fn halt(&self) {
        {
            let mut timers = self.inner.timers.lock();
            timers.halted = true;
            timers.recovery = None;
            timers.status_ticker = None;
            if let Some(reinit) = timers.reinit.take() {
                reinit.abort();
            }
        }
        if let Some(handle) = self.inner.event_loop.lock().take() {
            handle.abort();
        }
        debug!("[lifecycle] Timers cancelled, event loop stopped");
    }

    pub(crate) fn mark_destroyed(&self) {
        let snapshot = {
            let mut snap = self.inner.snapshot.write();
            if snap.phase == ConnectionPhase::Destroyed {
                return;
            }
            machine::mark_destroyed(&mut snap, Utc::now());
            snap.clone()
        };
        info!("[lifecycle] Session destroyed");
        self.broadcast(StatusChangeKind::Destroyed, snapshot);
    }
}

async fn run_event_loop(inner: Weak<Inner>, mut events: mpsc::Receiver<LifecycleEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        LifecycleController::from_inner(inner).handle_event(event);
    }
    debug!("[lifecycle] Event stream closed");
}

fn log_transition(event: &LifecycleEvent, snap: &StatusSnapshot) {
    match event {
        LifecycleEvent::QrRequested(_) => {
            info!("[lifecycle] QR received; scan it with the phone to link the session")
        }
        LifecycleEvent::Authenticated => {
            info!("[lifecycle] Authenticated - waiting for sync...")
        }
        LifecycleEvent::Ready => match &snap.info {
            Some(me) => info!("[lifecycle] Session is ready as {}", me.id),
            None => info!("[lifecycle] Session is ready"),
        },
        LifecycleEvent::AuthFailed(reason) => {
            error!("[lifecycle] {}", EngineError::AuthenticationFailed(reason.clone()))
        }
        LifecycleEvent::LoadingProgress { .. } => {
            info!("[lifecycle] Loading: {}% - {}", snap.loading.percent, snap.loading.message)
        }
        LifecycleEvent::Disconnected(reason) => {
            warn!("[lifecycle] Session disconnected: {}", reason)
        }
        LifecycleEvent::StateChanged(state) => info!("[lifecycle] State changed: {}", state),
        LifecycleEvent::InfoUpdated(me) => debug!("[lifecycle] Account info: {}", me.id),
        LifecycleEvent::InboundMessage(_) => {}
    }
}
