// ── Chatbridge Atoms: Data Model ───────────────────────────────────────────
// Status snapshot, lifecycle events, inbound messages, and outbound request
// types. Pure data; the lifecycle controller is the only writer of
// `StatusSnapshot` at runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Connection phase ───────────────────────────────────────────────────────

/// Where the session currently is in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Initializing,
    QrPending,
    Authenticated,
    Ready,
    AuthFailed,
    Disconnected,
    /// Automatic recovery has stopped (logout or reconnect cap reached).
    RequiresManualRestart,
    /// `destroy()` tore the session down; nothing will be processed.
    Destroyed,
}

impl ConnectionPhase {
    /// Phases that automatic recovery will never leave.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionPhase::RequiresManualRestart | ConnectionPhase::Destroyed
        )
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionPhase::Initializing => "initializing",
            ConnectionPhase::QrPending => "qr_pending",
            ConnectionPhase::Authenticated => "authenticated",
            ConnectionPhase::Ready => "ready",
            ConnectionPhase::AuthFailed => "auth_failed",
            ConnectionPhase::Disconnected => "disconnected",
            ConnectionPhase::RequiresManualRestart => "requires_manual_restart",
            ConnectionPhase::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

// ── Status snapshot ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingProgress {
    pub percent: u8,
    pub message: String,
}

/// Account details the provider reports once linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Own address, e.g. "15550001111@c.us".
    pub id: String,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub phase: ConnectionPhase,
    pub ready: bool,
    pub authenticated: bool,
    /// Meaningful only while `authenticated && !ready`.
    pub loading: LoadingProgress,
    pub qr_pending: bool,
    pub qr_payload: Option<String>,
    pub auth_failure_reason: Option<String>,
    /// Consecutive auth failures since the last successful authentication.
    pub auth_failures: u32,
    /// Consecutive automatic reconnects since the last `Ready`.
    pub reconnect_attempts: u32,
    pub disconnect_reason: Option<String>,
    /// Last raw state string the provider reported.
    pub provider_state: Option<String>,
    pub info: Option<SessionInfo>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        StatusSnapshot {
            phase: ConnectionPhase::Initializing,
            ready: false,
            authenticated: false,
            loading: LoadingProgress::default(),
            qr_pending: false,
            qr_payload: None,
            auth_failure_reason: None,
            auth_failures: 0,
            reconnect_attempts: 0,
            disconnect_reason: None,
            provider_state: None,
            info: None,
            last_event_at: None,
        }
    }
}

impl StatusSnapshot {
    pub fn requires_manual_restart(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Coarse one-word readiness summary used by the periodic status log.
    pub fn summary(&self) -> &'static str {
        if self.ready {
            "READY"
        } else if self.requires_manual_restart() {
            "MANUAL RESTART REQUIRED"
        } else if self.authenticated {
            "AUTHENTICATED (SYNCING...)"
        } else {
            "WAITING FOR AUTH"
        }
    }

    /// The query shape handed to the HTTP layer.
    pub fn view(&self) -> StatusView {
        StatusView {
            ready: self.ready,
            authenticated: self.authenticated,
            loading: self.loading.clone(),
            auth_failure: self.auth_failure_reason.clone(),
            qr: self.qr_payload.is_some(),
            qr_code: self.qr_payload.clone(),
            reconnect_attempts: self.reconnect_attempts,
            info: self.info.clone(),
            phase: self.phase,
            requires_manual_restart: self.requires_manual_restart(),
            disconnect_reason: self.disconnect_reason.clone(),
            state: self.provider_state.clone(),
            last_event_at: self.last_event_at,
        }
    }
}

/// Serialized status as returned by a status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub ready: bool,
    pub authenticated: bool,
    pub loading: LoadingProgress,
    pub auth_failure: Option<String>,
    pub qr: bool,
    pub qr_code: Option<String>,
    pub reconnect_attempts: u32,
    pub info: Option<SessionInfo>,
    pub phase: ConnectionPhase,
    pub requires_manual_restart: bool,
    pub disconnect_reason: Option<String>,
    pub state: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
}

// ── Lifecycle events ───────────────────────────────────────────────────────

/// Everything the session provider can tell the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    QrRequested(String),
    Authenticated,
    Ready,
    AuthFailed(String),
    LoadingProgress { percent: u8, message: String },
    Disconnected(String),
    StateChanged(String),
    /// Account details became available (sent alongside `Ready`).
    InfoUpdated(SessionInfo),
    InboundMessage(InboundMessage),
}

impl LifecycleEvent {
    /// Short tag for logs.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::QrRequested(_) => "qr",
            LifecycleEvent::Authenticated => "authenticated",
            LifecycleEvent::Ready => "ready",
            LifecycleEvent::AuthFailed(_) => "auth_failure",
            LifecycleEvent::LoadingProgress { .. } => "loading_screen",
            LifecycleEvent::Disconnected(_) => "disconnected",
            LifecycleEvent::StateChanged(_) => "change_state",
            LifecycleEvent::InfoUpdated(_) => "info",
            LifecycleEvent::InboundMessage(_) => "message",
        }
    }
}

/// What a status broadcast is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StatusChangeKind {
    Qr,
    Authenticated,
    Ready,
    AuthFailure { reason: String },
    Loading { percent: u8, message: String },
    Disconnected { reason: String },
    StateChanged { state: String },
    Info,
    RequiresManualRestart,
    Restarting,
    LoggedOut,
    Destroyed,
}

/// Payload delivered to status observers: what changed plus the full
/// snapshot after the change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub change: StatusChangeKind,
    pub snapshot: StatusSnapshot,
}

// ── Inbound message ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    /// May be empty for media-only messages.
    pub body: String,
    /// Unix seconds as reported by the provider.
    pub timestamp: i64,
    /// Provider message type ("chat", "image", "ptt", …), passed through.
    #[serde(rename = "type")]
    pub kind: String,
    pub has_media: bool,
    /// Opaque provider flag, passed through.
    pub is_status: bool,
    pub is_forwarded: bool,
    /// Voice note.
    pub is_ptt: bool,
    /// Seconds, voice notes only.
    pub duration: Option<u32>,
}

// ── Outbound ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub voice_note: bool,
}

/// Result handed back to the HTTP caller: `{success, messageId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub success: bool,
    pub message_id: String,
}

/// Binary content produced by a `MediaResolver` or a provider download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub unread_count: u32,
}
