// ── Chatbridge Atoms: Error Types ──────────────────────────────────────────
// Single canonical error enum for the bridge, built with `thiserror`.
//
// Design rules:
//   • Lifecycle failures (auth failure, disconnect) are absorbed by the
//     controller and only ever logged through these variants.
//   • Outbound command failures are surfaced to the caller with context.
//   • Observer and webhook failures stop at their own boundary.
//   • No variant carries secret material (API keys) in its message.

use crate::atoms::types::ConnectionPhase;
use std::fmt;
use thiserror::Error;

// ── Command stage (context for provider failures) ──────────────────────────

/// Which provider command was in flight when a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStage {
    Initialize,
    SendText,
    SendMedia,
    GetChat,
    Logout,
    Destroy,
    DownloadMedia,
}

impl fmt::Display for CommandStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStage::Initialize => "initialize",
            CommandStage::SendText => "send-text",
            CommandStage::SendMedia => "send-media",
            CommandStage::GetChat => "get-chat",
            CommandStage::Logout => "logout",
            CommandStage::Destroy => "destroy",
            CommandStage::DownloadMedia => "download-media",
        };
        f.write_str(s)
    }
}

// ── Session provider errors ────────────────────────────────────────────────

/// Errors reported by a `SessionProvider` implementation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP / network / process failure talking to the session.
    #[error("transport error: {0}")]
    Transport(String),

    /// The session answered but refused the command.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The addressed chat or message does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not supported by this provider.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// A command was issued before the session reached `Ready`.
    #[error("session is not ready yet (phase: {phase})")]
    NotReady { phase: ConnectionPhase },

    /// The request itself is malformed (empty destination, nothing to send).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The media URL could not be fetched into an attachment.
    #[error("media resolution failed for {url}: {message}")]
    MediaResolutionFailed { url: String, message: String },

    /// A provider command failed; `target` is the address or chat involved.
    #[error("{stage} failed for {target}: {message}")]
    ProviderCommandFailed {
        stage: CommandStage,
        target: String,
        message: String,
    },

    /// Credentials were rejected. Recovery is scheduled by the controller.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Automatic recovery has stopped; an operator must restart the session.
    #[error("automatic recovery stopped after {attempts} attempts ({reason}); manual restart required")]
    DisconnectedTerminal { attempts: u32, reason: String },

    /// An observer callback failed during dispatch.
    #[error("observer '{observer}' failed: {message}")]
    ObserverCallbackFailed { observer: String, message: String },

    /// Configuration is invalid or could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not yet have a dedicated variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Wrap a provider failure with the command stage and target address.
    pub fn provider_command(
        stage: CommandStage,
        target: impl Into<String>,
        err: ProviderError,
    ) -> Self {
        Self::ProviderCommandFailed {
            stage,
            target: target.into(),
            message: err.to_string(),
        }
    }

    pub fn media(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MediaResolutionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn observer(observer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ObserverCallbackFailed {
            observer: observer.into(),
            message: message.into(),
        }
    }

    /// True for failures a caller may retry later without changing anything.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::NotReady { phase } => !phase.is_terminal(),
            EngineError::MediaResolutionFailed { .. } | EngineError::Network(_) => true,
            _ => false,
        }
    }
}

// ── String bridges ─────────────────────────────────────────────────────────

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All bridge operations return this type.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Conversion: EngineError → String ──────────────────────────────────────
// Lets an HTTP layer put the message straight into a JSON error body.

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_command_carries_context() {
        let err = EngineError::provider_command(
            CommandStage::SendText,
            "15551234567@c.us",
            ProviderError::Transport("socket closed".into()),
        );
        let msg = err.to_string();
        assert!(msg.contains("send-text"));
        assert!(msg.contains("15551234567@c.us"));
        assert!(msg.contains("socket closed"));
    }

    #[test]
    fn not_ready_is_transient_unless_terminal() {
        let syncing = EngineError::NotReady { phase: ConnectionPhase::Authenticated };
        let stuck = EngineError::NotReady { phase: ConnectionPhase::RequiresManualRestart };
        assert!(syncing.is_transient());
        assert!(!stuck.is_transient());
    }
}
