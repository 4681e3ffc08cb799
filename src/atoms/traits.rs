// Chatbridge Atoms — Collaborator Traits
// The session provider and the media resolver are external components; the
// bridge only talks to them through these seams.

use crate::atoms::error::{EngineResult, ProviderError};
use crate::atoms::types::{ChatSummary, InboundMessage, LifecycleEvent, MediaPayload, SessionInfo};
use crate::atoms::constants::DEFAULT_ADDRESS_DOMAIN;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An authenticated messaging session the bridge drives.
///
/// Implementations push lifecycle and inbound-message events into a channel
/// whose receiver is handed out exactly once through `take_events`. Every
/// command is long-latency and must not block the caller's runtime.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Human-readable provider name for logging.
    fn name(&self) -> &str;

    /// Domain appended to bare addresses ("15551234567" → "15551234567@c.us").
    fn default_domain(&self) -> &str {
        DEFAULT_ADDRESS_DOMAIN
    }

    /// Hand over the event stream. Returns `None` on every call after the first.
    fn take_events(&self) -> Option<mpsc::Receiver<LifecycleEvent>>;

    /// Start (or restart) the session handshake.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Send plain text; returns the provider-assigned message id.
    async fn send_text(&self, address: &str, body: &str) -> Result<String, ProviderError>;

    /// Send media with a caption in a single message; returns the message id.
    async fn send_media(
        &self,
        address: &str,
        media: &MediaPayload,
        caption: &str,
        voice_note: bool,
    ) -> Result<String, ProviderError>;

    async fn get_chat(&self, address: &str) -> Result<ChatSummary, ProviderError>;

    async fn logout(&self) -> Result<(), ProviderError>;

    async fn destroy(&self) -> Result<(), ProviderError>;

    /// Fetch the attachment of an inbound message.
    /// Default impl returns `Unsupported`.
    async fn download_media(&self, _message: &InboundMessage) -> Result<MediaPayload, ProviderError> {
        Err(ProviderError::Unsupported(
            "media download not supported by this provider".into(),
        ))
    }

    /// Account details, once the session is linked.
    fn info(&self) -> Option<SessionInfo> {
        None
    }
}

/// Turns a media URL into bytes + MIME type for an outbound send.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> EngineResult<MediaPayload>;
}
