// Chatbridge Engine — Webhook Relay
//
// Best-effort forwarding of inbound messages to one external HTTP sink.
// Never retries, never blocks the event loop: the registered observer hands
// each message to a spawned task and returns immediately.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::SessionProvider;
use crate::atoms::types::{InboundMessage, MediaPayload};
use crate::engine::lifecycle::LifecycleController;
use crate::engine::media::extension_for_mime;
use base64::Engine as _;
use log::{error, info, warn};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

// ── Payload ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayMedia {
    pub mimetype: String,
    /// Base64 (standard alphabet).
    pub data: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPayload {
    pub id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub has_media: bool,
    pub is_status: bool,
    pub is_forwarded: bool,
    pub is_ptt: bool,
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<RelayMedia>,
}

impl RelayPayload {
    pub fn from_message(msg: &InboundMessage) -> Self {
        RelayPayload {
            id: msg.id.clone(),
            from: msg.from.clone(),
            to: msg.to.clone(),
            body: msg.body.clone(),
            timestamp: msg.timestamp,
            kind: msg.kind.clone(),
            has_media: msg.has_media,
            is_status: msg.is_status,
            is_forwarded: msg.is_forwarded,
            is_ptt: msg.is_ptt,
            duration: msg.duration,
            media: None,
        }
    }

    pub fn attach(&mut self, media: &MediaPayload) {
        let filename = media
            .filename
            .clone()
            .unwrap_or_else(|| format!("{}.{}", self.id, extension_for_mime(&media.mime_type)));
        self.media = Some(RelayMedia {
            mimetype: media.mime_type.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(&media.data),
            filename,
        });
    }
}

/// What happened to one forward attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// No sink configured.
    Disabled,
    Delivered(u16),
    /// The sink answered with a non-2xx status.
    Rejected(u16),
    /// Network failure or timeout.
    Failed(String),
}

// ── Relay ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct WebhookRelay {
    url: Option<String>,
    client: Client,
    provider: Arc<dyn SessionProvider>,
}

impl WebhookRelay {
    /// `url = None` builds a disabled relay; that is logged here, once.
    pub fn new(
        url: Option<String>,
        timeout: Duration,
        provider: Arc<dyn SessionProvider>,
    ) -> EngineResult<Self> {
        let url = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        match &url {
            Some(u) => info!("[relay] Forwarding inbound messages to {}", u),
            None => warn!("[relay] WEBHOOK_URL not set; inbound messages will not be forwarded"),
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(WebhookRelay { url, client, provider })
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Flat payload, plus media when the message has some and it downloads.
    pub async fn prepare_payload(&self, msg: &InboundMessage) -> RelayPayload {
        let mut payload = RelayPayload::from_message(msg);
        if msg.has_media {
            match self.provider.download_media(msg).await {
                Ok(media) => payload.attach(&media),
                Err(e) => warn!(
                    "[relay] Media download for {} failed, forwarding without it: {}",
                    msg.id, e
                ),
            }
        }
        payload
    }

    pub async fn forward(&self, msg: &InboundMessage) -> RelayOutcome {
        let Some(url) = &self.url else {
            return RelayOutcome::Disabled;
        };

        let payload = self.prepare_payload(msg).await;
        match self.client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("[relay] Forwarded message {} to webhook", msg.id);
                RelayOutcome::Delivered(resp.status().as_u16())
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                warn!("[relay] Webhook rejected message {} (HTTP {})", msg.id, status);
                RelayOutcome::Rejected(status)
            }
            Err(e) => {
                error!("[relay] Failed to forward message {}: {}", msg.id, e);
                RelayOutcome::Failed(e.to_string())
            }
        }
    }

    /// Subscribe to the controller's inbound messages. A disabled relay
    /// registers nothing.
    pub fn register(&self, controller: &LifecycleController) {
        if !self.is_enabled() {
            return;
        }
        let relay = self.clone();
        controller.on_message("webhook-relay", move |msg: &InboundMessage| {
            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|e| EngineError::Other(format!("no runtime for relay task: {}", e)))?;
            let relay = relay.clone();
            let msg = msg.clone();
            runtime.spawn(async move {
                relay.forward(&msg).await;
            });
            Ok(())
        });
    }
}
