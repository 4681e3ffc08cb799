// Chatbridge Engine — Outbound Command Gateway
//
// Every command a caller can issue against the session: readiness gate,
// address normalization, optional media resolution, then one provider call.
// Provider failures come back as `ProviderCommandFailed` with the stage and
// target attached; nothing is swallowed.

use crate::atoms::error::{CommandStage, EngineError, EngineResult};
use crate::atoms::traits::MediaResolver;
use crate::atoms::types::{ChatSummary, SendOptions, SendReceipt};
use crate::engine::lifecycle::LifecycleController;
use log::{error, info};
use std::sync::Arc;

/// `15551234567` → `15551234567@<domain>`; addresses with an `@` pass through.
pub fn normalize_address(raw: &str, domain: &str) -> EngineResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidRequest("destination is empty".into()));
    }
    if trimmed.contains('@') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{}@{}", trimmed, domain))
    }
}

#[derive(Clone)]
pub struct OutboundGateway {
    controller: LifecycleController,
    resolver: Arc<dyn MediaResolver>,
}

impl OutboundGateway {
    pub fn new(controller: LifecycleController, resolver: Arc<dyn MediaResolver>) -> Self {
        OutboundGateway { controller, resolver }
    }

    fn ensure_ready(&self) -> EngineResult<()> {
        let snap = self.controller.status();
        if snap.ready {
            Ok(())
        } else {
            Err(EngineError::NotReady { phase: snap.phase })
        }
    }

    fn address(&self, raw: &str) -> EngineResult<String> {
        normalize_address(raw, self.controller.provider().default_domain())
    }

    /// Send text, or media with `body` as caption when `options.media_url`
    /// is set.
    pub async fn send_message(
        &self,
        destination: &str,
        body: &str,
        options: SendOptions,
    ) -> EngineResult<SendReceipt> {
        self.ensure_ready()?;
        let address = self.address(destination)?;
        let provider = self.controller.provider();

        let media_url = options
            .media_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        let sent = match media_url {
            Some(url) => {
                let media = self.resolver.resolve(url).await.map_err(|e| {
                    error!("[gateway] Media for {} failed: {}", address, e);
                    match e {
                        EngineError::MediaResolutionFailed { .. } => e,
                        other => EngineError::media(url, other.to_string()),
                    }
                })?;
                provider
                    .send_media(&address, &media, body, options.voice_note)
                    .await
                    .map_err(|e| EngineError::provider_command(CommandStage::SendMedia, &address, e))
            }
            None => {
                if body.trim().is_empty() {
                    return Err(EngineError::InvalidRequest(
                        "message body is empty and no media was given".into(),
                    ));
                }
                provider
                    .send_text(&address, body)
                    .await
                    .map_err(|e| EngineError::provider_command(CommandStage::SendText, &address, e))
            }
        };

        match sent {
            Ok(message_id) => {
                info!("[gateway] Message sent to {}", address);
                Ok(SendReceipt { success: true, message_id })
            }
            Err(e) => {
                error!("[gateway] {}", e);
                Err(e)
            }
        }
    }

    pub async fn get_chat(&self, chat_id: &str) -> EngineResult<ChatSummary> {
        self.ensure_ready()?;
        let address = self.address(chat_id)?;
        self.controller
            .provider()
            .get_chat(&address)
            .await
            .map_err(|e| {
                let err = EngineError::provider_command(CommandStage::GetChat, &address, e);
                error!("[gateway] {}", err);
                err
            })
    }

    /// Sign the session out. Local state ends up logged out whatever the
    /// provider answered; its error, if any, is still returned.
    pub async fn logout(&self) -> EngineResult<()> {
        info!("[gateway] Logging out...");
        let provider = self.controller.provider();
        let result = provider.logout().await;
        self.controller.mark_logged_out();
        match result {
            Ok(()) => {
                info!("[gateway] Successfully logged out");
                Ok(())
            }
            Err(e) => {
                let err = EngineError::provider_command(CommandStage::Logout, provider.name(), e);
                error!("[gateway] {}", err);
                Err(err)
            }
        }
    }

    /// Tear the session down. Timers and the event loop stop before the
    /// provider is touched.
    pub async fn destroy(&self) -> EngineResult<()> {
        info!("[gateway] Destroying session...");
        self.controller.halt();
        let provider = self.controller.provider();
        let result = provider.destroy().await;
        self.controller.mark_destroyed();
        result.map_err(|e| {
            let err = EngineError::provider_command(CommandStage::Destroy, provider.name(), e);
            error!("[gateway] {}", err);
            err
        })
    }
}
