// Chatbridge Engine — Bridge
// Wires the lifecycle controller, the outbound gateway and the webhook relay
// around one session provider. This is the surface an HTTP layer calls.

use crate::atoms::error::EngineResult;
use crate::atoms::traits::{MediaResolver, SessionProvider};
use crate::atoms::types::{
    ChatSummary, InboundMessage, SendOptions, SendReceipt, StatusChange, StatusSnapshot, StatusView,
};
use crate::engine::config::BridgeConfig;
use crate::engine::gateway::OutboundGateway;
use crate::engine::lifecycle::LifecycleController;
use crate::engine::relay::WebhookRelay;
use log::info;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct Bridge {
    controller: LifecycleController,
    gateway: OutboundGateway,
    relay: WebhookRelay,
}

impl Bridge {
    /// Build everything; nothing talks to the provider until `start`.
    pub fn new(
        config: &BridgeConfig,
        provider: Arc<dyn SessionProvider>,
        resolver: Arc<dyn MediaResolver>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let controller = LifecycleController::from_config(provider.clone(), config);
        let gateway = OutboundGateway::new(controller.clone(), resolver);
        let relay = WebhookRelay::new(config.webhook_url.clone(), config.relay_timeout(), provider)?;
        relay.register(&controller);
        Ok(Bridge { controller, gateway, relay })
    }

    pub async fn start(&self) -> EngineResult<()> {
        info!("[bridge] Starting");
        self.controller.start().await
    }

    /// Destroy the session; the bridge is unusable afterwards.
    pub async fn stop(&self) -> EngineResult<()> {
        info!("[bridge] Stopping");
        self.gateway.destroy().await
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub fn gateway(&self) -> &OutboundGateway {
        &self.gateway
    }

    pub fn relay(&self) -> &WebhookRelay {
        &self.relay
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusSnapshot {
        self.controller.status()
    }

    pub fn status_view(&self) -> StatusView {
        self.controller.status_view()
    }

    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.controller.watch_status()
    }

    // ── Observers ──────────────────────────────────────────────────────

    pub fn on_status_change<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&StatusChange) -> EngineResult<()> + Send + Sync + 'static,
    {
        self.controller.on_status_change(name, callback);
    }

    pub fn on_message<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&InboundMessage) -> EngineResult<()> + Send + Sync + 'static,
    {
        self.controller.on_message(name, callback);
    }

    // ── Commands ───────────────────────────────────────────────────────

    pub async fn send_message(
        &self,
        destination: &str,
        body: &str,
        options: SendOptions,
    ) -> EngineResult<SendReceipt> {
        self.gateway.send_message(destination, body, options).await
    }

    pub async fn get_chat(&self, chat_id: &str) -> EngineResult<ChatSummary> {
        self.gateway.get_chat(chat_id).await
    }

    pub async fn logout(&self) -> EngineResult<()> {
        self.gateway.logout().await
    }

    pub async fn restart(&self) -> EngineResult<()> {
        self.controller.restart().await
    }
}
