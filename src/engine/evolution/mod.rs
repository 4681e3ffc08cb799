// Chatbridge Engine — Evolution API Session Provider
//
// Drives a WhatsApp session through an Evolution API gateway.
//
// Module layout:
//   api      — REST calls (connect/create instance, send, findChats, logout, media)
//   webhook  — translate_webhook (pure) + run_webhook_listener (raw TCP HTTP server)
//   messages — parse_message for `messages.upsert` records

pub(crate) mod api;
pub(crate) mod messages;
pub mod webhook;

pub use webhook::translate_webhook;

use crate::atoms::constants::EVOLUTION_ADDRESS_DOMAIN;
use crate::atoms::error::ProviderError;
use crate::atoms::traits::SessionProvider;
use crate::atoms::types::{ChatSummary, InboundMessage, LifecycleEvent, MediaPayload, SessionInfo};
use crate::engine::config::EvolutionConfig;
use api::EvolutionApi;
use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const EVENT_BUFFER: usize = 256;

pub struct EvolutionProvider {
    config: EvolutionConfig,
    api: EvolutionApi,
    events_tx: mpsc::Sender<LifecycleEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<LifecycleEvent>>>,
    listener: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    info: Arc<Mutex<Option<SessionInfo>>>,
}

impl EvolutionProvider {
    pub fn new(config: EvolutionConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            warn!("[evolution] No API key configured; Evolution will likely reject requests");
        }
        let api = EvolutionApi::new(config.clone())?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Ok(EvolutionProvider {
            config,
            api,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            listener: tokio::sync::Mutex::new(None),
            info: Arc::new(Mutex::new(None)),
        })
    }

    /// Bind the webhook listener once; later calls keep the running one.
    async fn ensure_listener(&self) -> Result<(), ProviderError> {
        let mut slot = self.listener.lock().await;
        if slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return Ok(());
        }
        let addr = format!("127.0.0.1:{}", self.config.webhook_port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            ProviderError::Transport(format!("Failed to bind webhook listener on {}: {}", addr, e))
        })?;
        *slot = Some(tokio::spawn(webhook::run_webhook_listener(
            listener,
            self.events_tx.clone(),
            self.info.clone(),
        )));
        Ok(())
    }

    async fn emit(&self, event: LifecycleEvent) {
        if self.events_tx.send(event).await.is_err() {
            warn!("[evolution] Event receiver dropped");
        }
    }
}

#[async_trait]
impl SessionProvider for EvolutionProvider {
    fn name(&self) -> &str {
        "evolution"
    }

    fn default_domain(&self) -> &str {
        EVOLUTION_ADDRESS_DOMAIN
    }

    fn take_events(&self) -> Option<mpsc::Receiver<LifecycleEvent>> {
        self.events_rx.lock().take()
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.ensure_listener().await?;
        info!("[evolution] Connecting instance '{}'", self.config.instance_name);

        // An already-linked instance never sends a fresh connection.update.
        if let Ok(state) = self.api.connection_state().await {
            if state == "open" {
                info!("[evolution] Instance already connected");
                self.emit(LifecycleEvent::Authenticated).await;
                self.emit(LifecycleEvent::Ready).await;
                return Ok(());
            }
        }

        match self.api.connect_or_create().await? {
            Some(qr) => {
                info!("[evolution] QR code generated, waiting for scan");
                self.emit(LifecycleEvent::QrRequested(qr)).await;
            }
            None => info!("[evolution] No QR returned, waiting for connection.update"),
        }
        Ok(())
    }

    async fn send_text(&self, address: &str, body: &str) -> Result<String, ProviderError> {
        self.api.send_text(address, body).await
    }

    async fn send_media(
        &self,
        address: &str,
        media: &MediaPayload,
        caption: &str,
        voice_note: bool,
    ) -> Result<String, ProviderError> {
        // Exactly one Evolution call per send. sendWhatsAppAudio has no
        // caption field, so a captioned voice note goes out as plain audio media.
        if voice_note && media.mime_type.starts_with("audio/") {
            if caption.trim().is_empty() {
                return self.api.send_audio(address, media).await;
            }
            warn!("[evolution] Voice note to {} has a caption; sending as audio media", address);
        }
        self.api.send_media(address, media, caption).await
    }

    async fn get_chat(&self, address: &str) -> Result<ChatSummary, ProviderError> {
        self.api.find_chat(address).await
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        *self.info.lock() = None;
        self.api.logout().await
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
            info!("[evolution] Webhook listener stopped");
        }
        Ok(())
    }

    async fn download_media(&self, message: &InboundMessage) -> Result<MediaPayload, ProviderError> {
        if !message.has_media {
            return Err(ProviderError::NotFound(format!("message {} has no media", message.id)));
        }
        self.api.media_base64(&message.id).await
    }

    fn info(&self) -> Option<SessionInfo> {
        self.info.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Local Evolution stand-in: records `METHOD /path` of every request and
    /// answers sendText with 500, everything else with a message key.
    async fn fake_evolution() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let log = log.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 8192];
                    loop {
                        let n = stream.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if let Some((length, head)) = webhook::parse_head(&buf) {
                            if buf.len() >= head + length {
                                break;
                            }
                        }
                    }
                    let text = String::from_utf8_lossy(&buf).to_string();
                    let line = text.lines().next().unwrap_or("").to_string();
                    let request: Vec<&str> = line.split_whitespace().take(2).collect();
                    let request = request.join(" ");
                    let reply = if request.contains("/message/sendText/") {
                        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\nboom".to_string()
                    } else {
                        let body = r#"{"key":{"id":"MEDIA1"}}"#;
                        format!(
                            "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    };
                    log.lock().push(request);
                    let _ = stream.write_all(reply.as_bytes()).await;
                });
            }
        });
        (format!("http://{}", addr), seen)
    }

    fn provider_for(api_url: String) -> EvolutionProvider {
        EvolutionProvider::new(EvolutionConfig {
            api_url,
            instance_name: "chatbridge".into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn voice() -> MediaPayload {
        MediaPayload {
            data: b"OggS".to_vec(),
            mime_type: "audio/ogg".into(),
            filename: Some("note.ogg".into()),
        }
    }

    #[tokio::test]
    async fn captioned_voice_note_is_a_single_media_call() {
        let (url, seen) = fake_evolution().await;
        let provider = provider_for(url);

        let id = provider
            .send_media("1@s.whatsapp.net", &voice(), "listen to this", true)
            .await
            .unwrap();
        assert_eq!(id, "MEDIA1");
        assert_eq!(*seen.lock(), vec!["POST /message/sendMedia/chatbridge".to_string()]);
    }

    #[tokio::test]
    async fn bare_voice_note_uses_the_audio_endpoint() {
        let (url, seen) = fake_evolution().await;
        let provider = provider_for(url);

        let id = provider.send_media("1@s.whatsapp.net", &voice(), " ", true).await.unwrap();
        assert_eq!(id, "MEDIA1");
        assert_eq!(*seen.lock(), vec!["POST /message/sendWhatsAppAudio/chatbridge".to_string()]);
    }

    #[test]
    fn event_stream_can_be_taken_once() {
        let provider = EvolutionProvider::new(EvolutionConfig::default()).unwrap();
        assert!(provider.take_events().is_some());
        assert!(provider.take_events().is_none());
        assert_eq!(provider.default_domain(), "s.whatsapp.net");
    }
}
