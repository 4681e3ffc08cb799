// Evolution Provider — REST Client
// connect_or_create, create_instance, delete_instance, connection_state,
// send_text, send_media, send_audio, find_chat, logout, media_base64

use crate::atoms::constants::{EVOLUTION_WEBHOOK_HOST, EVOLUTION_WEBHOOK_PATH};
use crate::atoms::error::ProviderError;
use crate::atoms::types::{ChatSummary, MediaPayload};
use crate::engine::config::EvolutionConfig;
use base64::Engine as _;
use log::{info, warn};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use std::time::Duration;

fn preview(text: &str) -> &str {
    let mut end = text.len().min(300);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn new_instance_token() -> String {
    format!("cb-{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// Extract the QR payload from the shapes Evolution returns:
/// `{qrcode:{base64}}` on create, `{base64}` or `{code}` on connect.
pub(crate) fn extract_qr(resp: &Value) -> Option<String> {
    resp["qrcode"]["base64"]
        .as_str()
        .or_else(|| resp["base64"].as_str())
        .or_else(|| resp["qrcode"]["code"].as_str())
        .or_else(|| resp["code"].as_str())
        .or_else(|| resp["qrcode"].as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Message id from a send response (`{key:{id}}`).
pub(crate) fn extract_message_id(resp: &Value) -> Option<String> {
    resp["key"]["id"]
        .as_str()
        .or_else(|| resp["messageId"].as_str())
        .map(String::from)
}

/// Evolution `mediatype` field for a MIME type.
pub(crate) fn media_kind(mime: &str) -> &'static str {
    if mime.starts_with("image/") {
        "image"
    } else if mime.starts_with("video/") {
        "video"
    } else if mime.starts_with("audio/") {
        "audio"
    } else {
        "document"
    }
}

pub(crate) struct EvolutionApi {
    client: Client,
    config: EvolutionConfig,
}

impl EvolutionApi {
    pub fn new(config: EvolutionConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(EvolutionApi { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.config.api_url.trim_end_matches('/'), path, self.config.instance_name)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.config.api_key)
    }

    async fn read_json(resp: Response) -> Result<Value, ProviderError> {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if status.as_u16() == 404 {
            return Err(ProviderError::NotFound(preview(&text).to_string()));
        }
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: preview(&text).to_string(),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ProviderError::Transport(format!("invalid JSON from Evolution: {}", e)))
    }

    // ── Instance management ────────────────────────────────────────────

    /// Raw connection state (`open`, `connecting`, `close`).
    pub async fn connection_state(&self) -> Result<String, ProviderError> {
        let resp = self
            .authed(self.client.get(self.url("instance/connectionState")))
            .send()
            .await?;
        let body = Self::read_json(resp).await?;
        Ok(body["instance"]["state"]
            .as_str()
            .or_else(|| body["state"].as_str())
            .unwrap_or("")
            .to_string())
    }

    /// Connect the existing instance, creating it when Evolution has none.
    /// Returns the QR payload if a pairing scan is needed.
    pub async fn connect_or_create(&self) -> Result<Option<String>, ProviderError> {
        let resp = self
            .authed(self.client.get(self.url("instance/connect")))
            .send()
            .await?;
        match Self::read_json(resp).await {
            Ok(body) => Ok(extract_qr(&body)),
            Err(ProviderError::NotFound(_)) => {
                info!("[evolution] Instance '{}' not found, creating it", self.config.instance_name);
                self.create_instance().await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create_instance(&self) -> Result<Option<String>, ProviderError> {
        let url = format!("{}/instance/create", self.config.api_url.trim_end_matches('/'));
        let body = json!({
            "instanceName": self.config.instance_name,
            "token": new_instance_token(),
            "qrcode": true,
            "integration": "WHATSAPP-BAILEYS",
            "webhook": {
                "url": format!(
                    "http://{}:{}{}",
                    EVOLUTION_WEBHOOK_HOST, self.config.webhook_port, EVOLUTION_WEBHOOK_PATH
                ),
                "events": [
                    "QRCODE_UPDATED",
                    "CONNECTION_UPDATE",
                    "LOGOUT_INSTANCE",
                    "MESSAGES_UPSERT",
                ],
            },
        });

        let send = || self.authed(self.client.post(&url)).json(&body).send();
        let resp = send().await?;
        match Self::read_json(resp).await {
            Ok(created) => Ok(extract_qr(&created)),
            Err(ProviderError::Rejected { message, .. })
                if message.to_lowercase().contains("already") =>
            {
                info!("[evolution] Instance/token conflict, deleting instance and recreating...");
                self.delete_instance().await;
                let retry = send().await?;
                let created = Self::read_json(retry).await?;
                Ok(extract_qr(&created))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete_instance(&self) {
        match self
            .authed(self.client.delete(self.url("instance/delete")))
            .send()
            .await
        {
            Ok(resp) => info!("[evolution] Delete instance response [{}]", resp.status()),
            Err(e) => warn!("[evolution] Delete instance failed: {}", e),
        }
        // Let the API settle before the next create.
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    pub async fn logout(&self) -> Result<(), ProviderError> {
        let resp = self
            .authed(self.client.delete(self.url("instance/logout")))
            .send()
            .await?;
        Self::read_json(resp).await.map(|_| ())
    }

    // ── Messaging ──────────────────────────────────────────────────────

    pub async fn send_text(&self, number: &str, text: &str) -> Result<String, ProviderError> {
        let resp = self
            .authed(self.client.post(self.url("message/sendText")))
            .json(&json!({ "number": number, "text": text }))
            .send()
            .await?;
        let body = Self::read_json(resp).await?;
        extract_message_id(&body)
            .ok_or_else(|| ProviderError::Transport("sendText response carried no message id".into()))
    }

    pub async fn send_media(
        &self,
        number: &str,
        media: &MediaPayload,
        caption: &str,
    ) -> Result<String, ProviderError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&media.data);
        let mut body = json!({
            "number": number,
            "mediatype": media_kind(&media.mime_type),
            "mimetype": media.mime_type,
            "caption": caption,
            "media": encoded,
        });
        if let Some(name) = &media.filename {
            body["fileName"] = json!(name);
        }
        let resp = self
            .authed(self.client.post(self.url("message/sendMedia")))
            .json(&body)
            .send()
            .await?;
        let body = Self::read_json(resp).await?;
        extract_message_id(&body)
            .ok_or_else(|| ProviderError::Transport("sendMedia response carried no message id".into()))
    }

    /// Voice note (push-to-talk). Evolution has no caption on audio.
    pub async fn send_audio(&self, number: &str, media: &MediaPayload) -> Result<String, ProviderError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&media.data);
        let resp = self
            .authed(self.client.post(self.url("message/sendWhatsAppAudio")))
            .json(&json!({ "number": number, "audio": encoded }))
            .send()
            .await?;
        let body = Self::read_json(resp).await?;
        extract_message_id(&body)
            .ok_or_else(|| ProviderError::Transport("sendWhatsAppAudio response carried no message id".into()))
    }

    pub async fn find_chat(&self, jid: &str) -> Result<ChatSummary, ProviderError> {
        let resp = self
            .authed(self.client.post(self.url("chat/findChats")))
            .json(&json!({ "where": { "remoteJid": jid } }))
            .send()
            .await?;
        let body = Self::read_json(resp).await?;
        let chats = body.as_array().cloned().unwrap_or_default();
        chats
            .iter()
            .find(|c| c["remoteJid"].as_str() == Some(jid) || c["id"].as_str() == Some(jid))
            .map(|c| ChatSummary {
                id: jid.to_string(),
                name: c["pushName"]
                    .as_str()
                    .or_else(|| c["name"].as_str())
                    .map(String::from),
                is_group: jid.ends_with("@g.us"),
                unread_count: c["unreadCount"]
                    .as_u64()
                    .or_else(|| c["unreadMessages"].as_u64())
                    .map(super::messages::saturating_u32)
                    .unwrap_or(0),
            })
            .ok_or_else(|| ProviderError::NotFound(format!("chat {}", jid)))
    }

    /// Attachment bytes of a received message.
    pub async fn media_base64(&self, message_id: &str) -> Result<MediaPayload, ProviderError> {
        let resp = self
            .authed(self.client.post(self.url("chat/getBase64FromMediaMessage")))
            .json(&json!({ "message": { "key": { "id": message_id } }, "convertToMp4": false }))
            .send()
            .await?;
        let body = Self::read_json(resp).await?;
        let encoded = body["base64"]
            .as_str()
            .ok_or_else(|| ProviderError::Transport("media response carried no base64".into()))?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| ProviderError::Transport(format!("media base64: {}", e)))?;
        Ok(MediaPayload {
            data,
            mime_type: body["mimetype"]
                .as_str()
                .unwrap_or("application/octet-stream")
                .to_string(),
            filename: body["fileName"].as_str().map(String::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_from_create_and_connect_shapes() {
        let create = json!({ "qrcode": { "base64": "data:image/png;base64,AAA", "code": "2@x" } });
        assert_eq!(extract_qr(&create).as_deref(), Some("data:image/png;base64,AAA"));
        let connect = json!({ "code": "2@abc", "count": 1 });
        assert_eq!(extract_qr(&connect).as_deref(), Some("2@abc"));
        let connected = json!({ "instance": { "state": "open" } });
        assert_eq!(extract_qr(&connected), None);
    }

    #[test]
    fn message_id_from_send_response() {
        let resp = json!({ "key": { "remoteJid": "1@s.whatsapp.net", "fromMe": true, "id": "BAE5" } });
        assert_eq!(extract_message_id(&resp).as_deref(), Some("BAE5"));
        assert_eq!(extract_message_id(&json!({})), None);
    }

    #[test]
    fn mediatype_from_mime() {
        assert_eq!(media_kind("image/jpeg"), "image");
        assert_eq!(media_kind("video/mp4"), "video");
        assert_eq!(media_kind("audio/ogg"), "audio");
        assert_eq!(media_kind("application/pdf"), "document");
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let text = "é".repeat(200);
        assert!(preview(&text).len() <= 300);
    }
}
