// Evolution Provider — Inbound Message Parsing
// parse_message: one `messages.upsert` record → InboundMessage

use crate::atoms::types::InboundMessage;
use serde_json::Value;

const STATUS_BROADCAST: &str = "status@broadcast";

/// Evolution `messageType` → the short kind the relay payload carries.
fn short_kind(message_type: &str, content: &Value) -> String {
    match message_type {
        "conversation" | "extendedTextMessage" => "chat".into(),
        "imageMessage" => "image".into(),
        "videoMessage" => "video".into(),
        "audioMessage" => {
            if content["audioMessage"]["ptt"].as_bool().unwrap_or(false) {
                "ptt".into()
            } else {
                "audio".into()
            }
        }
        "documentMessage" | "documentWithCaptionMessage" => "document".into(),
        "stickerMessage" => "sticker".into(),
        "locationMessage" => "location".into(),
        "contactMessage" => "vcard".into(),
        "" => "unknown".into(),
        other => other.to_string(),
    }
}

fn has_media(kind: &str) -> bool {
    matches!(kind, "image" | "video" | "audio" | "ptt" | "document" | "sticker")
}

fn timestamp(v: &Value) -> i64 {
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

pub(super) fn saturating_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Parse one record. `own_jid` fills `to`; own messages yield `None`.
pub(crate) fn parse_message(record: &Value, own_jid: &str) -> Option<InboundMessage> {
    let key = &record["key"];
    if key["fromMe"].as_bool().unwrap_or(false) {
        return None;
    }
    let id = key["id"].as_str()?.to_string();
    let from = key["remoteJid"].as_str()?.to_string();

    let content = &record["message"];
    let message_type = record["messageType"]
        .as_str()
        .map(String::from)
        .or_else(|| {
            content
                .as_object()
                .and_then(|o| o.keys().find(|k| k.as_str() != "messageContextInfo").cloned())
        })
        .unwrap_or_default();
    let kind = short_kind(&message_type, content);
    let inner = &content[message_type.as_str()];

    let body = content["conversation"]
        .as_str()
        .or_else(|| content["extendedTextMessage"]["text"].as_str())
        .or_else(|| inner["caption"].as_str())
        .unwrap_or("")
        .to_string();

    let is_ptt = kind == "ptt";
    Some(InboundMessage {
        id,
        to: own_jid.to_string(),
        body,
        timestamp: timestamp(&record["messageTimestamp"]),
        has_media: has_media(&kind),
        is_status: from == STATUS_BROADCAST,
        is_forwarded: inner["contextInfo"]["isForwarded"].as_bool().unwrap_or(false),
        is_ptt,
        duration: if kind == "ptt" || kind == "audio" {
            inner["seconds"].as_u64().map(saturating_u32)
        } else {
            None
        },
        from,
        kind,
    })
}
