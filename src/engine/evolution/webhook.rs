// Evolution Provider — Webhook Listener
// translate_webhook (pure), run_webhook_listener (raw TCP HTTP server)

use super::messages::parse_message;
use crate::atoms::constants::LOGGED_OUT_REASON;
use crate::atoms::types::{LifecycleEvent, SessionInfo};
use log::{debug, info, warn};
use serde_json::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_QUEUE: usize = 64;

/// Map one Evolution webhook body to lifecycle events, in emit order.
/// Accepts both `qrcode.updated` and `QRCODE_UPDATED` spellings.
pub fn translate_webhook(payload: &Value) -> Vec<LifecycleEvent> {
    let event = payload["event"]
        .as_str()
        .unwrap_or("")
        .to_ascii_lowercase()
        .replace('_', ".");
    let data = &payload["data"];

    match event.as_str() {
        "qrcode.updated" => {
            let qr = data["qrcode"]["base64"]
                .as_str()
                .or_else(|| data["qrcode"]["code"].as_str())
                .or_else(|| data["qrcode"].as_str())
                .unwrap_or("");
            if qr.is_empty() {
                Vec::new()
            } else {
                vec![LifecycleEvent::QrRequested(qr.to_string())]
            }
        }
        "connection.update" => {
            let state = data["state"].as_str().unwrap_or("");
            match state {
                "open" | "connected" => {
                    let mut events = Vec::new();
                    if let Some(wuid) = data["wuid"].as_str().filter(|s| !s.is_empty()) {
                        events.push(LifecycleEvent::InfoUpdated(SessionInfo {
                            id: wuid.to_string(),
                            push_name: data["profileName"].as_str().map(String::from),
                            platform: None,
                        }));
                    }
                    events.push(LifecycleEvent::Authenticated);
                    events.push(LifecycleEvent::Ready);
                    events
                }
                "close" => {
                    let code = data["statusReason"].as_u64();
                    let reason = match code {
                        Some(401) => LOGGED_OUT_REASON.to_string(),
                        Some(c) => format!("connection closed ({})", c),
                        None => "connection closed".to_string(),
                    };
                    vec![LifecycleEvent::Disconnected(reason)]
                }
                "" => Vec::new(),
                other => vec![LifecycleEvent::StateChanged(other.to_string())],
            }
        }
        "logout.instance" => vec![LifecycleEvent::Disconnected(LOGGED_OUT_REASON.to_string())],
        "messages.upsert" => {
            let own = payload["sender"].as_str().unwrap_or("");
            let records = match data.as_array() {
                Some(arr) => arr.iter().collect::<Vec<_>>(),
                None => vec![data],
            };
            records
                .into_iter()
                .filter_map(|r| parse_message(r, own))
                .map(LifecycleEvent::InboundMessage)
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Split a raw HTTP request into (Content-Length, header length).
pub(super) fn parse_head(buf: &[u8]) -> Option<(usize, usize)> {
    let end = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let head = String::from_utf8_lossy(&buf[..end]);
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    Some((length, end))
}

/// Read one request body. Evolution posts large media records, so the body
/// is read up to Content-Length rather than from a single `read`.
async fn read_body(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some((length, head)) = parse_head(&buf) {
            if length > MAX_REQUEST_BYTES {
                return Ok(None);
            }
            while buf.len() < head + length {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let end = (head + length).min(buf.len());
            return Ok(Some(buf[head..end].to_vec()));
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Ok(None);
        }
    }
}

/// Read one webhook off `stream`, queue its body, then answer 200.
/// Queueing before the reply keeps sequential posts in order.
async fn receive(mut stream: TcpStream, bodies: mpsc::Sender<Vec<u8>>) {
    let body = match tokio::time::timeout(READ_TIMEOUT, read_body(&mut stream)).await {
        Ok(Ok(Some(body))) => body,
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            debug!("[evolution] Read error: {}", e);
            return;
        }
        Err(_) => {
            debug!("[evolution] Dropping idle webhook connection");
            return;
        }
    };
    if bodies.send(body).await.is_err() {
        return;
    }
    // Evolution expects a quick 200.
    let _ = stream
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK")
        .await;
}

/// Minimal HTTP listener that receives Evolution webhooks and pushes the
/// translated events into the provider's channel. Bound to 127.0.0.1.
/// Each connection is read on its own task; bodies are translated one at a
/// time here, so events leave in a single ordered stream.
/// Account info seen on `connection.update` is stored in `info`.
pub(crate) async fn run_webhook_listener(
    listener: TcpListener,
    events: mpsc::Sender<LifecycleEvent>,
    info: Arc<Mutex<Option<SessionInfo>>>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("[evolution] Webhook listener started on {}", addr);
    }
    let (body_tx, mut body_rx) = mpsc::channel::<Vec<u8>>(BODY_QUEUE);

    loop {
        let body = tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _peer)) => {
                        tokio::spawn(receive(stream, body_tx.clone()));
                    }
                    Err(e) => warn!("[evolution] Accept error: {}", e),
                }
                continue;
            }
            Some(body) = body_rx.recv() => body,
        };

        let payload: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                debug!("[evolution] Ignoring non-JSON webhook body: {}", e);
                continue;
            }
        };

        for event in translate_webhook(&payload) {
            if let LifecycleEvent::InfoUpdated(me) = &event {
                *info.lock() = Some(me.clone());
            }
            if events.send(event).await.is_err() {
                info!("[evolution] Event receiver dropped, stopping webhook listener");
                return;
            }
        }
    }
}
