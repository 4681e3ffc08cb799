// Chatbridge Engine — HTTP Media Resolver
// Fetches an outbound attachment from a URL.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::MediaResolver;
use crate::atoms::types::MediaPayload;
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use std::time::Duration;

const FALLBACK_MIME: &str = "application/octet-stream";

pub struct HttpMediaResolver {
    client: Client,
}

impl HttpMediaResolver {
    pub fn new(timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(HttpMediaResolver { client })
    }

    pub fn with_client(client: Client) -> Self {
        HttpMediaResolver { client }
    }
}

#[async_trait]
impl MediaResolver for HttpMediaResolver {
    async fn resolve(&self, url: &str) -> EngineResult<MediaPayload> {
        let parsed = url::Url::parse(url).map_err(|e| EngineError::media(url, e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(EngineError::media(url, format!("unsupported scheme '{}'", parsed.scheme())));
        }

        let resp = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| EngineError::media(url, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::media(url, format!("HTTP {}", status.as_u16())));
        }

        let header_mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty());

        let data = resp
            .bytes()
            .await
            .map_err(|e| EngineError::media(url, e.to_string()))?
            .to_vec();

        let filename = filename_from_url(&parsed);
        let mime_type = header_mime
            .or_else(|| filename.as_deref().and_then(mime_from_filename).map(String::from))
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        debug!("[media] Resolved {} ({} bytes, {})", url, data.len(), mime_type);
        Ok(MediaPayload { data, mime_type, filename })
    }
}

/// Last non-empty path segment, if any.
pub fn filename_from_url(url: &url::Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub fn mime_from_filename(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "ogg" | "opus" => "audio/ogg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "json" => "application/json",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => return None,
    };
    Some(mime)
}

/// File extension for a MIME type, used when naming downloaded media.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.split(';').next().unwrap_or(mime).trim() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await;
            stream.write_all(response).await.unwrap();
            let _ = stream.shutdown().await;
        });
        format!("http://{}", addr)
    }

    #[test]
    fn filename_is_last_segment() {
        let url = url::Url::parse("https://cdn.example.com/a/b/photo.JPG?x=1").unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), Some("photo.JPG"));
        let bare = url::Url::parse("https://cdn.example.com/").unwrap();
        assert_eq!(filename_from_url(&bare), None);
    }

    #[test]
    fn mime_guess_from_extension() {
        assert_eq!(mime_from_filename("photo.JPG"), Some("image/jpeg"));
        assert_eq!(mime_from_filename("voice.opus"), Some("audio/ogg"));
        assert_eq!(mime_from_filename("README"), None);
        assert_eq!(mime_from_filename("archive.xyz"), None);
        assert_eq!(extension_for_mime("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(extension_for_mime("application/x-unknown"), "bin");
    }

    #[tokio::test]
    async fn resolves_body_and_content_type() {
        let base = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: image/png; charset=binary\r\nContent-Length: 4\r\nConnection: close\r\n\r\n\x89PNG",
        )
        .await;
        let resolver = HttpMediaResolver::new(Duration::from_secs(5)).unwrap();
        let media = resolver.resolve(&format!("{}/img/cat.bin", base)).await.unwrap();
        assert_eq!(media.data, b"\x89PNG".to_vec());
        assert_eq!(media.mime_type, "image/png");
        assert_eq!(media.filename.as_deref(), Some("cat.bin"));
    }

    #[tokio::test]
    async fn non_success_status_is_resolution_failure() {
        let base = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let resolver = HttpMediaResolver::new(Duration::from_secs(5)).unwrap();
        let err = resolver.resolve(&format!("{}/missing.png", base)).await.unwrap_err();
        match err {
            EngineError::MediaResolutionFailed { message, .. } => assert!(message.contains("404")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let resolver = HttpMediaResolver::new(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            resolver.resolve("file:///etc/passwd").await,
            Err(EngineError::MediaResolutionFailed { .. })
        ));
        assert!(matches!(
            resolver.resolve("not a url").await,
            Err(EngineError::MediaResolutionFailed { .. })
        ));
    }
}
