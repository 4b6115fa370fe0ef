//! Bounded HTTP media download.

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};
use url::Url;

use crate::error::{MediaError, MediaResult};

/// Media bytes fetched over HTTP.
#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub bytes: Vec<u8>,
    /// `Content-Type` essence, without parameters
    pub content_type: Option<String>,
}

/// Fetch `url` into memory, refusing bodies larger than `size_limit`.
///
/// Only `http` and `https` URLs are accepted. A declared `Content-Length`
/// over the ceiling fails before the body is read; otherwise the body is
/// streamed and the download aborts as soon as it would cross the ceiling.
pub async fn download_media_buffer(
    client: &reqwest::Client,
    url: &str,
    size_limit: u64,
) -> MediaResult<DownloadedMedia> {
    let parsed = Url::parse(url).map_err(|e| MediaError::InvalidUrl(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(MediaError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    debug!(url = %parsed, size_limit, "Downloading media");

    let response = client
        .get(parsed.clone())
        .send()
        .await
        .map_err(|e| MediaError::download_failed(format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MediaError::download_failed(format!("HTTP {status}")));
    }

    if let Some(declared) = response.content_length() {
        if declared > size_limit {
            return Err(MediaError::SizeExceeded { limit: size_limit });
        }
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());

    let capacity = response.content_length().unwrap_or(0).min(size_limit) as usize;
    let mut bytes = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| MediaError::download_failed(format!("body read failed: {e}")))?;
        if (bytes.len() + chunk.len()) as u64 > size_limit {
            return Err(MediaError::SizeExceeded { limit: size_limit });
        }
        bytes.extend_from_slice(&chunk);
    }

    info!(url = %parsed, bytes = bytes.len(), content_type = ?content_type, "Media downloaded");

    Ok(DownloadedMedia {
        bytes,
        content_type,
    })
}
