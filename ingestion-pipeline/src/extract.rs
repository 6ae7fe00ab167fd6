use std::time::Duration;

use bytes::Bytes;
use common::{
    error::AppError,
    storage::store::{StorageManager, SIGNED_URL_TTL_SECS},
};
use dom_smoothie::{Readability, TextMode};
use tracing::{debug, warn};

/// Timeout for fetching source bytes or article HTML.
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Reduce an absolute URL to the bare object key; plain keys pass through.
pub fn normalize_storage_key(storage_key: &str) -> String {
    if storage_key.starts_with("http://") || storage_key.starts_with("https://") {
        if let Ok(parsed) = url::Url::parse(storage_key) {
            return parsed.path().trim_start_matches('/').to_string();
        }
    }
    storage_key.to_string()
}

/// File extension (lowercased) used for extraction dispatch.
pub fn key_extension(key: &str) -> String {
    key.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Fetch the object behind a storage key. Signing backends hand out a
/// presigned GET URL which is fetched over HTTP; the others are read
/// directly from the store.
pub async fn fetch_source_bytes(storage: &StorageManager, key: &str) -> Result<Bytes, AppError> {
    let signed = storage
        .signed_url(key, Duration::from_secs(SIGNED_URL_TTL_SECS))
        .await
        .map_err(|e| AppError::external("StorageProvider", e))?;

    match signed {
        Some(url) => {
            debug!(key, "fetching source through presigned url");
            let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| AppError::external("StorageProvider", e))?
                .error_for_status()
                .map_err(|e| AppError::external("StorageProvider", e))?;
            response
                .bytes()
                .await
                .map_err(|e| AppError::external("StorageProvider", e))
        }
        None => storage
            .get(key)
            .await
            .map_err(|e| AppError::external("StorageProvider", e)),
    }
}

/// Extract the text layer of a PDF, pages concatenated in document order.
/// Parsing runs on a blocking thread.
pub async fn extract_pdf_text(pdf_bytes: Vec<u8>) -> Result<String, AppError> {
    let text = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&pdf_bytes).map(|s| s.trim().to_string())
    })
    .await?
    .map_err(|err| AppError::Processing(format!("Failed to extract text from PDF: {err}")))?;

    Ok(text)
}

/// Why a URL may not be fetched by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchRefusal {
    Scheme,
    NoHost,
    RestrictedHost,
}

impl FetchRefusal {
    fn message(self) -> &'static str {
        match self {
            Self::Scheme => "Only http and https URLs can be ingested",
            Self::NoHost => "Ingestion URL has no host",
            Self::RestrictedHost => "Ingestion URL points at a restricted host",
        }
    }
}

/// Decide whether the pipeline may fetch this URL. Only public http(s)
/// hosts qualify; loopback, private-range and special-purpose addresses
/// are refused.
fn classify_fetch_target(url: &url::Url) -> Result<(), FetchRefusal> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchRefusal::Scheme);
    }

    let Some(host) = url.host() else {
        return Err(FetchRefusal::NoHost);
    };

    let public = match host {
        url::Host::Domain(name) => !name.eq_ignore_ascii_case("localhost"),
        url::Host::Ipv4(v4) => {
            !(v4.is_loopback()
                || v4.is_unspecified()
                || v4.is_multicast()
                || v4.is_private()
                || v4.is_link_local())
        }
        url::Host::Ipv6(v6) => {
            !(v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || v6.is_unique_local()
                || v6.is_unicast_link_local())
        }
    };

    if public {
        Ok(())
    } else {
        Err(FetchRefusal::RestrictedHost)
    }
}

/// Fetch a web page and reduce it to its readable article text.
pub async fn extract_url_article(source_url: &str) -> Result<String, AppError> {
    let parsed = url::Url::parse(source_url)
        .map_err(|_| AppError::Validation("Invalid URL".to_string()))?;
    if let Err(refusal) = classify_fetch_target(&parsed) {
        warn!(url = %parsed, reason = ?refusal, "refused to fetch ingestion url");
        return Err(AppError::Validation(refusal.message().to_string()));
    }

    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    let html = client
        .get(parsed)
        .send()
        .await
        .map_err(|e| AppError::external("UrlFetch", e))?
        .error_for_status()
        .map_err(|e| AppError::external("UrlFetch", e))?
        .text()
        .await
        .map_err(|e| AppError::external("UrlFetch", e))?;

    let config = dom_smoothie::Config {
        text_mode: TextMode::Markdown,
        ..Default::default()
    };
    let mut readability = Readability::new(html, None, Some(config))
        .map_err(|e| AppError::Processing(format!("Failed to parse article: {e}")))?;
    let article = readability
        .parse()
        .map_err(|e| AppError::Processing(format!("Failed to parse article: {e}")))?;

    Ok(article.text_content.into())
}
