//! HTTP image fetcher.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tracing::{debug, warn};

use crate::domain::entities::parse_image_url;
use crate::domain::errors::{ImageError, TransportKind};
use crate::domain::ports::ImageFetcherPort;

const USER_AGENT: &str = concat!("picgrid/", env!("CARGO_PKG_VERSION"));

/// Largest body size pre-allocated from a `Content-Length` header.
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Accept any certificate and host name.
    pub trust_all_tls: bool,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            trust_all_tls: false,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// Downloads images with `reqwest` and decodes them with `image`.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher from `config`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &FetcherConfig) -> Result<Self, ImageError> {
        if config.trust_all_tls {
            warn!("TLS certificate verification disabled for image downloads");
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(config.trust_all_tls)
            .build()
            .map_err(|e| {
                ImageError::transport(
                    TransportKind::Other,
                    format!("failed to create HTTP client: {e}"),
                )
            })?;

        Ok(Self { client })
    }

    async fn download(&self, url: url::Url) -> Result<Bytes, ImageError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::http(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
            ));
        }

        let capacity = response
            .content_length()
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0)
            .min(MAX_PREALLOC);
        let mut body = BytesMut::with_capacity(capacity);
        while let Some(chunk) = response.chunk().await.map_err(classify_transport)? {
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

#[async_trait]
impl ImageFetcherPort for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<image::DynamicImage, ImageError> {
        let parsed = parse_image_url(url)?;

        debug!(url, "Downloading image from network");
        let bytes = self.download(parsed).await?;
        debug!(url, size = bytes.len(), "Downloaded image");

        decode_image(bytes).await
    }
}

/// Decodes raw bytes into a bitmap on the blocking pool.
///
/// # Errors
/// Returns [`ImageError::Decode`] for unrecognised or corrupt payloads.
pub async fn decode_image(bytes: Bytes) -> Result<image::DynamicImage, ImageError> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| ImageError::decode(format!("decode task panicked: {e}")))?
        .map_err(|e| ImageError::decode(e.to_string()))
}

fn classify_transport(error: reqwest::Error) -> ImageError {
    let kind = if error.is_timeout() {
        TransportKind::Timeout
    } else if error.is_connect() {
        TransportKind::Connect
    } else if error.is_body() || error.is_decode() {
        TransportKind::Body
    } else {
        TransportKind::Other
    };
    ImageError::transport(kind, error.to_string())
}
