//! HTTP reachability probe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::domain::errors::{ImageError, TransportKind};
use crate::domain::ports::ReachabilityProbe;

/// Default host contacted to decide whether the network is usable.
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com";

/// Probes reachability with a `HEAD` request.
///
/// Any HTTP response counts as reachable, whatever its status.
#[derive(Debug, Clone)]
pub struct HttpReachabilityProbe {
    client: Client,
    url: String,
}

impl HttpReachabilityProbe {
    /// Creates a probe against `url` with the given request timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ImageError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                ImageError::transport(
                    TransportKind::Other,
                    format!("failed to create probe client: {e}"),
                )
            })?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Returns the probed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn probe(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                debug!(url = %self.url, status = %response.status(), "Reachability probe succeeded");
                true
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Reachability probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_any_response_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let probe =
            HttpReachabilityProbe::new(format!("http://{addr}"), Duration::from_secs(2)).unwrap();

        assert!(probe.probe().await);
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe =
            HttpReachabilityProbe::new(format!("http://{addr}"), Duration::from_secs(2)).unwrap();

        assert_eq!(probe.url(), format!("http://{addr}"));
        assert!(!probe.probe().await);
    }
}
