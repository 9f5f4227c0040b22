//! Downloading keylist documents and their signatures.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, ClientBuilder};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Retrieves the raw bytes behind a URL.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Download behavior of an [`HttpFetcher`].
///
/// The defaults suit keylists served from ordinary web hosting: thirty
/// seconds per request and three further attempts after a failure.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct FetcherOptions {
    /// Upper bound for one request, including reading the body.
    pub timeout: Duration,
    /// Attempts after the first one. Client errors (4xx) are never retried.
    pub retries: usize,
}

impl FetcherOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: impl Into<Duration>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 3,
        }
    }
}

/// Fetches documents over HTTP(S), retrying failed requests with exponential
/// backoff.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
    retries: usize,
}

impl HttpFetcher {
    pub fn new(options: FetcherOptions) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(options.timeout)
            .build()
            .map_err(|err| Error::Http {
                url: String::new(),
                reason: err.to_string(),
            })?;

        Ok(Self {
            client,
            retries: options.retries,
        })
    }

    async fn fetch_once(&self, url: &url::Url) -> Result<Vec<u8>> {
        let http_err = |err: reqwest::Error| Error::Http {
            url: url.to_string(),
            reason: err.to_string(),
        };

        let response = self.client.get(url.clone()).send().await.map_err(http_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().await.map_err(http_err)?.to_vec())
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        // A URL that does not parse will not parse on retry either.
        let parsed = url::Url::parse(url).map_err(|err| Error::Http {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        debug!(url, "fetching");

        (|| async { self.fetch_once(&parsed).await })
            .retry(ExponentialBuilder::default().with_max_times(self.retries))
            .when(is_retryable)
            .notify(|err, after| info!("failed to retrieve, retrying in {after:?}: {err}"))
            .await
    }
}

/// A missing or forbidden document will not appear by asking again.
fn is_retryable(err: &Error) -> bool {
    !matches!(err, Error::HttpStatus { status, .. } if (400..500).contains(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_not_retried() {
        let status = |status| Error::HttpStatus {
            url: "https://example.org/keylist.txt.sig".to_string(),
            status,
        };
        assert!(!is_retryable(&status(404)));
        assert!(!is_retryable(&status(403)));
        assert!(is_retryable(&status(500)));
        assert!(is_retryable(&status(503)));
        assert!(is_retryable(&Error::Http {
            url: "https://example.org/keylist.txt".to_string(),
            reason: "connection reset".to_string(),
        }));
    }

    #[test]
    fn test_options_builder() {
        let options = FetcherOptions::new()
            .timeout(Duration::from_secs(5))
            .retries(0);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.retries, 0);

        let options = FetcherOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.retries, 3);
    }

    #[tokio::test]
    async fn test_unparsable_url_not_retried() {
        let fetcher = HttpFetcher::new(FetcherOptions::new().retries(5)).unwrap();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        match err {
            Error::Http { url, .. } => assert_eq!(url, "not a url"),
            other => panic!("expected Http error, got {other:?}"),
        }
    }
}
