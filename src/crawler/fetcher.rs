//! HTTP fetcher with proxy routing and rate limiting
//!
//! reqwest binds proxies to the client, not to a request, so the fetcher
//! keeps one client per proxy (plus one for direct connections) and reuses
//! it across visits. Every request waits on a shared governor rate limiter
//! before it is sent.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{FetchRequest, FetchResponse, Fetcher};
use crate::config::HttpConfig;
use crate::utils::error::FetchError;
use crate::utils::redact_proxy;

/// reqwest-backed [`Fetcher`]
pub struct HttpFetcher {
    /// Clients keyed by proxy URL, `None` for direct connections
    clients: Mutex<HashMap<Option<String>, Client>>,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    /// Default timeout applied to each client
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher from the HTTP config
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        Self::with_config(
            config.rate_limit,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Create a fetcher with an explicit rate and timeout
    ///
    /// A rate of zero is treated as one request per second.
    pub fn with_config(requests_per_second: u32, timeout: Duration) -> Result<Self, FetchError> {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        let fetcher = Self {
            clients: Mutex::new(HashMap::new()),
            rate_limiter,
            timeout,
        };
        // Build the direct client eagerly so a broken TLS setup fails at startup.
        fetcher.client_for(None)?;
        Ok(fetcher)
    }

    /// Number of cached clients (direct client included)
    pub fn cached_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn build_client(&self, proxy: Option<&str>) -> Result<Client, FetchError> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .gzip(true)
            .cookie_store(true);

        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy).map_err(|e| FetchError::Proxy {
                proxy: redact_proxy(proxy),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        } else {
            builder = builder.no_proxy();
        }

        Ok(builder.build()?)
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, FetchError> {
        let key = proxy.map(str::to_string);
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = self.build_client(proxy)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        url::Url::parse(&request.url).map_err(|_| FetchError::InvalidUrl(request.url.clone()))?;

        let client = self.client_for(request.proxy.as_deref())?;

        self.rate_limiter.until_ready().await;

        tracing::debug!(
            url = %request.url,
            proxy = ?request.proxy.as_deref().map(redact_proxy),
            "Fetching URL"
        );

        let response = client
            .get(&request.url)
            .headers(request.headers)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        let body = if request.read_body {
            response.text().await.map_err(classify)?
        } else {
            // Dropping the response closes the stream without downloading it.
            String::new()
        };

        Ok(FetchResponse {
            status,
            body,
            final_url,
        })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_creation() {
        let fetcher = HttpFetcher::new(&crate::config::Config::default().http);
        assert!(fetcher.is_ok());
        assert_eq!(fetcher.unwrap().cached_clients(), 1);

        assert!(HttpFetcher::with_config(0, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_clients_are_cached_per_proxy() {
        let fetcher = HttpFetcher::with_config(10, Duration::from_secs(5)).unwrap();
        fetcher.client_for(Some("http://10.0.0.1:8080")).unwrap();
        fetcher.client_for(Some("http://10.0.0.1:8080")).unwrap();
        fetcher.client_for(Some("http://10.0.0.2:8080")).unwrap();
        assert_eq!(fetcher.cached_clients(), 3);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let fetcher = HttpFetcher::with_config(10, Duration::from_secs(5)).unwrap();
        let err = fetcher
            .fetch(FetchRequest::get("not a url", Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}
