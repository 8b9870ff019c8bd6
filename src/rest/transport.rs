//! HTTP transport used by the retrying executor.
//!
//! The executor only needs "send this descriptor, give me status and
//! body". Keeping that behind a trait lets each executor own exactly one
//! session and lets tests script failures without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy, StatusCode, Url};
use tokio::sync::RwLock;

use crate::error::{RequestError, TransientRequestError};

use super::RequestDescriptor;

/// Raw answer from the server, before status classification.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Performs exactly one HTTP exchange.
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse, TransientRequestError>;

    /// Releases the underlying session. Must be idempotent.
    async fn close(&self) {}
}

/// reqwest-backed transport owning one connection pool.
pub struct ReqwestTransport {
    client: RwLock<Option<Client>>,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, proxy: Option<&str>) -> Result<Self, RequestError> {
        let mut builder = Client::builder().timeout(timeout);

        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|e| RequestError::Config(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| RequestError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse, TransientRequestError> {
        // clone the handle so a concurrent close() does not abort this request
        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or_else(|| TransientRequestError::Network("HTTP session closed".into()))?;

        let mut url = Url::parse(&request.url)
            .map_err(|e| TransientRequestError::Network(format!("invalid url: {e}")))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        let mut builder = client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse { status, body })
    }

    async fn close(&self) {
        self.client.write().await.take();
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransientRequestError {
    if err.is_timeout() {
        TransientRequestError::Timeout
    } else {
        TransientRequestError::Network(err.to_string())
    }
}
