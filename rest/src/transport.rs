use crate::{PreparedRequest, RawResponse, TransportError};
use async_trait::async_trait;
use std::time::Duration;

/// Executes a single HTTP request. Implementations must not retry; the
/// dispatcher owns retry and ratelimit policy.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(&self, request: &PreparedRequest) -> Result<RawResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .use_rustls_tls();

        #[cfg(feature = "compression")]
        {
            builder = builder.gzip(true);
        }

        Ok(builder.build()?)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &PreparedRequest) -> Result<RawResponse, TransportError> {
        // reqwest::Client uses Arcs internally, so this shares the connection pool
        let mut req = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }

        let res = req.send().await.map_err(map_err)?;
        let status = res.status();
        let headers = res.headers().clone();
        let body = res.bytes().await.map_err(map_err)?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_err(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Reqwest(e)
    }
}
