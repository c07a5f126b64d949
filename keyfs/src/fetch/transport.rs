//! Remote transport used by the fetch backend.
//!
//! [`Transport`] is the seam between the backend and the network. The HTTP
//! implementation issues `Range` GETs, POSTs partial updates with a
//! `Content-Range` header and deletes with DELETE.

use crate::config::TransportOptions;
use crate::error::{PathHint, StoreError, StoreResult};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use reqwest::header::{CONTENT_RANGE, HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::{Client, StatusCode};
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Failure classes reported by a transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request never produced a response.
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("response status code is {0}")]
    Status(u16),

    #[error("expected {expected} bytes, received {actual}")]
    Size { expected: u64, actual: u64 },

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Buffer(String),
}

impl TransportError {
    /// Map onto the store taxonomy, naming `path` in the error.
    pub fn into_store_error(self, path: &str) -> StoreError {
        let path = PathHint::some(path);
        let message = self.to_string();
        match self {
            TransportError::Fetch(_) => StoreError::RemoteIo { path, message },
            TransportError::Status(code) if code >= 500 => StoreError::RemoteIo { path, message },
            TransportError::Status(_) => StoreError::Io { path, message },
            TransportError::Size { .. } => StoreError::BadExchange { path, message },
            TransportError::Buffer(_) => StoreError::Io { path, message },
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Fetch `range` of `url`, or the whole resource when `range` is `None`.
    async fn get(&self, url: &str, range: Option<Range<u64>>) -> Result<Bytes, TransportError>;

    /// Write `data` into the resource at `offset`.
    async fn set(&self, url: &str, data: Bytes, offset: u64) -> Result<(), TransportError>;

    async fn remove(&self, url: &str) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: Transport> Transport for Arc<T> {
    async fn get(&self, url: &str, range: Option<Range<u64>>) -> Result<Bytes, TransportError> {
        (**self).get(url, range).await
    }

    async fn set(&self, url: &str, data: Bytes, offset: u64) -> Result<(), TransportError> {
        (**self).set(url, data, offset).await
    }

    async fn remove(&self, url: &str) -> Result<(), TransportError> {
        (**self).remove(url).await
    }
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(options: &TransportOptions) -> StoreResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StoreError::InvalidInput(format!("header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| StoreError::InvalidInput(format!("header value for {name}: {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = options.timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(agent) = &options.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::InvalidInput(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    fn md5_base64(data: &[u8]) -> String {
        let sum = md5::compute(data);
        B64.encode(sum.0)
    }
}

fn check_status(status: StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, range: Option<Range<u64>>) -> Result<Bytes, TransportError> {
        let mut request = self.client.get(url);
        if let Some(r) = &range {
            if r.is_empty() {
                return Ok(Bytes::new());
            }
            request = request.header(RANGE, format!("bytes={}-{}", r.start, r.end - 1));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Fetch(e.to_string()))?;
        let status = response.status();
        check_status(status)?;
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Buffer(e.to_string()))?;
        debug!(url, status = status.as_u16(), len = body.len(), "fetched");

        let Some(r) = range else {
            return Ok(body);
        };
        if body.is_empty() {
            // reported as missing data by the caller
            return Ok(body);
        }
        let expected = r.end - r.start;
        // servers ignoring Range answer 200 with the whole body
        let body = if status == StatusCode::OK && body.len() as u64 >= r.end {
            body.slice(r.start as usize..r.end as usize)
        } else {
            body
        };
        if body.len() as u64 != expected {
            return Err(TransportError::Size {
                expected,
                actual: body.len() as u64,
            });
        }
        Ok(body)
    }

    async fn set(&self, url: &str, data: Bytes, offset: u64) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(url)
            .header("Content-MD5", Self::md5_base64(&data));
        if !data.is_empty() {
            let last = offset + data.len() as u64 - 1;
            request = request.header(CONTENT_RANGE, format!("bytes {offset}-{last}/*"));
        }
        let response = request
            .body(data)
            .send()
            .await
            .map_err(|e| TransportError::Fetch(e.to_string()))?;
        check_status(response.status())
    }

    async fn remove(&self, url: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| TransportError::Fetch(e.to_string()))?;
        check_status(response.status())
    }
}
