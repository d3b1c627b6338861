//! Remote fetch capability.
//!
//! The registry never talks HTTP directly. It depends on a [`Fetcher`] that
//! turns a URL into the file's bytes. [`HttpFetcher`] is the production
//! implementation. [`MemoryFetcher`] serves canned responses; it exists for
//! tests of this crate and of crates that drive a registry, and the daemon
//! never constructs it.

mod memory;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub use self::memory::MemoryFetcher;
use crate::config::FetchConfig;

/// Errors that can occur while fetching a file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("fetch client configuration error: {0}")]
    Configuration(String),

    /// Connecting, sending, or reading the body failed.
    #[error("transport error for {url}: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying failure description.
        message: String,
    },

    /// The server answered with something other than `200 OK`.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The body is larger than the configured limit.
    #[error("{url} exceeds the {limit} byte limit")]
    TooLarge {
        /// Requested URL.
        url: String,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// No response is registered for the URL (in-memory fetcher only).
    #[error("no content registered for {0}")]
    NotAvailable(String),
}

/// Turns a URL into the bytes of the file it names.
///
/// Implementations must be cancel-safe: the registry may drop the returned
/// future when a caller's deadline elapses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the full body behind `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure, a non-success status, or
    /// an oversized body.
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError>;
}

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    /// Build a fetcher from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Configuration`] if the client cannot be built.
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            max_bytes: config.max_file_bytes,
        })
    }

    fn transport(url: &Url, error: &reqwest::Error) -> FetchError {
        FetchError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Self::transport(url, &e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        };
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(too_large());
        }

        // Content-Length is advisory; enforce the limit on the bytes we read.
        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Self::transport(url, &e))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = body.len(), "fetched file");
        Ok(body.freeze())
    }
}
