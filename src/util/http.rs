//! Network transport used by providers and the downloader.
//!
//! Providers only read small index documents; the downloader streams archive
//! bodies to disk. Both go through [`Transport`] so tests can substitute an
//! in-memory implementation and count fetches.

use std::io::{self, Read, Write};
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Failure while talking to an upstream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The upstream answered, and the thing does not exist.
    #[error("not found: {url}")]
    NotFound { url: String },

    /// The upstream could not be reached or answered with a server error.
    #[error("upstream unavailable: {url}: {message}")]
    Unavailable { url: String, message: String },

    /// Writing the body locally failed.
    #[error("failed to write response body: {0}")]
    Io(#[from] io::Error),
}

/// Byte-level access to upstream resources.
pub trait Transport: Send + Sync {
    /// Fetch a small text document.
    fn get_text(&self, url: &Url) -> Result<String, TransportError>;

    /// Stream a resource into `sink`, returning the number of bytes written.
    fn fetch(&self, url: &Url, sink: &mut dyn Write) -> Result<u64, TransportError>;
}

/// The default transport: reqwest for `http(s)://`, direct reads for `file://`.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("extbrew/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpTransport { client })
    }

    fn send(&self, url: &Url) -> Result<reqwest::blocking::Response, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| TransportError::Unavailable {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(TransportError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(TransportError::Unavailable {
                url: url.to_string(),
                message: format!("HTTP {}", status),
            });
        }
        Ok(response)
    }

    fn open_file(url: &Url) -> Result<std::fs::File, TransportError> {
        let path = url.to_file_path().map_err(|_| TransportError::NotFound {
            url: url.to_string(),
        })?;
        std::fs::File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TransportError::NotFound {
                url: url.to_string(),
            },
            _ => TransportError::Io(e),
        })
    }
}

impl Transport for HttpTransport {
    fn get_text(&self, url: &Url) -> Result<String, TransportError> {
        if url.scheme() == "file" {
            let mut text = String::new();
            Self::open_file(url)?.read_to_string(&mut text)?;
            return Ok(text);
        }

        self.send(url)?
            .text()
            .map_err(|e| TransportError::Unavailable {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    fn fetch(&self, url: &Url, sink: &mut dyn Write) -> Result<u64, TransportError> {
        if url.scheme() == "file" {
            let mut file = Self::open_file(url)?;
            return Ok(io::copy(&mut file, sink)?);
        }

        let mut response = self.send(url)?;
        // A body that breaks off mid-stream is a network failure, not a local one.
        response
            .copy_to(sink)
            .map_err(|e| TransportError::Unavailable {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}
