use std::io::Write;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::AtlasError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retrieves the body of a URL.
pub trait Transfer: Send + Sync {
    /// The whole body in memory. Meant for small documents such as manifests.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, AtlasError>;

    /// Streams the body into `out` and returns the number of bytes written.
    /// On error `out` may hold a partial body.
    fn fetch_to(&self, url: &str, out: &mut dyn Write) -> Result<u64, AtlasError> {
        let bytes = self.fetch(url)?;
        out.write_all(&bytes)
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        Ok(bytes.len() as u64)
    }
}

#[derive(Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> Result<Self, AtlasError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AtlasError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("atlas-fetcher/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AtlasError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| AtlasError::Transfer {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, AtlasError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = self.client.get(url).send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(url, status, attempt, "retrying");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(url, error = %err, attempt, "retrying");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(AtlasError::Transfer {
                        url: url.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    fn open(&self, url: &str) -> Result<reqwest::blocking::Response, AtlasError> {
        let response = self.send_with_retries(url)?;
        if !response.status().is_success() {
            return Err(AtlasError::TransferStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

impl Transfer for HttpTransfer {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, AtlasError> {
        let bytes = self.open(url)?.bytes().map_err(|err| AtlasError::Transfer {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    fn fetch_to(&self, url: &str, out: &mut dyn Write) -> Result<u64, AtlasError> {
        let mut response = self.open(url)?;
        let written = std::io::copy(&mut response, out).map_err(|err| AtlasError::Transfer {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        debug!(url, bytes = written, "downloaded");
        Ok(written)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
