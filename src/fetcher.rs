// src/fetcher.rs

//! Artifact retrieval and verification
//!
//! This module provides functionality for:
//! - Downloading artifacts with bounded retry and exponential backoff
//! - Reading artifacts from local mirrors (`file://` URLs and plain paths)
//! - Verifying SHA-256 checksums
//! - Caching verified artifacts by digest

use crate::error::{Error, FetchError, Result};
use crate::manifest::Checksum;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry behaviour for transient failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Growth factor applied after each retry
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) failed
    ///
    /// Computed in whole nanoseconds and capped at `max_delay`, so large
    /// attempt counts saturate instead of overflowing.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }
}

/// A source of remote bytes. One call is one attempt; retrying is the
/// fetcher's job.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError>;
}

/// HTTP(S) transport backed by a blocking reqwest client
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("caskade/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().map_err(|e| {
            let reason = e.to_string();
            if e.is_builder() {
                FetchError::Permanent {
                    url: url.to_string(),
                    reason,
                }
            } else {
                FetchError::Transient {
                    url: url.to_string(),
                    reason,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP {}", status);
            return Err(if is_transient_status(status) {
                FetchError::Transient {
                    url: url.to_string(),
                    reason,
                }
            } else {
                FetchError::Permanent {
                    url: url.to_string(),
                    reason,
                }
            });
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Transient {
                url: url.to_string(),
                reason: format!("Failed to read response body: {}", e),
            })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Artifact fetcher with retry support
pub struct Fetcher<T: Transport = HttpTransport> {
    transport: T,
    policy: RetryPolicy,
    cache_dir: Option<PathBuf>,
}

impl Fetcher<HttpTransport> {
    /// Create a fetcher that talks HTTP with the given request timeout
    pub fn new(timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        Ok(Self::with_transport(HttpTransport::new(timeout)?, policy))
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn with_transport(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            cache_dir: None,
        }
    }

    /// Keep verified artifacts under `dir`
    pub fn with_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Retrieve the bytes behind `url`
    ///
    /// Local paths are read directly. Remote URLs are retried on transient
    /// failures up to the policy's attempt limit; permanent failures are
    /// returned immediately.
    pub fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        if let Some(path) = local_path(url) {
            debug!("Reading local artifact {}", path.display());
            return fs::read(&path).map_err(|e| FetchError::Permanent {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::Permanent {
                url: url.to_string(),
                reason: "unsupported URL scheme".to_string(),
            });
        }

        info!("Fetching {}", url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.get(url) {
                Ok(content) => {
                    debug!("Fetched {} bytes from {}", content.len(), url);
                    return Ok(content);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        "Fetch attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, self.policy.max_attempts, e, delay
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch and verify, consulting the artifact cache first
    ///
    /// Content that fails verification is discarded and never cached.
    pub fn fetch_verified(&self, url: &str, checksum: &Checksum) -> Result<Vec<u8>> {
        let cached = self.cache_path(url, checksum);

        if let Some(path) = &cached
            && let Ok(content) = fs::read(path)
        {
            if verify(&content, checksum).is_ok() {
                debug!("Using cached artifact {}", path.display());
                return Ok(content);
            }
            warn!("Discarding corrupt cached artifact {}", path.display());
            let _ = fs::remove_file(path);
        }

        let content = self.fetch(url)?;
        verify(&content, checksum)?;

        if let Some(path) = &cached
            && let Err(e) = write_cache(path, &content)
        {
            warn!("Failed to cache {}: {}", path.display(), e);
        }

        Ok(content)
    }

    /// Unchecked artifacts have no stable identity and are never cached
    fn cache_path(&self, url: &str, checksum: &Checksum) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let Checksum::Sha256(hex) = checksum else {
            return None;
        };
        Some(dir.join(format!("{}-{}", hex, artifact_file_name(url))))
    }
}

/// Verify content against the expected checksum
///
/// `Checksum::Unchecked` always passes.
pub fn verify(content: &[u8], checksum: &Checksum) -> Result<()> {
    let expected = match checksum {
        Checksum::Unchecked => {
            warn!("Skipping checksum verification (no_check)");
            return Ok(());
        }
        Checksum::Sha256(hex) => hex,
    };

    let actual = sha256_hex(content);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    debug!("Checksum verified: {}", expected);
    Ok(())
}

/// Lowercase hex SHA-256 of `content`
pub fn sha256_hex(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Last path segment of a URL, without query or fragment
pub fn artifact_file_name(url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    trimmed
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("artifact")
        .to_string()
}

fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if !url.contains("://") {
        return Some(PathBuf::from(url));
    }
    None
}

/// Write to a uniquely named temporary file first, then rename into place
fn write_cache(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.persist(path).map(|_| ()).map_err(|e| e.error)
}
