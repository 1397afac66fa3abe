//! Shared model-service endpoint (base URL, timeout, concurrency limit).
//!
//! The base URL lives behind one lock shared by every clone, so an address
//! fallback made by one request is seen by all later ones.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

const HOSTNAME_LOOPBACK: &str = "localhost";
const NUMERIC_LOOPBACK: &str = "127.0.0.1";

/// Where and how to reach the model service.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base_url: Arc<RwLock<String>>,
    timeout: Duration,
    max_concurrent: usize,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_TIMEOUT, DEFAULT_MAX_CONCURRENT)
    }
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            base_url: Arc::new(RwLock::new(normalize_base_url(&base_url.into()))),
            timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Full URL for an API path (e.g. `/api/tags`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn set_base_url(&self, url: impl Into<String>) {
        let url = normalize_base_url(&url.into());
        log::info!("model service endpoint set to {}", url);
        *self.base_url.write().unwrap_or_else(PoisonError::into_inner) = url;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Swap a `localhost` base URL for the numeric loopback address.
    /// Returns true when the URL changed (the caller may retry once).
    pub fn fallback_to_loopback(&self) -> bool {
        let mut url = self.base_url.write().unwrap_or_else(PoisonError::into_inner);
        if !url.contains(HOSTNAME_LOOPBACK) {
            return false;
        }
        let fallback = url.replacen(HOSTNAME_LOOPBACK, NUMERIC_LOOPBACK, 1);
        log::info!("connection refused on {}, falling back to {}", url, fallback);
        *url = fallback;
        true
    }
}

/// Trim trailing slashes; add `http://` to a bare `host:port`.
pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}
