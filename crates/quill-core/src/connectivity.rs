//! "Is the network usable now?"
//!
//! Consulted before immediate online writes and before each scheduled run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::net::TcpStream;

use crate::config::ConfigError;
use crate::error::Result;

#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Connectivity decided by the host, e.g. an OS network callback or a test
#[derive(Debug, Clone)]
pub struct ConnectivityFlag(Arc<AtomicBool>);

impl ConnectivityFlag {
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Connectivity for ConnectivityFlag {
    async fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Online when a TCP connection to the API host opens within the timeout
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe the host and port of an `http(s)://` URL
    pub fn for_url(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|error| ConfigError::Invalid(format!("API URL '{url}': {error}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::Invalid(format!("API URL '{url}' has no host")))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| ConfigError::Invalid(format!("API URL '{url}' has no port")))?;
        Ok(Self {
            address: format!("{host}:{port}"),
            timeout,
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Connectivity for TcpProbe {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(error)) => {
                tracing::debug!(address = %self.address, error = %error, "Connectivity probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(address = %self.address, "Connectivity probe timed out");
                false
            }
        }
    }
}
