use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::retry::RetryPolicy;
use crate::Error;

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent in-flight requests allowed per upstream host.
    pub max_sockets_per_host: usize,
    pub max_idle_per_host: usize,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sockets_per_host: 100,
            max_idle_per_host: 10,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-host concurrency limiter.
///
/// The map is only locked to look up or insert a host's semaphore; permit
/// accounting itself is done by the semaphore.
#[derive(Debug)]
pub struct HostLimiter {
    per_host: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Holds one of a host's request slots until dropped.
#[derive(Debug)]
pub struct HostPermit {
    host: String,
    _permit: OwnedSemaphorePermit,
}

impl HostPermit {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
            .clone()
    }

    /// Wait for a free slot on `host`.
    pub async fn acquire(&self, host: &str) -> Result<HostPermit, Error> {
        let permit = self
            .semaphore(host)
            .acquire_owned()
            .await
            .map_err(|_| Error::streaming(format!("host limiter for {host} closed")))?;
        Ok(HostPermit {
            host: host.to_string(),
            _permit: permit,
        })
    }

    /// Requests currently holding a slot on `host`.
    pub fn in_flight(&self, host: &str) -> usize {
        let hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        hosts
            .get(host)
            .map_or(0, |sem| self.per_host - sem.available_permits())
    }
}

/// The one outbound HTTP client: pooled connections with keep-alive, a
/// per-host request limiter, and the default retry policy for callers that
/// do not bring their own.
#[derive(Debug, Clone)]
pub struct ResilientClient {
    http: reqwest::Client,
    limiter: Arc<HostLimiter>,
    retry: RetryPolicy,
}

impl ResilientClient {
    pub fn new(pool: &PoolConfig, retry: RetryPolicy) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .pool_idle_timeout(pool.keep_alive)
            .tcp_keepalive(pool.keep_alive)
            .connect_timeout(pool.connect_timeout)
            .build()?;

        tracing::debug!(
            max_sockets_per_host = pool.max_sockets_per_host,
            max_idle_per_host = pool.max_idle_per_host,
            keep_alive_secs = pool.keep_alive.as_secs(),
            "built pooled HTTP client"
        );

        Ok(Self {
            http,
            limiter: Arc::new(HostLimiter::new(pool.max_sockets_per_host)),
            retry,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn limiter(&self) -> &HostLimiter {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send a request once. The returned permit keeps the host slot taken;
    /// hold it for as long as the response body is being read.
    pub async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(reqwest::Response, HostPermit), Error> {
        let request = request.build()?;
        let host = request.url().host_str().unwrap_or_default().to_string();
        let permit = self.limiter.acquire(&host).await?;

        tracing::trace!(host = %host, in_flight = self.limiter.in_flight(&host), "sending request");
        let response = self.http.execute(request).await?;
        Ok((response, permit))
    }
}
