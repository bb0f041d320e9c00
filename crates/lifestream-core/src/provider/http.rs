//! Shared blocking HTTP client for providers
//!
//! Wraps a `reqwest::blocking::Client` with the settings from `[http]`,
//! optional basic auth, a bounded retry policy and a minimum interval
//! between calls (some APIs throttle aggressive clients). The shutdown
//! flag is checked before every attempt and every sleep.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{SyncError, SyncResult};
use crate::provider::xml::XmlElement;
use crate::sync::Shutdown;

/// Sleep granularity while waiting, so a shutdown is noticed promptly
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Bounded retry with linear backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, at least 1
    pub attempts: u32,
    /// Minimum time between the start of two calls
    pub min_interval: Duration,
    /// Backoff after a failed attempt, multiplied by the attempt number
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            min_interval: Duration::ZERO,
            backoff: Duration::from_millis(500),
        }
    }
}

pub struct HttpClient {
    provider: String,
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
    auth: Option<(String, String)>,
    last_call: Cell<Option<Instant>>,
    shutdown: Shutdown,
}

impl HttpClient {
    pub fn new(provider: &str, config: &HttpConfig, shutdown: Shutdown) -> SyncResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                SyncError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            provider: provider.to_string(),
            client,
            retry: RetryPolicy::default(),
            auth: None,
            last_call: Cell::new(None),
            shutdown,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Some((username.to_string(), password.to_string()));
        self
    }

    /// GET a URL and return the body, retrying per the policy
    pub fn get_text(&self, url: &str) -> SyncResult<String> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;

        loop {
            self.shutdown.check()?;
            self.throttle()?;

            match self.send(url) {
                Ok(body) => return Ok(body),
                Err(message) if attempt < attempts => {
                    warn!(
                        provider = %self.provider,
                        url,
                        attempt,
                        error = %message,
                        "Request failed, retrying"
                    );
                    self.sleep(self.retry.backoff * attempt)?;
                    attempt += 1;
                }
                Err(message) => {
                    return Err(SyncError::fetch(
                        &self.provider,
                        format!("GET {} failed after {} attempt(s): {}", url, attempt, message),
                    ))
                }
            }
        }
    }

    pub fn get_json(&self, url: &str) -> SyncResult<Value> {
        let body = self.get_text(url)?;
        serde_json::from_str(&body).map_err(|e| {
            SyncError::fetch(&self.provider, format!("Invalid JSON from {}: {}", url, e))
        })
    }

    pub fn get_xml(&self, url: &str) -> SyncResult<XmlElement> {
        let body = self.get_text(url)?;
        XmlElement::parse(&body).map_err(|e| {
            SyncError::fetch(&self.provider, format!("Invalid XML from {}: {}", url, e))
        })
    }

    fn send(&self, url: &str) -> Result<String, String> {
        debug!(provider = %self.provider, url, "GET");
        let mut request = self.client.get(url);
        if let Some((username, password)) = &self.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().map_err(|e| e.to_string())?;
        let response = response.error_for_status().map_err(|e| e.to_string())?;
        response.text().map_err(|e| e.to_string())
    }

    fn throttle(&self) -> SyncResult<()> {
        if let Some(last) = self.last_call.get() {
            let elapsed = last.elapsed();
            if elapsed < self.retry.min_interval {
                self.sleep(self.retry.min_interval - elapsed)?;
            }
        }
        self.last_call.set(Some(Instant::now()));
        Ok(())
    }

    fn sleep(&self, duration: Duration) -> SyncResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.shutdown.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Small memo cache that forgets its oldest entries first
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
