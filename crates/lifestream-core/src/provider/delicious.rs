//! del.icio.us bookmarks
//!
//! The v1 API is authenticated with basic auth and throttles clients that
//! call more than once a second, so every call waits at least two seconds
//! after the previous one and is attempted three times. A run asks
//! `posts/update` first and stops when nothing was posted since the
//! checkpoint; otherwise it fetches `posts/get` for every date listed by
//! `posts/dates` that is newer than the checkpoint.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Url;
use tracing::{debug, info};

use crate::candidate::Candidate;
use crate::config::{Config, DeliciousConfig, HttpConfig};
use crate::error::{SyncError, SyncResult};
use crate::models::{Checkpoint, RecordType};
use crate::provider::http::{HttpClient, RetryPolicy};
use crate::provider::{
    unsupported, FetchContext, Provider, RawPayload, Registration, XmlElement,
};
use crate::sync::Shutdown;

const NAME: &str = "delicious";
const API_ROOT: &str = "https://api.del.icio.us/v1/";

pub struct DeliciousProvider {
    config: DeliciousConfig,
    client: HttpClient,
}

impl DeliciousProvider {
    pub fn new(config: DeliciousConfig, http: &HttpConfig, shutdown: Shutdown) -> SyncResult<Self> {
        let mut client = HttpClient::new(NAME, http, shutdown)?.with_retry(RetryPolicy {
            attempts: 3,
            min_interval: Duration::from_secs(2),
            backoff: Duration::ZERO,
        });
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            client = client.with_basic_auth(username, password);
        }

        Ok(Self { config, client })
    }

    pub fn from_config(config: &Config, shutdown: Shutdown) -> SyncResult<Self> {
        Self::new(config.delicious.clone().unwrap_or_default(), &config.http, shutdown)
    }

    fn call(&self, method: &str, params: &[(&str, &str)]) -> SyncResult<XmlElement> {
        let url = Url::parse(API_ROOT)
            .and_then(|root| root.join(method))
            .map_err(|e| SyncError::fetch(NAME, e))?;
        let url = if params.is_empty() {
            url
        } else {
            Url::parse_with_params(url.as_str(), params).map_err(|e| SyncError::fetch(NAME, e))?
        };
        self.client.get_xml(url.as_str())
    }
}

impl Provider for DeliciousProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        [&self.config.username, &self.config.password]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }

    fn registrations(&self) -> Vec<Registration> {
        vec![Registration::new(RecordType::Bookmark, 0)]
    }

    fn fetch(&self, record_type: RecordType, ctx: &FetchContext<'_>) -> SyncResult<RawPayload> {
        if record_type != RecordType::Bookmark {
            return Err(unsupported(NAME, record_type));
        }
        let checkpoint = ctx.checkpoint();

        let update = self.call("posts/update", &[])?;
        if let Some(last_post) = update.attr("time").and_then(parse_time) {
            if !checkpoint.admits(last_post) {
                info!(%last_post, checkpoint = %checkpoint.timestamp, "Skipping update, nothing posted");
                return Ok(RawPayload::Empty);
            }
        }

        let dates = self.call("posts/dates", &[])?;
        let mut documents = Vec::new();
        // Oldest date first
        for date in dates.descendants("date").into_iter().rev() {
            ctx.check_shutdown()?;
            let Some(day) = date.attr("date").and_then(parse_day) else {
                continue;
            };
            if !admits_day(checkpoint, day) {
                continue;
            }

            let dt = day.format("%Y-%m-%d").to_string();
            debug!(date = %dt, "Fetching bookmarks");
            documents.push(RawPayload::Xml(self.call("posts/get", &[("dt", dt.as_str())])?));
        }

        Ok(RawPayload::Documents(documents))
    }

    fn normalize(
        &self,
        record_type: RecordType,
        payload: RawPayload,
        checkpoint: &Checkpoint,
    ) -> SyncResult<Vec<Candidate>> {
        let documents = match (record_type, payload) {
            (_, RawPayload::Empty) => return Ok(Vec::new()),
            (RecordType::Bookmark, RawPayload::Documents(documents)) => documents,
            (RecordType::Bookmark, xml @ RawPayload::Xml(_)) => vec![xml],
            _ => return Err(unsupported(NAME, record_type)),
        };

        let mut candidates = Vec::new();
        for document in documents {
            let RawPayload::Xml(root) = document else {
                return Err(unsupported(NAME, record_type));
            };
            for post in root.descendants("post") {
                if let Some(candidate) = post_candidate(post) {
                    if candidate.timestamp.map_or(true, |t| checkpoint.admits(t)) {
                        candidates.push(candidate);
                    }
                }
            }
        }
        Ok(candidates)
    }

    fn source_id(&self, _record_type: RecordType, candidate: &Candidate) -> Option<String> {
        candidate
            .get_str("hash")
            .filter(|h| !h.is_empty())
            .map(String::from)
    }
}

fn post_candidate(post: &XmlElement) -> Option<Candidate> {
    let href = post.attr("href").filter(|h| !h.is_empty())?;
    let tags = post.attr("tag").unwrap_or_default().split_whitespace();

    let mut candidate = Candidate::new()
        .field("url", href)
        .field("description", post.attr("description").unwrap_or_default())
        .field("extended", post.attr("extended").unwrap_or_default())
        .field("hash", post.attr("hash").unwrap_or_default())
        .with_url(href)
        .with_tags(tags);
    if let Some(time) = post.attr("time").and_then(parse_time) {
        candidate = candidate.at(time);
    }
    Some(candidate)
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// A date is fetched unless it ends before the checkpoint
fn admits_day(checkpoint: &Checkpoint, day: NaiveDate) -> bool {
    if checkpoint.is_epoch() {
        return true;
    }
    day >= checkpoint.timestamp.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const POSTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<posts dt="2008-06-10" tag="" user="someone">
  <post href="http://www.rust-lang.org/" hash="a5a6f3d28d8dd549f3cad39fb0b34104" description="Rust" extended="A language" tag="programming rust" time="2008-06-10T16:25:02Z" others="10"/>
  <post href="http://example.com/" hash="84c6d5ed05eab31c4a5a7f9f4a1c6d8f" description="Example" tag="" time="2008-06-10T08:00:00Z"/>
  <post hash="deadbeef" description="No link"/>
</posts>"#;

    fn provider() -> DeliciousProvider {
        let config = DeliciousConfig {
            username: Some("someone".into()),
            password: Some("secret".into()),
        };
        DeliciousProvider::new(config, &HttpConfig::default(), Shutdown::new()).unwrap()
    }

    fn payload() -> RawPayload {
        RawPayload::Documents(vec![RawPayload::Xml(XmlElement::parse(POSTS).unwrap())])
    }

    #[test]
    fn test_normalize_posts() {
        let checkpoint = Checkpoint::epoch(NAME, RecordType::Bookmark, None);
        let candidates = provider()
            .normalize(RecordType::Bookmark, payload(), &checkpoint)
            .unwrap();

        assert_eq!(candidates.len(), 2);
        let rust = &candidates[0];
        assert_eq!(rust.get_str("url"), Some("http://www.rust-lang.org/"));
        assert_eq!(rust.get_str("description"), Some("Rust"));
        assert_eq!(rust.get_str("extended"), Some("A language"));
        assert_eq!(rust.tags, vec!["programming", "rust"]);
        assert_eq!(
            rust.timestamp,
            Some(Utc.with_ymd_and_hms(2008, 6, 10, 16, 25, 2).unwrap())
        );
        assert!(candidates[1].tags.is_empty());
    }

    #[test]
    fn test_normalize_respects_checkpoint() {
        let checkpoint = Checkpoint::new(
            NAME,
            RecordType::Bookmark,
            None,
            Utc.with_ymd_and_hms(2008, 6, 10, 12, 0, 0).unwrap(),
        );
        let candidates = provider()
            .normalize(RecordType::Bookmark, payload(), &checkpoint)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].get_str("description"), Some("Rust"));
    }

    #[test]
    fn test_source_id_is_post_hash() {
        let checkpoint = Checkpoint::epoch(NAME, RecordType::Bookmark, None);
        let provider = provider();
        let candidates = provider
            .normalize(RecordType::Bookmark, payload(), &checkpoint)
            .unwrap();
        assert_eq!(
            provider.source_id(RecordType::Bookmark, &candidates[0]).as_deref(),
            Some("a5a6f3d28d8dd549f3cad39fb0b34104")
        );
        assert!(provider
            .source_id(RecordType::Bookmark, &Candidate::new())
            .is_none());
    }

    #[test]
    fn test_admits_day() {
        let day = |d| NaiveDate::from_ymd_opt(2008, 6, d).unwrap();
        let epoch = Checkpoint::epoch(NAME, RecordType::Bookmark, None);
        assert!(admits_day(&epoch, day(1)));

        let checkpoint = Checkpoint::new(
            NAME,
            RecordType::Bookmark,
            None,
            Utc.with_ymd_and_hms(2008, 6, 10, 12, 0, 0).unwrap(),
        );
        assert!(!admits_day(&checkpoint, day(9)));
        assert!(admits_day(&checkpoint, day(10)));
        assert!(admits_day(&checkpoint, day(11)));
    }

    #[test]
    fn test_enabled_requires_credentials() {
        assert!(provider().enabled());
        let anonymous = DeliciousConfig {
            username: Some("someone".into()),
            password: None,
        };
        let provider = DeliciousProvider::new(anonymous, &HttpConfig::default(), Shutdown::new()).unwrap();
        assert!(!provider.enabled());
    }
}
