//! Google search history
//!
//! Queries and the results clicked from them arrive in the same
//! authenticated RSS feed, told apart by their first category. Queries are
//! processed first; each result is then linked to its query through the
//! query guid.

use std::cell::RefCell;

use chrono::{DateTime, Utc};
use reqwest::Url;
use tracing::debug;

use crate::candidate::Candidate;
use crate::config::{Config, GsearchConfig, HttpConfig};
use crate::error::{SyncError, SyncResult};
use crate::models::{Checkpoint, DomainRecord, RecordType};
use crate::provider::http::HttpClient;
use crate::provider::{
    unsupported, FetchContext, HookContext, Provider, RawPayload, Registration, XmlElement,
};
use crate::sync::Shutdown;

const NAME: &str = "gsearch";
const FEED_URL: &str = "https://www.google.com/searchhistory/?output=rss";
const ENGINE: &str = "Google";
const QUERY_CATEGORY: &str = "web query";
const RESULT_CATEGORY: &str = "web result";

pub struct GoogleSearchProvider {
    config: GsearchConfig,
    client: HttpClient,
    /// Feed fetched for queries, reused for their results
    feed: RefCell<Option<XmlElement>>,
}

impl GoogleSearchProvider {
    pub fn new(config: GsearchConfig, http: &HttpConfig, shutdown: Shutdown) -> SyncResult<Self> {
        let mut client = HttpClient::new(NAME, http, shutdown)?;
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            client = client.with_basic_auth(username, password);
        }

        Ok(Self {
            config,
            client,
            feed: RefCell::new(None),
        })
    }

    pub fn from_config(config: &Config, shutdown: Shutdown) -> SyncResult<Self> {
        Self::new(config.gsearch.clone().unwrap_or_default(), &config.http, shutdown)
    }

    fn fetch_feed(&self) -> SyncResult<XmlElement> {
        let feed = self.client.get_xml(FEED_URL)?;
        *self.feed.borrow_mut() = Some(feed.clone());
        Ok(feed)
    }
}

impl Provider for GoogleSearchProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        [&self.config.username, &self.config.password]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }

    fn registrations(&self) -> Vec<Registration> {
        vec![
            Registration::new(RecordType::WebSearch, 0),
            Registration::new(RecordType::WebSearchResult, 1),
        ]
    }

    fn fetch(&self, record_type: RecordType, _ctx: &FetchContext<'_>) -> SyncResult<RawPayload> {
        let feed = match record_type {
            RecordType::WebSearch => self.fetch_feed()?,
            RecordType::WebSearchResult => match self.feed.borrow_mut().take() {
                Some(feed) => feed,
                None => self.client.get_xml(FEED_URL)?,
            },
            _ => return Err(unsupported(NAME, record_type)),
        };
        Ok(RawPayload::Xml(feed))
    }

    fn normalize(
        &self,
        record_type: RecordType,
        payload: RawPayload,
        checkpoint: &Checkpoint,
    ) -> SyncResult<Vec<Candidate>> {
        let feed = match payload {
            RawPayload::Empty => return Ok(Vec::new()),
            RawPayload::Xml(feed) => feed,
            _ => return Err(unsupported(NAME, record_type)),
        };
        let entries = feed.descendants("item");

        match record_type {
            RecordType::WebSearch => Ok(entries
                .into_iter()
                .filter(|e| category(e) == Some(QUERY_CATEGORY))
                .filter_map(query_candidate)
                .filter(|c| c.timestamp.map_or(true, |t| checkpoint.admits(t)))
                .collect()),
            RecordType::WebSearchResult => Ok(entries
                .into_iter()
                .filter(|e| category(e) == Some(RESULT_CATEGORY))
                .filter_map(result_candidate)
                .collect()),
            _ => Err(unsupported(NAME, record_type)),
        }
    }

    fn source_id(&self, record_type: RecordType, candidate: &Candidate) -> Option<String> {
        match record_type {
            RecordType::WebSearch => Some(format!(
                "{}:{}:{}",
                ENGINE.to_ascii_lowercase(),
                candidate.get_str("query")?,
                candidate.get_str("guid")?
            )),
            _ => None,
        }
    }

    fn post_persist(
        &self,
        ctx: &HookContext<'_>,
        record: &mut DomainRecord,
        _candidate: &Candidate,
        created: bool,
    ) -> SyncResult<()> {
        let DomainRecord::WebSearchResult(result) = record else {
            return Ok(());
        };
        if !created && result.search_id.is_some() {
            return Ok(());
        }

        let search = ctx
            .find_by_source_suffix(RecordType::WebSearch, &format!(":{}", result.guid))?
            .ok_or_else(|| {
                SyncError::processing(
                    RecordType::WebSearchResult,
                    format!("could not find web search with guid {}", result.guid),
                )
            })?;
        debug!(guid = %result.guid, search = %search.record.record_id, "Linked search result");
        result.search_id = Some(search.record.record_id);
        Ok(())
    }
}

/// First category of an entry
fn category(entry: &XmlElement) -> Option<&str> {
    entry.child_text("category").map(str::trim)
}

/// The guid is the last part of the entry's history URL
fn query_guid(raw: &str) -> String {
    let raw = raw.trim();
    let path = Url::parse(raw)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| raw.to_string());
    path.replace("/searchhistory/", "")
}

fn query_candidate(entry: &XmlElement) -> Option<Candidate> {
    let guid = query_guid(entry.child_text("guid")?);
    let query = entry.child_text("title").unwrap_or_default().trim();
    if guid.is_empty() || query.is_empty() {
        return None;
    }

    let mut candidate = Candidate::new()
        .field("engine", ENGINE)
        .field("query", query)
        .field("guid", guid);
    if let Some(updated) = entry
        .child_text("pubDate")
        .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
    {
        candidate = candidate.at(updated.with_timezone(&Utc));
    }
    Some(candidate)
}

fn result_candidate(entry: &XmlElement) -> Option<Candidate> {
    let guid = entry.child_text("query_guid")?.trim();
    let url = entry.child_text("link")?.trim();
    if guid.is_empty() || url.is_empty() {
        return None;
    }

    Some(
        Candidate::new()
            .field("guid", guid)
            .field("title", entry.child_text("title").unwrap_or_default().trim())
            .field("url", url)
            .with_url(url),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use crate::models::{RecordRef, WebSearch, WebSearchResult};
    use crate::storage::{init_schema, ItemProjection, Records, Timeline};
    use chrono::TimeZone;
    use rusqlite::Connection;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:smh="http://www.google.com/searchhistory">
  <channel>
    <title>Google search history</title>
    <item>
      <title>rust borrow checker</title>
      <link>http://www.google.com/search?q=rust+borrow+checker</link>
      <pubDate>Tue, 10 Jun 2008 12:00:00 GMT</pubDate>
      <category>web query</category>
      <guid>http://www.google.com/searchhistory/abc123</guid>
    </item>
    <item>
      <title>The Rust Book</title>
      <link>https://doc.rust-lang.org/book/</link>
      <pubDate>Tue, 10 Jun 2008 12:01:00 GMT</pubDate>
      <category>web result</category>
      <smh:query_guid>abc123</smh:query_guid>
      <guid>http://www.google.com/searchhistory/def456</guid>
    </item>
    <item>
      <title>older query</title>
      <pubDate>Mon, 09 Jun 2008 12:00:00 GMT</pubDate>
      <category>web query</category>
      <guid>http://www.google.com/searchhistory/old789</guid>
    </item>
  </channel>
</rss>"#;

    fn provider() -> GoogleSearchProvider {
        let config = GsearchConfig {
            username: Some("someone".into()),
            password: Some("secret".into()),
        };
        GoogleSearchProvider::new(config, &HttpConfig::default(), Shutdown::new()).unwrap()
    }

    fn feed() -> RawPayload {
        RawPayload::Xml(XmlElement::parse(FEED).unwrap())
    }

    #[test]
    fn test_normalize_queries() {
        let provider = provider();
        let checkpoint = Checkpoint::new(
            NAME,
            RecordType::WebSearch,
            None,
            Utc.with_ymd_and_hms(2008, 6, 9, 12, 0, 0).unwrap(),
        );
        let candidates = provider
            .normalize(RecordType::WebSearch, feed(), &checkpoint)
            .unwrap();

        assert_eq!(candidates.len(), 1);
        let query = &candidates[0];
        assert_eq!(query.get_str("query"), Some("rust borrow checker"));
        assert_eq!(query.get_str("guid"), Some("abc123"));
        assert_eq!(query.get_str("engine"), Some("Google"));
        assert_eq!(
            provider.source_id(RecordType::WebSearch, query).as_deref(),
            Some("google:rust borrow checker:abc123")
        );
    }

    #[test]
    fn test_normalize_results() {
        let checkpoint = Checkpoint::epoch(NAME, RecordType::WebSearchResult, None);
        let candidates = provider()
            .normalize(RecordType::WebSearchResult, feed(), &checkpoint)
            .unwrap();

        assert_eq!(candidates.len(), 1);
        let result = &candidates[0];
        assert_eq!(result.get_str("guid"), Some("abc123"));
        assert_eq!(result.get_str("url"), Some("https://doc.rust-lang.org/book/"));
        assert_eq!(result.get_str("title"), Some("The Rust Book"));
        assert!(provider()
            .source_id(RecordType::WebSearchResult, result)
            .is_none());
    }

    #[test]
    fn test_result_hook_links_parent_search() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let search = DomainRecord::WebSearch(WebSearch {
            engine: ENGINE.into(),
            query: "rust borrow checker".into(),
            guid: "abc123".into(),
        });
        let search_ref = RecordRef::new(RecordType::WebSearch, "7");
        Records::new(&conn).write(&search_ref, &search).unwrap();
        Timeline::new(&conn)
            .project(
                &search_ref,
                &search,
                &ItemProjection {
                    source: NAME,
                    source_id: "google:rust borrow checker:abc123",
                    ..ItemProjection::default()
                },
            )
            .unwrap();

        let shutdown = Shutdown::new();
        let following = HashSet::new();
        let ctx = HookContext::new(&conn, NAME, &following, &shutdown);
        let provider = provider();

        let mut result = DomainRecord::WebSearchResult(WebSearchResult {
            guid: "abc123".into(),
            url: "https://doc.rust-lang.org/book/".into(),
            ..WebSearchResult::default()
        });
        provider
            .post_persist(&ctx, &mut result, &Candidate::new(), true)
            .unwrap();
        let DomainRecord::WebSearchResult(linked) = &result else {
            panic!("record type changed");
        };
        assert_eq!(linked.search_id.as_deref(), Some("7"));

        let mut orphan = DomainRecord::WebSearchResult(WebSearchResult {
            guid: "missing".into(),
            ..WebSearchResult::default()
        });
        let err = provider
            .post_persist(&ctx, &mut orphan, &Candidate::new(), true)
            .unwrap_err();
        assert!(matches!(err, SyncError::RecordProcessing { .. }));
    }

    #[test]
    fn test_result_hook_ignores_other_providers() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        for (id, source) in [("1", "othersearch"), ("2", NAME)] {
            let search = DomainRecord::WebSearch(WebSearch {
                engine: ENGINE.into(),
                query: "lifetimes".into(),
                guid: "g1".into(),
            });
            let reference = RecordRef::new(RecordType::WebSearch, id);
            Records::new(&conn).write(&reference, &search).unwrap();
            Timeline::new(&conn)
                .project(
                    &reference,
                    &search,
                    &ItemProjection {
                        source,
                        source_id: "google:lifetimes:g1",
                        ..ItemProjection::default()
                    },
                )
                .unwrap();
        }

        let shutdown = Shutdown::new();
        let following = HashSet::new();
        let ctx = HookContext::new(&conn, NAME, &following, &shutdown);
        let mut result = DomainRecord::WebSearchResult(WebSearchResult {
            guid: "g1".into(),
            url: "https://doc.rust-lang.org/nomicon/".into(),
            ..WebSearchResult::default()
        });
        provider()
            .post_persist(&ctx, &mut result, &Candidate::new(), true)
            .unwrap();
        let DomainRecord::WebSearchResult(linked) = &result else {
            panic!("record type changed");
        };
        assert_eq!(linked.search_id.as_deref(), Some("2"));
    }
}
