//! YouTube favorites
//!
//! Reads the user's favorites Atom feed. Every entry carries a trailing
//! category naming the video schema; the categories before it become tags.

use chrono::{DateTime, Utc};

use crate::candidate::Candidate;
use crate::config::{Config, HttpConfig, YoutubeConfig};
use crate::error::SyncResult;
use crate::models::{Checkpoint, RecordType};
use crate::provider::http::HttpClient;
use crate::provider::{
    source_digest, unsupported, FetchContext, Provider, RawPayload, Registration, XmlElement,
};
use crate::sync::Shutdown;

const NAME: &str = "youtube";
const FEED_ROOT: &str = "http://gdata.youtube.com/feeds/api/users";
const VIDEO_SOURCE: &str = "YouTube";

pub struct YoutubeProvider {
    config: YoutubeConfig,
    client: HttpClient,
}

impl YoutubeProvider {
    pub fn new(config: YoutubeConfig, http: &HttpConfig, shutdown: Shutdown) -> SyncResult<Self> {
        Ok(Self {
            config,
            client: HttpClient::new(NAME, http, shutdown)?,
        })
    }

    pub fn from_config(config: &Config, shutdown: Shutdown) -> SyncResult<Self> {
        Self::new(config.youtube.clone().unwrap_or_default(), &config.http, shutdown)
    }

    fn username(&self) -> Option<&str> {
        self.config.username.as_deref().filter(|u| !u.is_empty())
    }
}

impl Provider for YoutubeProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.username().is_some()
    }

    fn registrations(&self) -> Vec<Registration> {
        vec![Registration::new(RecordType::Video, 0)]
    }

    fn fetch(&self, record_type: RecordType, _ctx: &FetchContext<'_>) -> SyncResult<RawPayload> {
        match (record_type, self.username()) {
            (RecordType::Video, Some(username)) => {
                let url = format!("{}/{}/favorites", FEED_ROOT, username);
                Ok(RawPayload::Xml(self.client.get_xml(&url)?))
            }
            _ => Err(unsupported(NAME, record_type)),
        }
    }

    fn normalize(
        &self,
        record_type: RecordType,
        payload: RawPayload,
        checkpoint: &Checkpoint,
    ) -> SyncResult<Vec<Candidate>> {
        match (record_type, payload) {
            (_, RawPayload::Empty) => Ok(Vec::new()),
            (RecordType::Video, RawPayload::Xml(feed)) => Ok(feed
                .children_named("entry")
                .filter_map(entry_candidate)
                .filter(|c| c.timestamp.map_or(true, |t| checkpoint.admits(t)))
                .collect()),
            _ => Err(unsupported(NAME, record_type)),
        }
    }

    fn source_id(&self, _record_type: RecordType, candidate: &Candidate) -> Option<String> {
        candidate
            .get_str("url")
            .filter(|u| !u.is_empty())
            .map(|url| source_digest(&[url]))
    }
}

fn entry_candidate(entry: &XmlElement) -> Option<Candidate> {
    let url = entry
        .children_named("link")
        .find(|l| l.attr("rel").map_or(true, |rel| rel == "alternate"))
        .or_else(|| entry.child("link"))
        .and_then(|l| l.attr("href"))
        .filter(|href| !href.is_empty())?;

    let categories: Vec<&XmlElement> = entry.children_named("category").collect();
    let tags = categories[..categories.len().saturating_sub(1)]
        .iter()
        .filter_map(|c| c.attr("term"));

    let mut candidate = Candidate::new()
        .field("source", VIDEO_SOURCE)
        .field("title", entry.child_text("title").unwrap_or_default())
        .field("url", url)
        .with_url(url)
        .with_tags(tags);
    if let Some(published) = entry
        .child_text("published")
        .and_then(|p| DateTime::parse_from_rfc3339(p.trim()).ok())
    {
        candidate = candidate.at(published.with_timezone(&Utc));
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<feed xmlns='http://www.w3.org/2005/Atom' xmlns:media='http://search.yahoo.com/mrss/'>
  <title type='text'>Favorites of someone</title>
  <entry>
    <published>2008-06-05T21:44:06.000Z</published>
    <category scheme='http://gdata.youtube.com/schemas/2007/categories.cat' term='Music' label='Music'/>
    <category scheme='http://gdata.youtube.com/schemas/2007/keywords.cat' term='live'/>
    <category scheme='http://schemas.google.com/g/2005#kind' term='http://gdata.youtube.com/schemas/2007#video'/>
    <title type='text'>A concert</title>
    <link rel='alternate' type='text/html' href='http://www.youtube.com/watch?v=abc123'/>
    <link rel='self' type='application/atom+xml' href='http://gdata.youtube.com/feeds/api/videos/abc123'/>
  </entry>
  <entry>
    <published>2008-05-01T10:00:00.000Z</published>
    <category scheme='http://schemas.google.com/g/2005#kind' term='http://gdata.youtube.com/schemas/2007#video'/>
    <title type='text'>Older clip</title>
    <link rel='alternate' type='text/html' href='http://www.youtube.com/watch?v=old'/>
  </entry>
</feed>"#;

    fn provider() -> YoutubeProvider {
        let config = YoutubeConfig {
            username: Some("someone".into()),
        };
        YoutubeProvider::new(config, &HttpConfig::default(), Shutdown::new()).unwrap()
    }

    fn feed() -> RawPayload {
        RawPayload::Xml(XmlElement::parse(FEED).unwrap())
    }

    #[test]
    fn test_normalize_entries() {
        let checkpoint = Checkpoint::epoch(NAME, RecordType::Video, None);
        let candidates = provider()
            .normalize(RecordType::Video, feed(), &checkpoint)
            .unwrap();

        assert_eq!(candidates.len(), 2);
        let concert = &candidates[0];
        assert_eq!(concert.get_str("title"), Some("A concert"));
        assert_eq!(concert.get_str("source"), Some("YouTube"));
        assert_eq!(
            concert.url.as_deref(),
            Some("http://www.youtube.com/watch?v=abc123")
        );
        assert_eq!(concert.tags, vec!["Music", "live"]);
        assert_eq!(
            concert.timestamp,
            Some(Utc.with_ymd_and_hms(2008, 6, 5, 21, 44, 6).unwrap())
        );
        assert!(candidates[1].tags.is_empty());
    }

    #[test]
    fn test_normalize_respects_checkpoint() {
        let checkpoint = Checkpoint::new(
            NAME,
            RecordType::Video,
            None,
            Utc.with_ymd_and_hms(2008, 5, 1, 10, 0, 0).unwrap(),
        );
        let candidates = provider()
            .normalize(RecordType::Video, feed(), &checkpoint)
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_source_id_is_url_digest() {
        let provider = provider();
        let a = Candidate::new().field("url", "http://www.youtube.com/watch?v=abc123");
        let b = a.clone().field("title", "Renamed");
        assert_eq!(
            provider.source_id(RecordType::Video, &a),
            provider.source_id(RecordType::Video, &b)
        );
        assert_eq!(
            provider.source_id(RecordType::Video, &a),
            Some(source_digest(&["http://www.youtube.com/watch?v=abc123"]))
        );
    }
}
