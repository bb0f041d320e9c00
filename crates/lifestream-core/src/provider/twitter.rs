//! Twitter user timeline
//!
//! Reads the timeline RSS feed. With `transform_messages` enabled the
//! status text is rewritten before it is stored: URLs become numbered
//! references kept as links, the leading `username:` is dropped, `RT @user`
//! uses the configured retweet text, mentions are linked and `#tags` are
//! moved to the item's tags.

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

use crate::candidate::Candidate;
use crate::config::{Config, HttpConfig, TwitterConfig};
use crate::error::{SyncError, SyncResult};
use crate::models::{Checkpoint, RecordType};
use crate::provider::http::HttpClient;
use crate::provider::{
    source_digest, unsupported, FetchContext, Provider, RawPayload, Registration, XmlElement,
};
use crate::sync::Shutdown;

const NAME: &str = "twitter";
const TIMELINE_URL: &str = "http://twitter.com/statuses/user_timeline";
const USER_URL: &str = "http://twitter.com";

const URL_PATTERN: &str = r"(?i)https?://(?:(?:[A-Z0-9-]+\.)+[A-Z]{2,6}|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::\d+)?(?:/\S+|/?)";
const TAG_PATTERN: &str = r"#(\w+)";
const USER_PATTERN: &str = r"@(\w+)";
const RETWEET_PATTERN: &str = r"RT\s+@(\w+)";

/// A status after transformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub message: String,
    pub links: Vec<String>,
    pub tags: Vec<String>,
}

/// Compiled message rewriting rules
pub struct MessageTransform {
    url: Regex,
    tag: Regex,
    user: Regex,
    retweet: Regex,
    leading_username: Regex,
    retweet_text: String,
}

impl MessageTransform {
    pub fn new(username: &str, retweet_text: &str) -> SyncResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                SyncError::Configuration(format!("invalid message pattern {pattern:?}: {e}"))
            })
        };

        Ok(Self {
            url: compile(URL_PATTERN)?,
            tag: compile(TAG_PATTERN)?,
            user: compile(USER_PATTERN)?,
            retweet: compile(RETWEET_PATTERN)?,
            leading_username: compile(&format!("^{}:", regex::escape(username)))?,
            retweet_text: retweet_text.to_string(),
        })
    }

    pub fn apply(&self, text: &str) -> ParsedMessage {
        let text = text.replace('\n', "");

        let mut links: Vec<String> = Vec::new();
        for m in self.url.find_iter(&text) {
            if !links.iter().any(|l| l == m.as_str()) {
                links.push(m.as_str().to_string());
            }
        }
        let text = self.url.replace_all(&text, |caps: &Captures<'_>| {
            let position = links.iter().position(|l| l == &caps[0]).unwrap_or_default();
            format!("[{}]", position + 1)
        });

        let text = self.leading_username.replace(&text, "");
        let text = self.retweet.replace_all(&text, |caps: &Captures<'_>| {
            self.retweet_text.replace("%s", &format!("@{}", &caps[1]))
        });
        let text = self.user.replace_all(&text, |caps: &Captures<'_>| {
            let user = &caps[1];
            format!("<a href='{USER_URL}/{user}' title='{user}'>@{user}</a>")
        });

        let tags = self
            .tag
            .captures_iter(&text)
            .map(|caps| caps[1].to_string())
            .collect();
        let text = self.tag.replace_all(&text, "");

        ParsedMessage {
            message: text.trim().to_string(),
            links,
            tags,
        }
    }
}

pub struct TwitterProvider {
    config: TwitterConfig,
    transform: Option<MessageTransform>,
    client: HttpClient,
}

impl TwitterProvider {
    pub fn new(config: TwitterConfig, http: &HttpConfig, shutdown: Shutdown) -> SyncResult<Self> {
        let transform = match (&config.username, config.transform_messages) {
            (Some(username), true) => Some(MessageTransform::new(username, &config.retweet_text)?),
            _ => None,
        };

        Ok(Self {
            config,
            transform,
            client: HttpClient::new(NAME, http, shutdown)?,
        })
    }

    pub fn from_config(config: &Config, shutdown: Shutdown) -> SyncResult<Self> {
        Self::new(config.twitter.clone().unwrap_or_default(), &config.http, shutdown)
    }

    fn username(&self) -> Option<&str> {
        self.config.username.as_deref().filter(|u| !u.is_empty())
    }

    fn parse_message(&self, text: &str) -> ParsedMessage {
        match &self.transform {
            Some(transform) => transform.apply(text),
            None => ParsedMessage {
                message: text.to_string(),
                links: Vec::new(),
                tags: Vec::new(),
            },
        }
    }

    fn status_candidate(&self, status: &XmlElement, checkpoint: &Checkpoint) -> Option<Candidate> {
        let timestamp = status
            .child_text("pubDate")
            .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
            .map(|d| d.with_timezone(&Utc))?;
        if !checkpoint.admits(timestamp) {
            return None;
        }

        let parsed = self.parse_message(status.child_text("title").unwrap_or_default());
        let url = status.child_text("link").unwrap_or_default();

        Some(
            Candidate::new()
                .field("message", parsed.message)
                .field("links", parsed.links)
                .at(timestamp)
                .with_url(url)
                .with_tags(parsed.tags),
        )
    }
}

impl Provider for TwitterProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn enabled(&self) -> bool {
        self.username().is_some()
    }

    fn registrations(&self) -> Vec<Registration> {
        vec![Registration::new(RecordType::Message, 0)]
    }

    fn fetch(&self, record_type: RecordType, _ctx: &FetchContext<'_>) -> SyncResult<RawPayload> {
        match (record_type, self.username()) {
            (RecordType::Message, Some(username)) => {
                let url = format!("{}/{}.rss", TIMELINE_URL, username);
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
            (RecordType::Message, RawPayload::Xml(feed)) => Ok(feed
                .descendants("item")
                .into_iter()
                .filter_map(|status| self.status_candidate(status, checkpoint))
                .collect()),
            _ => Err(unsupported(NAME, record_type)),
        }
    }

    fn source_id(&self, _record_type: RecordType, candidate: &Candidate) -> Option<String> {
        let timestamp = candidate.timestamp?.timestamp().to_string();
        Some(source_digest(&[
            candidate.get_str("message")?,
            candidate.url.as_deref().unwrap_or_default(),
            &timestamp,
        ]))
    }
}
