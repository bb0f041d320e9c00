//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/lifestream/config.toml)
//! 3. Environment variables (LIFESTREAM_* prefix)
//!
//! Environment variables take precedence over config file values.
//!
//! Each built-in provider has its own optional section. A provider whose
//! section is missing (or incomplete) reports itself as disabled and is
//! skipped by update runs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::RecordType;

/// Environment variable prefix
const ENV_PREFIX: &str = "LIFESTREAM";

/// Identifiers of the built-in providers, in default run order
pub const BUILTIN_PROVIDERS: &[&str] = &[
    "lastfm",
    "flickr",
    "twitter",
    "delicious",
    "youtube",
    "gsearch",
    "gitscm",
    "svn",
];

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite db)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Provider identifiers to register, in run order
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,

    /// Record types projected into the timeline
    #[serde(default = "default_following")]
    pub following: Vec<RecordType>,

    /// Shared HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastfm: Option<LastfmConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flickr: Option<FlickrConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<TwitterConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delicious: Option<DeliciousConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube: Option<YoutubeConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gsearch: Option<GsearchConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitscm: Option<GitscmConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svn: Option<SvnConfig>,
}

/// HTTP client settings shared by all network providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// Last.fm recent tracks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastfmConfig {
    pub username: Option<String>,

    /// Minimum usage count for a top tag to be kept
    #[serde(default = "default_tag_usage_threshold")]
    pub tag_usage_threshold: u32,

    /// Fetch per-track and per-artist tags
    #[serde(default = "default_true")]
    pub with_tags: bool,
}

impl Default for LastfmConfig {
    fn default() -> Self {
        Self {
            username: None,
            tag_usage_threshold: default_tag_usage_threshold(),
            with_tags: true,
        }
    }
}

/// Flickr public photos and photosets
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlickrConfig {
    pub api_key: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
}

/// Twitter user timeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TwitterConfig {
    pub username: Option<String>,

    /// Rewrite message text (links, retweets, mentions, hashtags)
    #[serde(default)]
    pub transform_messages: bool,

    /// Replacement for `RT @user`; `%s` is substituted with the user
    #[serde(default = "default_retweet_text")]
    pub retweet_text: String,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            username: None,
            transform_messages: false,
            retweet_text: default_retweet_text(),
        }
    }
}

/// del.icio.us bookmarks
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliciousConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// YouTube favorites
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct YoutubeConfig {
    pub username: Option<String>,
}

/// Google search history
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GsearchConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Commits from local git clones
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GitscmConfig {
    /// Only commits authored with this email are collected
    pub author_email: Option<String>,

    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

/// Commits from Subversion repositories
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SvnConfig {
    /// Only revisions committed by this user are collected
    pub username: Option<String>,

    /// `url` is queried when set, otherwise the working copy at `path`
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

/// A single tracked repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositoryConfig {
    /// Display name, also the checkpoint filter key
    pub name: String,
    /// Path to a local clone
    pub path: PathBuf,
    /// Public URL of the repository
    #[serde(default)]
    pub url: Option<String>,
    /// Changeset URL template, `{revision}` is substituted
    #[serde(default)]
    pub changeset_template: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            providers: default_providers(),
            following: default_following(),
            http: HttpConfig::default(),
            lastfm: None,
            flickr: None,
            twitter: None,
            delicious: None,
            youtube: None,
            gsearch: None,
            gitscm: None,
            svn: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (LIFESTREAM_DATA_DIR, LIFESTREAM_PROVIDERS)
    /// 2. Config file (~/.config/lifestream/config.toml or LIFESTREAM_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // LIFESTREAM_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // LIFESTREAM_PROVIDERS (comma separated)
        if let Ok(val) = std::env::var(format!("{}_PROVIDERS", ENV_PREFIX)) {
            self.providers = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with LIFESTREAM_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lifestream")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("lifestream.db")
    }

    /// Whether records of this type get a timeline item
    pub fn follows(&self, record_type: RecordType) -> bool {
        self.following.contains(&record_type)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lifestream")
}

fn default_providers() -> Vec<String> {
    BUILTIN_PROVIDERS.iter().map(|s| s.to_string()).collect()
}

fn default_following() -> Vec<RecordType> {
    RecordType::ALL
        .iter()
        .copied()
        .filter(|t| t.followed_by_default())
        .collect()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("lifestream/{}", env!("CARGO_PKG_VERSION"))
}

fn default_tag_usage_threshold() -> u32 {
    15
}

fn default_retweet_text() -> String {
    "Forwarding from %s: ".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &["LIFESTREAM_DATA_DIR", "LIFESTREAM_PROVIDERS"];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.data_dir.ends_with("lifestream"));
        assert_eq!(config.providers.len(), BUILTIN_PROVIDERS.len());
        assert!(config.lastfm.is_none());
        assert_eq!(config.http.timeout_secs, 30);
    }

    #[test]
    fn test_default_following_skips_search_results() {
        let config = Config::default();
        assert!(config.follows(RecordType::Photo));
        assert!(config.follows(RecordType::WebSearch));
        assert!(!config.follows(RecordType::WebSearchResult));
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.sqlite_path().ends_with("lifestream.db"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("LIFESTREAM_DATA_DIR", "/tmp/lifestream-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/lifestream-test"));
    }

    #[test]
    fn test_env_override_providers() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("LIFESTREAM_PROVIDERS", "lastfm, twitter,,");
        config.apply_env_overrides();
        assert_eq!(config.providers, vec!["lastfm", "twitter"]);
    }

    #[test]
    fn test_load_from_str_with_provider_sections() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            providers = ["lastfm", "gitscm"]
            following = ["track", "commit"]

            [lastfm]
            username = "alice"
            with_tags = false

            [gitscm]
            author_email = "alice@example.com"

            [[gitscm.repositories]]
            name = "lifestream"
            path = "/src/lifestream"
            changeset_template = "https://example.com/commit/{revision}"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.providers, vec!["lastfm", "gitscm"]);
        assert_eq!(
            config.following,
            vec![RecordType::Track, RecordType::Commit]
        );

        let lastfm = config.lastfm.unwrap();
        assert_eq!(lastfm.username.as_deref(), Some("alice"));
        assert_eq!(lastfm.tag_usage_threshold, 15);
        assert!(!lastfm.with_tags);

        let gitscm = config.gitscm.unwrap();
        assert_eq!(gitscm.repositories.len(), 1);
        assert_eq!(gitscm.repositories[0].name, "lifestream");
        assert!(gitscm.repositories[0].url.is_none());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            data_dir: PathBuf::from("/data/lifestream"),
            twitter: Some(TwitterConfig {
                username: Some("bob".to_string()),
                transform_messages: true,
                retweet_text: default_retweet_text(),
            }),
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("[twitter]"));
        assert!(!toml_str.contains("[flickr]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.twitter, config.twitter);
    }

    #[test]
    fn test_save_to_path_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            data_dir: dir.path().join("data"),
            providers: vec!["youtube".to_string()],
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.providers, vec!["youtube"]);
        assert!(loaded.data_dir.exists());
    }

    #[test]
    fn test_load_svn_section() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            providers = ["svn"]

            [svn]
            username = "jacob"

            [[svn.repositories]]
            name = "django"
            path = "/src/django"
            url = "http://code.example.com/svn/django/trunk"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        let svn = config.svn.unwrap();
        assert_eq!(svn.username.as_deref(), Some("jacob"));
        assert_eq!(svn.repositories.len(), 1);
        assert_eq!(
            svn.repositories[0].url.as_deref(),
            Some("http://code.example.com/svn/django/trunk")
        );
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = tempfile::tempdir().unwrap();
        env::set_var("LIFESTREAM_DATA_DIR", dir.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.providers.len(), BUILTIN_PROVIDERS.len());
        assert!(config.gitscm.is_none());
    }
}
