//! Provider registry
//!
//! Resolves the configured provider identifiers to implementations at run
//! start. Registration order is run order.

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::provider::delicious::DeliciousProvider;
use crate::provider::flickr::FlickrProvider;
use crate::provider::gitscm::GitScmProvider;
use crate::provider::gsearch::GoogleSearchProvider;
use crate::provider::lastfm::LastfmProvider;
use crate::provider::svn::SvnProvider;
use crate::provider::twitter::TwitterProvider;
use crate::provider::youtube::YoutubeProvider;
use crate::provider::Provider;
use crate::sync::Shutdown;

/// Registry of providers, in run order
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every provider listed in the configuration
    ///
    /// An identifier that names no built-in provider is a configuration
    /// error; providers without credentials are still registered and
    /// report themselves disabled.
    pub fn from_config(config: &Config, shutdown: &Shutdown) -> SyncResult<Self> {
        let mut registry = Self::new();
        for id in &config.providers {
            let provider = builtin(id, config, shutdown)?.ok_or_else(|| {
                SyncError::Configuration(format!(
                    "Unknown provider '{}'. Available: {}",
                    id,
                    crate::config::BUILTIN_PROVIDERS.join(", ")
                ))
            })?;
            registry.register(provider)?;
        }
        Ok(registry)
    }

    /// Add a provider; names must be unique
    pub fn register(&mut self, provider: Box<dyn Provider>) -> SyncResult<()> {
        if self.get(provider.name()).is_some() {
            return Err(SyncError::Configuration(format!(
                "Provider '{}' is registered twice",
                provider.name()
            )));
        }
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Provider> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(|p| &**p)
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn providers(&self) -> &[Box<dyn Provider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn builtin(id: &str, config: &Config, shutdown: &Shutdown) -> SyncResult<Option<Box<dyn Provider>>> {
    let shutdown = shutdown.clone();
    let provider: Box<dyn Provider> = match id {
        "lastfm" => Box::new(LastfmProvider::from_config(config, shutdown)?),
        "flickr" => Box::new(FlickrProvider::from_config(config, shutdown)?),
        "twitter" => Box::new(TwitterProvider::from_config(config, shutdown)?),
        "delicious" => Box::new(DeliciousProvider::from_config(config, shutdown)?),
        "youtube" => Box::new(YoutubeProvider::from_config(config, shutdown)?),
        "gsearch" => Box::new(GoogleSearchProvider::from_config(config, shutdown)?),
        "gitscm" => Box::new(GitScmProvider::from_config(config)),
        "svn" => Box::new(SvnProvider::from_config(config)),
        _ => return Ok(None),
    };
    Ok(Some(provider))
}
