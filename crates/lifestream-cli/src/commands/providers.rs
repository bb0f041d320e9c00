//! Providers command - list configured providers

use anyhow::{Context, Result};

use lifestream_core::{Config, ProviderRegistry, Shutdown};

use crate::output::{Output, ProviderInfo};

/// List configured providers with their state and record types
pub async fn list(config: Config, output: &Output) -> Result<()> {
    let providers = tokio::task::spawn_blocking(move || -> Result<Vec<ProviderInfo>> {
        let registry = ProviderRegistry::from_config(&config, &Shutdown::new())
            .context("Failed to set up providers")?;
        Ok(registry
            .providers()
            .iter()
            .map(|provider| ProviderInfo {
                name: provider.name().to_string(),
                enabled: provider.enabled(),
                types: provider
                    .ordered_registrations()
                    .into_iter()
                    .map(|r| r.record_type)
                    .collect(),
            })
            .collect())
    })
    .await
    .context("Provider listing panicked")??;

    output.print_providers(&providers);
    Ok(())
}
