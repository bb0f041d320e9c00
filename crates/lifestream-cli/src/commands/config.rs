//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use lifestream_core::Config;

use crate::output::{Output, OutputFormat};

const MASK: &str = "********";

/// Show the effective configuration with credentials masked
pub fn show(config: &Config, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config = masked(config);

    match output.format {
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{}", json);
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{}", content.trim_end());
            println!();
            println!("Config file: {}", effective_path.display());
            println!("Database:    {}", config.sqlite_path().display());
        }
    }

    Ok(())
}

fn masked(config: &Config) -> Config {
    let mut config = config.clone();
    if let Some(flickr) = config.flickr.as_mut() {
        mask(&mut flickr.api_key);
    }
    if let Some(delicious) = config.delicious.as_mut() {
        mask(&mut delicious.password);
    }
    if let Some(gsearch) = config.gsearch.as_mut() {
        mask(&mut gsearch.password);
    }
    config
}

fn mask(secret: &mut Option<String>) {
    if secret.is_some() {
        *secret = Some(MASK.to_string());
    }
}
