//! Command handlers

use anyhow::Result;

use lifestream_core::{Config, StorageError, Store};

pub mod config;
pub mod feed;
pub mod providers;
pub mod status;
pub mod update;

/// Open the configured database, adding the storage layer's recovery hint
pub fn open_store(config: &Config) -> Result<Store> {
    Store::open(config).map_err(|error| {
        let path = config.sqlite_path();
        let hint = error
            .chain()
            .find_map(|e| e.downcast_ref::<StorageError>())
            .and_then(StorageError::recovery_suggestion);
        match hint {
            Some(hint) => error.context(format!(
                "Failed to open database at {}. {}",
                path.display(),
                hint
            )),
            None => error.context(format!("Failed to open database at {}", path.display())),
        }
    })
}
