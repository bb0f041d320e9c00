//! Status command - checkpoints and item counts

use anyhow::{Context, Result};

use lifestream_core::{Config, Store};

use crate::output::{Output, StatusInfo};

/// Show database location, item counts and checkpoints
pub fn show(store: &Store, config: &Config, output: &Output) -> Result<()> {
    let timeline = store.timeline();
    let status = StatusInfo {
        database: store
            .path()
            .cloned()
            .unwrap_or_else(|| config.sqlite_path())
            .display()
            .to_string(),
        database_size: store.database_size(),
        items: timeline.count(None).context("Failed to count items")?,
        items_by_type: timeline
            .count_by_type()
            .context("Failed to count items")?,
        checkpoints: store
            .checkpoints()
            .list()
            .context("Failed to read checkpoints")?,
    };

    output.print_status(&status);
    Ok(())
}
