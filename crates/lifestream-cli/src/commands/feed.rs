//! Feed commands - read the timeline

use anyhow::{Context, Result};

use lifestream_core::storage::FeedQuery;
use lifestream_core::{RecordType, Store};

use crate::output::Output;

/// Show a page of the timeline, newest first
pub fn show(
    store: &Store,
    record_type: Option<RecordType>,
    limit: usize,
    offset: usize,
    output: &Output,
) -> Result<()> {
    let query = FeedQuery {
        record_type,
        ..FeedQuery::default()
    }
    .page(offset, limit);

    let items = store
        .timeline()
        .feed(&query)
        .context("Failed to read timeline")?;
    output.print_items(&items);
    Ok(())
}

/// Show items whose summary matches the query
pub fn search(store: &Store, query: &str, limit: usize, output: &Output) -> Result<()> {
    let items = store
        .timeline()
        .search(query, limit)
        .context("Failed to search timeline")?;
    output.print_items(&items);
    Ok(())
}
