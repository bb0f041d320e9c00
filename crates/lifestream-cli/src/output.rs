//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use lifestream_core::{Checkpoint, Item, RecordType, RunReport};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// A configured provider as listed by `providers`
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub enabled: bool,
    pub types: Vec<RecordType>,
}

/// Store summary shown by `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub database: String,
    pub database_size: u64,
    pub items: i64,
    pub items_by_type: Vec<(RecordType, i64)>,
    pub checkpoints: Vec<Checkpoint>,
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print timeline items
    pub fn print_items(&self, items: &[Item]) {
        match self.format {
            OutputFormat::Human => {
                if items.is_empty() {
                    println!("No items found.");
                    return;
                }
                for item in items {
                    let url = item
                        .url
                        .as_deref()
                        .map(|u| format!("  {}", truncate(u, 50)))
                        .unwrap_or_default();
                    println!(
                        "{}  {:<15}  {}{}",
                        item.timestamp.format("%Y-%m-%d %H:%M"),
                        item.record_type(),
                        truncate(&item.summary, 60),
                        url
                    );
                    if !item.tags.is_empty() {
                        println!("{:>35}{}", "", item.tags.join(", "));
                    }
                }
                println!("\n{} item(s)", items.len());
            }
            OutputFormat::Json => print_json(&items),
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.record);
                }
            }
        }
    }

    /// Print the outcome of an update run
    pub fn print_run_report(&self, report: &RunReport) {
        match self.format {
            OutputFormat::Human => {
                println!("Update run {}", report.run_id);
                println!();
                for provider in &report.providers {
                    print!(
                        "  {:<10} {:<9} fetched {:>4}  created {:>4}  updated {:>4}  failed {:>4}",
                        provider.provider,
                        provider.state,
                        provider.fetched,
                        provider.created,
                        provider.updated,
                        provider.failed
                    );
                    match (&provider.error, provider.failed_during) {
                        (Some(error), Some(during)) => println!("  ({} while {})", error, during),
                        (Some(error), None) => println!("  ({})", error),
                        _ => println!(),
                    }
                }
                println!();
                println!(
                    "{} created, {} updated, {} failed in {:.1}s",
                    report.created(),
                    report.updated(),
                    report.failed_records(),
                    report.duration().num_milliseconds() as f64 / 1000.0
                );
            }
            OutputFormat::Json => print_json(report),
            OutputFormat::Quiet => {}
        }
    }

    /// Print configured providers
    pub fn print_providers(&self, providers: &[ProviderInfo]) {
        match self.format {
            OutputFormat::Human => {
                if providers.is_empty() {
                    println!("No providers configured.");
                    return;
                }
                for provider in providers {
                    let types: Vec<&str> = provider.types.iter().map(|t| t.as_str()).collect();
                    println!(
                        "{:<10} {:<8} {}",
                        provider.name,
                        if provider.enabled { "enabled" } else { "disabled" },
                        types.join(", ")
                    );
                }
            }
            OutputFormat::Json => print_json(&providers),
            OutputFormat::Quiet => {
                for provider in providers.iter().filter(|p| p.enabled) {
                    println!("{}", provider.name);
                }
            }
        }
    }

    /// Print store status
    pub fn print_status(&self, status: &StatusInfo) {
        match self.format {
            OutputFormat::Human => {
                println!("Lifestream Status");
                println!("=================");
                println!();
                println!("Storage:");
                println!("  Location: {}", status.database);
                println!("  Size:     {}", human_size(status.database_size));
                println!();
                println!("Items: {}", status.items);
                for (record_type, count) in &status.items_by_type {
                    println!("  {:<16} {}", record_type.as_str(), count);
                }
                println!();
                println!("Checkpoints:");
                if status.checkpoints.is_empty() {
                    println!("  (never updated)");
                }
                for checkpoint in &status.checkpoints {
                    let key = match &checkpoint.filter {
                        Some(filter) => format!(
                            "{}/{}/{}",
                            checkpoint.provider, checkpoint.record_type, filter
                        ),
                        None => format!("{}/{}", checkpoint.provider, checkpoint.record_type),
                    };
                    println!(
                        "  {:<32} {}",
                        key,
                        checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
            OutputFormat::Json => print_json(status),
            OutputFormat::Quiet => println!("{}", status.items),
        }
    }

    /// Print a warning on stderr
    pub fn warning(&self, message: &str) {
        match self.format {
            OutputFormat::Human | OutputFormat::Json => eprintln!("warning: {}", message),
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
