//! Update command - run providers and persist what they fetch

use anyhow::{Context, Result};
use tracing::warn;

use lifestream_core::{Config, Orchestrator, ProviderRegistry, Shutdown, SyncError};

use crate::output::Output;

/// Run the selected providers, all configured ones when none are given
///
/// Ctrl-C stops the run between records; everything committed so far is
/// kept and the command exits non-zero.
pub async fn run(config: Config, selection: Vec<String>, output: &Output) -> Result<()> {
    let unknown: Vec<&String> = selection
        .iter()
        .filter(|name| !config.providers.contains(name))
        .collect();
    for name in &unknown {
        output.warning(&format!(
            "Unknown provider '{}'. Available: {}",
            name,
            config.providers.join(", ")
        ));
    }

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current record");
            signal.trigger();
        }
    });

    // The blocking HTTP client must live and die outside the async runtime
    let task = tokio::task::spawn_blocking(move || -> Result<_> {
        let registry = ProviderRegistry::from_config(&config, &shutdown)
            .context("Failed to set up providers")?;
        let store = super::open_store(&config)?;
        let mut orchestrator = Orchestrator::new(store, registry).with_shutdown(shutdown);
        match orchestrator.run(&selection) {
            Ok(report) => Ok(report),
            Err(SyncError::Interrupted) => anyhow::bail!("Update interrupted"),
            Err(e) => Err(e.into()),
        }
    });

    let report = task.await.context("Update task panicked")??;
    output.print_run_report(&report);

    let failed = report.failed_providers().count();
    if failed > 0 {
        output.warning(&format!("{} provider(s) failed", failed));
    }
    Ok(())
}
