//! Realtime transport probe (`docsync health`).

use anyhow::{Result, bail};

use docsync::config::SyncConfig;
use docsync::liveness::{HealthProbe, HttpHealthProbe};

pub async fn cmd_health(config: &SyncConfig) -> Result<()> {
    let probe = HttpHealthProbe::new(&config.live_url(), config.probe_timeout())?;
    let started = chrono::Utc::now();

    match probe.probe().await {
        Ok(()) => {
            let elapsed = chrono::Utc::now() - started;
            println!(
                "{} {} ({} ms)",
                console::style("healthy").green().bold(),
                probe.url(),
                elapsed.num_milliseconds()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} {}", console::style("unreachable").red().bold(), probe.url());
            bail!("{}", e)
        }
    }
}
