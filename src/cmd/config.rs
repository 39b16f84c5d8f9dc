//! Configuration view and validation commands (`docsync config`).

use anyhow::{Context, Result};

use docsync::config::{SyncConfig, SyncToml};

use super::super::ConfigCommands;

fn print_sections(toml: &SyncToml) {
    println!("[endpoints]");
    if let Some(url) = &toml.endpoints.live_url {
        println!("  live_url = \"{}\"", url);
    }
    if let Some(url) = &toml.endpoints.api_base_url {
        println!("  api_base_url = \"{}\"", url);
    }
    if toml.endpoints.api_token.is_some() {
        println!("  api_token = (set)");
    }
    println!();
    println!("[liveness]");
    println!("  interval_secs = {}", toml.liveness.interval_secs);
    println!("  failure_threshold = {}", toml.liveness.failure_threshold);
    println!("  probe_timeout_secs = {}", toml.liveness.probe_timeout_secs);
    println!();
    println!("[autosave]");
    println!("  interval_secs = {}", toml.autosave.interval_secs);
    println!("  debounce_ms = {}", toml.autosave.debounce_ms);
    println!();
    println!("[logging]");
    println!("  json = {}", toml.logging.json);
    if let Some(dir) = &toml.logging.dir {
        println!("  dir = \"{}\"", dir.display());
    }
    println!();
    if let Some(url) = &toml.redis.url {
        println!("[redis]");
        println!("  url = \"{}\"", url);
        println!();
    }
}

pub fn cmd_config(config: &SyncConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("docsync Configuration");
            println!("=====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No docsync.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();
            print_sections(&config.toml);

            println!("Effective values (with env/CLI overrides):");
            println!("  live_url = \"{}\"", config.live_url());
            println!("  api_base_url = \"{}\"", config.api_base_url());
            println!(
                "  api_token = {}",
                if config.api_token().is_some() { "(set)" } else { "(unset)" }
            );
            println!("  redis = \"{}\"", config.redis().url());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("docsync.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.config_dir).with_context(|| {
                format!("Failed to create {}", config.config_dir.display())
            })?;

            let mut toml = SyncToml::default();
            toml.endpoints.live_url = Some(docsync::config::DEFAULT_LIVE_URL.to_string());
            toml.endpoints.api_base_url = Some(docsync::config::DEFAULT_API_BASE_URL.to_string());
            toml.save(&config_path)?;

            println!("Created docsync.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [endpoints] live_url, api_base_url, api_token");
            println!("  - [liveness] interval_secs, failure_threshold, probe_timeout_secs");
            println!("  - [autosave] interval_secs, debounce_ms");
            println!("  - [redis] url (REDIS_URL or REDIS_HOST/REDIS_PORT take precedence)");
            println!();
        }
    }

    Ok(())
}
