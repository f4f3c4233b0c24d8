//! Keirloom Server: headless daemon that drives inheritance cases to
//! settlement.
//!
//! Reuses the Keirloom library crates (exec, gateway, store) without any
//! front-end surface. Designed for Docker / server deployment.
//!
//! # Usage
//!
//! ```bash
//! keirloom-server --config /path/to/keirloom-server.toml
//! keirloom-server --once     # Run one poll cycle and exit
//! keirloom-server --validate # Validate config and exit
//! ```

mod config;
mod daemon;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Core dumps would write decrypted seed material to disk
    if !keirloom_core::memory::disable_core_dumps() {
        eprintln!("warning: failed to disable core dumps");
    }

    let mut config_path = PathBuf::from("/config/keirloom-server.toml");
    let mut one_shot = false;
    let mut validate_only = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => config_path = PathBuf::from(path),
                None => anyhow::bail!("--config needs a path argument"),
            },
            "--check" | "--once" => one_shot = true,
            "--validate" => validate_only = true,
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("keirloom-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => anyhow::bail!("Unrecognized argument: {other}"),
        }
    }

    let mut server_config = config::ServerConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    server_config.apply_env_overrides();
    server_config
        .validate()
        .context("Configuration validation failed")?;

    std::env::set_var("RUST_LOG", &server_config.server.log_level);
    env_logger::init();

    if validate_only {
        println!("✅ Configuration valid.");
        println!("  Ledger RPC:    {}", server_config.ledger.rpc_url);
        println!("  Verify addr:   {}", server_config.ledger.verify_address);
        println!("  Signer:        {}", server_config.signer.address);
        println!("  Data dir:      {}", server_config.server.data_dir.display());
        println!(
            "  Poll interval: {} secs",
            server_config.server.poll_interval_secs
        );
        println!("  Retry limit:   {}", server_config.execution.retry_limit);
        println!("  Vault key:     configured");
        return Ok(());
    }

    if one_shot {
        log::info!("Running single poll cycle…");
        daemon::run_cycle(&server_config)?;
        log::info!("Done.");
    } else {
        let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
        let outcome = rt.block_on(async {
            tokio::select! {
                result = daemon::run(server_config) => result,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Shutdown signal received, stopping.");
                    Ok(())
                }
            }
        });

        if let Err(e) = outcome {
            log::error!("Daemon error: {:#}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"Keirloom Server: headless daemon driving inheritance cases to settlement

USAGE:
    keirloom-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: /config/keirloom-server.toml)
    --check, --once       Run a single poll cycle and exit
    --validate            Check the config file and exit
    -h, --help            Print this help
    -V, --version         Print the version

ENVIRONMENT VARIABLES (take precedence over the config file):
    KEIRLOOM_DATA_DIR         Data directory path
    KEIRLOOM_POLL_INTERVAL    Poll interval in seconds
    KEIRLOOM_LOG_LEVEL        Log level (error/warn/info/debug/trace)
    KEIRLOOM_RPC_URL          Ledger JSON-RPC endpoint
    KEIRLOOM_VERIFY_ADDRESS   Approval payment destination address
    KEIRLOOM_SIGNER_ADDRESS   System signer address
    KEIRLOOM_SIGNER_SEED      System signer family seed
    KEIRLOOM_VAULT_KEY        Seed vault master key
    KEIRLOOM_RETRY_LIMIT      Payment attempts per distribution item

EXAMPLES:
    # Long-running daemon
    keirloom-server --config /path/to/config.toml

    # Single cycle (useful for cron jobs)
    keirloom-server --config config.toml --once

    # Check a config before deploying it
    keirloom-server --config config.toml --validate
"#
    );
}
