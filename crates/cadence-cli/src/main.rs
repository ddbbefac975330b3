//! `cadence` — command-line surface over the periodic-task registry.

mod args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cadence_core::CadenceConfig;
use cadence_scheduler::{LocalRunRegistry, ScheduleKind, SchedulerService};
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::args::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_cli=info,cadence_scheduler=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // load config: --config > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let config = CadenceConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let conn = rusqlite::Connection::open(db_path)
        .with_context(|| format!("cannot open database {db_path}"))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.busy_timeout(Duration::from_secs(5))?;

    // The CLI never executes task bodies, so nothing is ever in flight here.
    let service = SchedulerService::from_config(conn, &config, Arc::new(LocalRunRegistry::new()))?;

    match cli.command {
        Command::Create(args) => {
            let req = args.into_request(config.tz()?)?;
            let task = service.create_task(&req)?;
            print_json(&task)?;
        }
        Command::Delete { name } => {
            service.delete_task(&name)?;
            print_json(&serde_json::json!({ "status": "deleted", "name": name }))?;
        }
        Command::List => print_json(&service.list_tasks()?)?,
        Command::Executables => print_json(&service.list_executables())?,
        Command::Kinds => {
            let kinds: serde_json::Map<String, serde_json::Value> = ScheduleKind::ALL
                .iter()
                .map(|k| Ok((k.to_string(), serde_json::to_value(k.schema())?)))
                .collect::<serde_json::Result<_>>()?;
            print_json(&kinds)?;
        }
        Command::Enable { name } => {
            service.set_enabled(&name, true)?;
            print_json(&service.tasks().get(&name)?)?;
        }
        Command::Disable { name } => {
            service.set_enabled(&name, false)?;
            print_json(&service.tasks().get(&name)?)?;
        }
        Command::Gc => {
            let removed = service.garbage_collect()?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Command::Collect => {
            if !config.collector.enabled {
                anyhow::bail!("collector is disabled in config (collector.enabled = false)");
            }
            let every = Duration::from_secs(config.collector.interval_secs);
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let collector = tokio::spawn(service.collector(every).run(shutdown_rx));

            tokio::signal::ctrl_c().await?;
            info!("ctrl-c received");
            let _ = shutdown_tx.send(true);
            collector.await?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
