//! CLI: разбирает выписку MT5 и дозаписывает новые сделки в хранилища.

use std::env;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_subscriber::EnvFilter;

use mt5_statement_sync::{
    RawStatement, StatementBuilder, SyncConfig, latest_statement, sync_stores,
};

const USAGE: &str = "Usage: mt5-statement-sync <statement.html|statement.csv|dir> [--dry-run]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut dry_run = false;
    let mut target: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--dry-run" | "-n" => dry_run = true,
            _ if target.is_none() => target = Some(PathBuf::from(arg)),
            _ => {
                println!("{USAGE}");
                return Ok(());
            }
        }
    }
    let Some(target) = target else {
        println!("{USAGE}");
        return Ok(());
    };

    let config = SyncConfig::from_env()?;
    let path = resolve_statement(&target)?;
    info!(path = %path.display(), "parsing statement");

    let raw = RawStatement::from_path_with_encoding(&path, config.encoding)?;
    let statement = StatementBuilder::new(&raw).options(config.parse).parse()?;

    println!(
        "{}: {} trades ({} open, {} closed), {} balance operations, {} rows dropped",
        path.display(),
        statement.trades.len(),
        statement.open_positions().count(),
        statement.closed_trades().count(),
        statement.balance_events.len(),
        statement.rows_dropped
    );
    for warning in &statement.warnings {
        println!("  warning: {warning}");
    }

    if dry_run {
        println!("dry run: stores are not contacted");
        return Ok(());
    }

    let stores = config.stores()?;
    let report = sync_stores(&statement, &stores).await;
    print!("{report}");
    if report.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

/// Файл как есть; для каталога берётся самая свежая выписка.
fn resolve_statement(target: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if !target.is_dir() {
        return Ok(target.to_path_buf());
    }
    latest_statement(target)?
        .ok_or_else(|| format!("no statements in {}", target.display()).into())
}
