//! trustflow: command-line front end for the trust formation workflow.

mod cli;
mod commands;
mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result, eyre};
use services::{AppServices, CollectingNotifier, LogNotifier, NoticeLevel, Notifier};
use tracing::{debug, info};

use crate::cli::Cli;
use crate::config::Config;

fn setup_logging(cli_log_level: Option<&str>) {
    let level = match cli_log_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") => tracing::Level::INFO,
        Some("ERROR") => tracing::Level::ERROR,
        Some("WARN" | "WARNING") | None => tracing::Level::WARN,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{other}', defaulting to WARN");
            tracing::Level::WARN
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

/// Turns a bare path or `sqlite:` path into an absolute `sqlite://` URL.
fn normalize_sqlite_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") || trimmed.starts_with("sqlite:file:") {
        return trimmed.to_string();
    }

    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// Creates the database file and its directory so the pool can open it.
fn prepare_sqlite_file(db_url: &str) -> Result<()> {
    if db_url == "sqlite::memory:" || db_url.starts_with("sqlite:file:") {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| eyre!("invalid database url: {db_url}"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(eyre!("invalid database url: {db_url}"));
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create database directory {}", parent.display()))?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .context(format!("Failed to create database file {}", path.display()))?;
    }
    Ok(())
}

fn print_notices(notifier: &CollectingNotifier) {
    for notice in notifier.drain() {
        let label = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        eprintln!("{label}: {}", notice.message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref());

    let config = Config::load(cli.config.as_ref())
        .context("Failed to load configuration")?
        .with_db_override(cli.db.clone());

    let db_url = normalize_sqlite_url(&config.database_url);
    prepare_sqlite_file(&db_url)?;
    debug!(db_url = %db_url, "opening progress store");

    let collected = CollectingNotifier::new();
    let notifier: Arc<dyn Notifier> = if cli.log_notices {
        Arc::new(LogNotifier)
    } else {
        Arc::new(collected.clone())
    };
    let services = AppServices::new_sqlite(&db_url, config.service_options()?, notifier)
        .await
        .context("Failed to open progress store")?;
    info!(courses = services.courses().len(), "services ready");

    let result = commands::run(&services, cli.command).await;
    print_notices(&collected);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_urls_and_absolutizes_paths() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite:///var/lib/trustflow.db"),
            "sqlite:///var/lib/trustflow.db"
        );
        assert_eq!(normalize_sqlite_url("sqlite:/tmp/a.db"), "sqlite:///tmp/a.db");

        let relative = normalize_sqlite_url("data/progress.sqlite3");
        assert!(relative.starts_with("sqlite:///"));
        assert!(relative.ends_with("data/progress.sqlite3"));
    }

    #[test]
    fn prepare_creates_parent_dirs_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("progress.sqlite3");
        let url = format!("sqlite://{}?mode=rwc", file.display());

        prepare_sqlite_file(&url).unwrap();
        assert!(file.exists());
        // idempotent
        prepare_sqlite_file(&url).unwrap();
    }

    #[test]
    fn prepare_rejects_non_sqlite_urls() {
        assert!(prepare_sqlite_file("postgres://localhost/db").is_err());
        assert!(prepare_sqlite_file("sqlite://").is_err());
        assert!(prepare_sqlite_file("sqlite::memory:").is_ok());
    }
}
