//! # trail
//!
//! Session-aware activity recorder and code analysis pipeline.

#![deny(unsafe_code)]

mod app;
mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use trail_settings::{load_settings, trail_home};
use trail_telemetry::{init_telemetry, LogQuery, SqliteLogSink, TelemetryConfig};

use crate::app::App;

#[derive(Parser, Debug)]
#[command(name = "trail", about = "Record editing sessions and analyze code with history-aware context")]
struct Cli {
    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the workspace, record activity and run the pipeline periodically.
    Watch,

    /// Run the analysis pipeline once and print the result as JSON.
    Analyze {
        /// Analyze every workspace file (up to the configured limit).
        #[arg(long)]
        all: bool,

        /// Treat this file as the active editor document.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Search past sessions and actions similar to a query.
    Recall {
        query: String,

        #[arg(short, default_value_t = 5)]
        k: usize,
    },

    /// Show persisted warnings and errors, newest first.
    Logs {
        /// Only this level (warn or error).
        #[arg(long)]
        level: Option<String>,

        /// Only lines recorded inside this session.
        #[arg(long)]
        session: Option<String>,

        /// Substring of the emitting module.
        #[arg(long)]
        target: Option<String>,

        /// RFC 3339 lower bound.
        #[arg(long)]
        since: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings().context("failed to load settings")?;

    let log_db_path = trail_home().join("logs.db");
    let telemetry = init_telemetry(TelemetryConfig {
        log_level: settings.logging.level.clone(),
        module_levels: Vec::new(),
        json: settings.logging.json,
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: log_db_path.clone(),
    });

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };

    match cli.command {
        Command::Watch => {
            let app = App::build(settings, root)?;
            watch::run(app).await
        }
        Command::Analyze { all, file } => {
            if all {
                settings.pipeline.analyze_all_files = true;
            }
            let app = App::build(settings, root)?;
            if let Some(file) = file {
                let path = file.to_string_lossy();
                if !app.workspace.set_active(&path, None) {
                    anyhow::bail!("cannot read {}", file.display());
                }
            }
            let result = app.orchestrator().run().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Recall { query, k } => {
            let app = App::build(settings, root)?;
            let sessions = app.storage.get_similar_sessions(&query, k).await?;
            let actions = app.storage.get_similar_actions(&query, k).await?;
            let output = serde_json::json!({
                "sessions": sessions
                    .iter()
                    .map(|s| serde_json::json!({
                        "id": s.item.id,
                        "summary": s.item.summary,
                        "project": s.item.project,
                        "timestamp": s.item.timestamp,
                        "eventCount": s.item.event_count,
                        "similarity": s.similarity,
                    }))
                    .collect::<Vec<_>>(),
                "actions": actions
                    .iter()
                    .map(|a| serde_json::json!({
                        "id": a.item.id,
                        "sessionId": a.item.session_id,
                        "description": a.item.description,
                        "files": a.item.files,
                        "timestamp": a.item.timestamp,
                        "similarity": a.similarity,
                    }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Command::Logs {
            level,
            session,
            target,
            since,
            limit,
        } => {
            // The sink is only installed when SQLite logging is on; older
            // databases stay readable either way.
            let opened;
            let sink = match telemetry.logs() {
                Some(sink) => sink,
                None => {
                    opened = SqliteLogSink::new(&log_db_path)
                        .with_context(|| format!("failed to open {}", log_db_path.display()))?;
                    &opened
                }
            };
            let query = LogQuery {
                level,
                target,
                session_id: session,
                since,
                limit: Some(limit),
            };
            let output = serde_json::json!({
                "total": sink.count()?,
                "logs": sink.query(&query)?,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
    }
}
