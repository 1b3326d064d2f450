// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! conduit: run one-shot LSP queries from the command line.
//!
//! Launches a language server on a workspace, issues the requested query
//! and prints the result as JSON on stdout. Logs go to stderr.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lsp_types::{Position, Uri};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lsp_conduit::{EngineConfig, ServerLaunchSpec, Session, path_to_uri};

/// Command-line arguments for conduit.
#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(about = "Query a language server from the command line")]
#[command(version)]
struct Args {
    /// The query to run.
    #[command(subcommand)]
    command: Command,

    /// Language server executable.
    #[arg(long, global = true, default_value = "sourcekit-lsp")]
    server: String,

    /// Argument passed to the language server. Can be specified multiple times.
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Language id documents are opened with.
    #[arg(long, global = true, default_value = "swift")]
    language: String,

    /// Workspace root directory (defaults to the current directory).
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// A file plus a zero-based line and UTF-16 column.
#[derive(clap::Args, Debug)]
struct Target {
    /// Source file.
    file: PathBuf,
    /// Zero-based line.
    line: u32,
    /// Zero-based UTF-16 column.
    column: u32,
}

/// Subcommands supported by conduit.
#[derive(Subcommand, Debug)]
enum Command {
    /// Where the symbol at a position is defined.
    Definition {
        #[command(flatten)]
        target: Target,
    },

    /// Hover documentation for the symbol at a position.
    Hover {
        #[command(flatten)]
        target: Target,
    },

    /// Symbols declared in a file.
    Symbols {
        /// Source file.
        file: PathBuf,
    },

    /// Edits that rename the symbol at a position. Nothing is written to disk.
    Rename {
        #[command(flatten)]
        target: Target,
        /// The new name.
        new_name: String,
    },

    /// Search symbols across the workspace.
    WorkspaceSymbols {
        /// Search string.
        query: String,

        /// Open this file first; some servers only index opened files.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Definition, hover and file symbols for a position, plus session status.
    All {
        #[command(flatten)]
        target: Target,
    },

    /// Print the effective configuration and exit.
    Config,
}

/// Runs the requested query.
///
/// # Errors
///
/// Returns an error if the server cannot be started or the query fails.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lsp_conduit=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::load(args.config.clone())?;

    if matches!(args.command, Command::Config) {
        return print_json(&config);
    }

    let root = args
        .root
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
        .canonicalize()
        .context("Failed to resolve workspace root")?;
    let spec = ServerLaunchSpec::new(args.server.clone(), path_to_uri(&root)?, args.language)
        .with_args(args.server_args)
        .with_working_directory(&root);

    info!("Starting {} on {}", spec.command, root.display());
    let session = Session::start(spec, config)
        .await
        .with_context(|| format!("Failed to start language server '{}'", args.server))?;

    let result = run_query(&session, args.command).await;
    session.shutdown().await?;
    print_json(&result?)
}

async fn run_query(session: &Session, command: Command) -> Result<Value> {
    let value = match command {
        Command::Definition { target } => {
            let (uri, position) = target.resolve()?;
            to_value(session.definition(&uri, position).await?)?
        }
        Command::Hover { target } => {
            let (uri, position) = target.resolve()?;
            to_value(session.hover(&uri, position).await?)?
        }
        Command::Symbols { file } => {
            let uri = file_uri(&file)?;
            to_value(session.document_symbols(&uri).await?)?
        }
        Command::Rename { target, new_name } => {
            let (uri, position) = target.resolve()?;
            to_value(session.rename(&uri, position, &new_name).await?)?
        }
        Command::WorkspaceSymbols { query, file } => {
            if let Some(file) = file {
                session.ensure_open(&file_uri(&file)?).await?;
            }
            to_value(session.workspace_symbols(&query).await?)?
        }
        Command::All { target } => {
            let (uri, position) = target.resolve()?;
            serde_json::json!({
                "definition": outcome(session.definition(&uri, position).await),
                "hover": outcome(session.hover(&uri, position).await),
                "symbols": outcome(session.document_symbols(&uri).await),
                "status": to_value(session.status())?,
            })
        }
        Command::Config => Value::Null,
    };
    Ok(value)
}

impl Target {
    fn resolve(&self) -> Result<(Uri, Position)> {
        Ok((file_uri(&self.file)?, Position::new(self.line, self.column)))
    }
}

fn file_uri(file: &Path) -> Result<Uri> {
    let path = file
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", file.display()))?;
    Ok(path_to_uri(&path)?)
}

/// A query result, or its error message when the query failed.
fn outcome<T: Serialize>(result: lsp_conduit::Result<T>) -> Value {
    match result.map(serde_json::to_value) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => serde_json::json!({ "error": e.to_string() }),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to serialize result")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_target() -> Result<()> {
        let args = Args::try_parse_from([
            "conduit",
            "--server",
            "mockls",
            "--arg",
            "--hang-on",
            "--arg",
            "shutdown",
            "hover",
            "src/main.swift",
            "3",
            "7",
        ])?;
        assert_eq!(args.server, "mockls");
        assert_eq!(args.server_args, ["--hang-on", "shutdown"]);
        assert_eq!(args.language, "swift");
        let Command::Hover { target } = args.command else {
            anyhow::bail!("expected hover, got {:?}", args.command);
        };
        assert_eq!(target.file, PathBuf::from("src/main.swift"));
        assert_eq!((target.line, target.column), (3, 7));
        Ok(())
    }

    #[test]
    fn test_args_rename_requires_new_name() {
        assert!(Args::try_parse_from(["conduit", "rename", "a.swift", "1", "2"]).is_err());
    }

    #[test]
    fn test_outcome_reports_errors() {
        let failed: lsp_conduit::Result<u32> = Err(lsp_conduit::EngineError::UnsupportedCapability(
            lsp_conduit::Feature::Rename,
        ));
        let value = outcome(failed);
        assert!(value["error"].as_str().is_some_and(|s| !s.is_empty()));
        assert_eq!(outcome(Ok(5)), Value::from(5));
    }
}
