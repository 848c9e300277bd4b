//! Binary entry point for memlease.
//!
//! Every command prints a single JSON document on stdout. Logs go to stderr
//! or the configured log file.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Command output is the point of the binary.
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use clap::{Parser, Subcommand};
use commands::{AuditCommand, LeaseCommand};
use memlease::config::MemleaseConfig;
use memlease::observability::{self, InitOptions};
use memlease::services::ServiceContainer;
use std::path::PathBuf;
use std::process::ExitCode;

/// Memlease - lease-gated access to stored memories.
#[derive(Parser)]
#[command(name = "memlease")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "MEMLEASE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Manage leases.
    Lease {
        /// Lease subcommand.
        #[command(subcommand)]
        action: LeaseCommand,
    },

    /// Retrieve memories under a lease.
    Retrieve {
        /// Principal whose memories are searched.
        #[arg(short, long)]
        principal: String,

        /// Requesting entity.
        #[arg(short, long)]
        entity: String,

        /// Natural-language query.
        prompt: String,

        /// Restrict to one source.
        #[arg(short, long)]
        source: Option<String>,

        /// Conversation the request comes from.
        #[arg(long)]
        thread: Option<String>,

        /// Maximum number of results.
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Store an extracted memory.
    Ingest {
        /// Owning principal.
        #[arg(short, long)]
        principal: String,

        /// Producing integration.
        #[arg(short, long)]
        source: String,

        /// Extracted content.
        content: String,

        /// Tags (comma-separated).
        #[arg(short, long)]
        tags: Option<String>,

        /// Conversation the content came from.
        #[arg(long)]
        thread: Option<String>,

        /// Attached image as ID:STORAGE_KEY (repeatable).
        #[arg(long = "image")]
        images: Vec<String>,
    },

    /// Inspect the audit trail.
    Audit {
        /// Audit subcommand.
        #[command(subcommand)]
        action: AuditCommand,
    },

    /// Show backend status.
    Status,
}

/// Main entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match MemleaseConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init(
        &config,
        InitOptions {
            verbose: cli.verbose,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            commands::print_failure(e.as_ref());
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: &MemleaseConfig) -> commands::CommandResult {
    let services = ServiceContainer::from_config(config)?;

    match command {
        Commands::Lease { action } => commands::cmd_lease(&services, action),

        Commands::Retrieve {
            principal,
            entity,
            prompt,
            source,
            thread,
            limit,
        } => commands::cmd_retrieve(&services, principal, entity, prompt, source, thread, limit),

        Commands::Ingest {
            principal,
            source,
            content,
            tags,
            thread,
            images,
        } => commands::cmd_ingest(&services, principal, source, content, tags, thread, images),

        Commands::Audit { action } => commands::cmd_audit(&services, action),

        Commands::Status => commands::cmd_status(&services, config),
    }
}
