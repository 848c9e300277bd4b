//! Audit command handlers.

use super::{CommandResult, print_json};
use clap::Subcommand;
use memlease::models::AuditRecord;
use memlease::services::ServiceContainer;
use serde::Serialize;
use serde_json::json;

/// Audit subcommands.
#[derive(Subcommand)]
pub enum AuditCommand {
    /// Show recent access decisions, newest first.
    Trail {
        /// Principal whose trail is shown.
        #[arg(short, long)]
        principal: String,

        /// Maximum number of records.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show aggregate access statistics.
    Stats {
        /// Principal whose statistics are shown.
        #[arg(short, long)]
        principal: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrailEntry<'a> {
    #[serde(flatten)]
    record: &'a AuditRecord,
    memory_count: usize,
}

/// Audit command.
pub fn cmd_audit(services: &ServiceContainer, action: AuditCommand) -> CommandResult {
    match action {
        AuditCommand::Trail { principal, limit } => {
            let records = services.audit().trail(&principal, limit)?;
            let entries: Vec<TrailEntry<'_>> = records
                .iter()
                .map(|record| TrailEntry {
                    record,
                    memory_count: record.memory_count(),
                })
                .collect();
            print_json(&json!({ "success": true, "records": entries }))
        },
        AuditCommand::Stats { principal } => {
            let stats = services.audit().stats(&principal)?;
            print_json(&json!({ "success": true, "stats": stats }))
        },
    }
}
