//! Command handlers.
//!
//! - `lease.rs`: lease create, revoke, list and check
//! - `memory.rs`: retrieve and ingest
//! - `audit.rs`: audit trail and stats
//! - `status.rs`: backend status

mod audit;
mod lease;
mod memory;
mod status;

pub use audit::{AuditCommand, cmd_audit};
pub use lease::{LeaseCommand, cmd_lease};
pub use memory::{cmd_ingest, cmd_retrieve};
pub use status::cmd_status;

use serde::Serialize;

/// Result of a command handler.
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Prints `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints `{"success": false, "error": ...}` for a failed command.
pub fn print_failure(error: &dyn std::error::Error) {
    let body = serde_json::json!({
        "success": false,
        "error": error.to_string(),
    });
    match serde_json::to_string_pretty(&body) {
        Ok(rendered) => println!("{rendered}"),
        Err(_) => eprintln!("Error: {error}"),
    }
}

/// Splits a comma-separated list, dropping empty items.
pub fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
