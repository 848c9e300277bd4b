//! Lease command handlers.

use super::{CommandResult, print_json};
use clap::Subcommand;
use memlease::services::ServiceContainer;
use serde_json::json;

/// Lease subcommands.
#[derive(Subcommand)]
pub enum LeaseCommand {
    /// Grant an entity access to a principal's memories.
    Create {
        /// Granting principal.
        #[arg(short, long)]
        principal: String,

        /// Entity receiving access.
        #[arg(short, long)]
        entity: String,

        /// `global` or a source name.
        #[arg(short, long, default_value = "global")]
        access: String,

        /// Lease duration in days.
        #[arg(short, long, default_value = "7")]
        days: u32,
    },

    /// Revoke a lease.
    Revoke {
        /// Lease ID.
        lease_id: String,

        /// Owning principal.
        #[arg(short, long)]
        principal: String,
    },

    /// List a principal's leases.
    List {
        /// Owning principal.
        #[arg(short, long)]
        principal: String,

        /// Include revoked leases.
        #[arg(long)]
        all: bool,
    },

    /// Check whether a lease is currently valid.
    Check {
        /// Lease ID.
        lease_id: String,

        /// Consult the cache only, like the retrieval fast path.
        #[arg(long)]
        cache_only: bool,
    },
}

/// Lease command.
pub fn cmd_lease(services: &ServiceContainer, action: LeaseCommand) -> CommandResult {
    let leases = services.leases();
    match action {
        LeaseCommand::Create {
            principal,
            entity,
            access,
            days,
        } => {
            let lease_id = leases.create_lease(&principal, &entity, &access, days)?;
            print_json(&json!({ "success": true, "leaseId": lease_id }))
        },
        LeaseCommand::Revoke {
            lease_id,
            principal,
        } => {
            leases.revoke_lease(&lease_id, &principal)?;
            print_json(&json!({ "success": true, "leaseId": lease_id }))
        },
        LeaseCommand::List { principal, all } => {
            let listed = leases.list_leases(&principal, all)?;
            print_json(&json!({ "success": true, "leases": listed }))
        },
        LeaseCommand::Check {
            lease_id,
            cache_only,
        } => {
            let status = if cache_only {
                leases.is_lease_valid(&lease_id)?
            } else {
                leases.check_lease(&lease_id)?
            };
            print_json(&json!({ "success": true, "lease": status }))
        },
    }
}
