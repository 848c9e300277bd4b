//! Status command handler.

use super::{CommandResult, print_json};
use memlease::config::MemleaseConfig;
use memlease::services::ServiceContainer;
use serde_json::json;

/// Status command.
pub fn cmd_status(services: &ServiceContainer, config: &MemleaseConfig) -> CommandResult {
    let status = services.status()?;
    print_json(&json!({
        "success": true,
        "version": env!("CARGO_PKG_VERSION"),
        "dataDir": config.data_dir.display().to_string(),
        "backends": status,
        "retrieval": {
            "similarityThreshold": config.retrieval.similarity_threshold,
            "defaultLimit": config.retrieval.default_limit,
            "maxLimit": config.retrieval.max_limit,
        },
    }))
}
