//! Retrieval and ingestion command handlers.

use super::{CommandResult, print_json, split_list};
use memlease::Error;
use memlease::models::ImageRef;
use memlease::services::{IngestRequest, RetrievalRequest, ServiceContainer};
use serde_json::json;

/// Retrieve command.
pub fn cmd_retrieve(
    services: &ServiceContainer,
    principal: String,
    entity: String,
    prompt: String,
    source: Option<String>,
    thread: Option<String>,
    limit: Option<usize>,
) -> CommandResult {
    let mut request = RetrievalRequest::new(principal, prompt, entity);
    if let Some(source) = source {
        request = request.with_source(source);
    }
    if let Some(thread) = thread {
        request = request.with_conversation_thread(thread);
    }
    if let Some(limit) = limit {
        request = request.with_limit(limit);
    }

    let results = services.retrieval().retrieve(request)?;
    print_json(&json!({ "success": true, "count": results.len(), "results": results }))
}

/// Parses `ID:STORAGE_KEY`.
fn parse_image(raw: &str) -> Result<ImageRef, Error> {
    let (id, storage_key) = raw
        .split_once(':')
        .filter(|(id, key)| !id.trim().is_empty() && !key.trim().is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("image '{raw}' must be ID:STORAGE_KEY")))?;
    Ok(ImageRef {
        id: id.trim().to_string(),
        storage_key: storage_key.trim().to_string(),
        mime_type: None,
    })
}

/// Ingest command.
pub fn cmd_ingest(
    services: &ServiceContainer,
    principal: String,
    source: String,
    content: String,
    tags: Option<String>,
    thread: Option<String>,
    images: Vec<String>,
) -> CommandResult {
    let images = images
        .iter()
        .map(|raw| parse_image(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut request = IngestRequest::new(principal, source, content)
        .with_tags(split_list(tags))
        .with_images(images);
    if let Some(thread) = thread {
        request = request.with_conversation_thread(thread);
    }

    let outcome = services.ingest().ingest(request)?;
    print_json(&json!({ "success": true, "memory": outcome }))
}
