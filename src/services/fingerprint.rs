//! Memory fingerprints.
//!
//! A fingerprint identifies an extraction independent of tag and attachment
//! order, so re-ingesting the same extraction is detected as a duplicate.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Canonical form hashed into a fingerprint.
///
/// Tags and attachment ids are sets, content whitespace is collapsed.
#[derive(Serialize)]
struct Canonical<'a> {
    source: &'a str,
    content: String,
    tags: BTreeSet<&'a str>,
    conversation_thread: Option<&'a str>,
    attachments: BTreeSet<&'a str>,
}

/// Computes the SHA-256 fingerprint of an extraction as lowercase hex.
///
/// # Example
///
/// ```rust
/// use memlease::services::fingerprint;
///
/// const NO_ATTACHMENTS: &[&str] = &[];
/// let a = fingerprint("claude", "Use Postgres", &["db", "infra"], None, NO_ATTACHMENTS);
/// let b = fingerprint("claude", "Use  Postgres ", &["infra", "db"], None, NO_ATTACHMENTS);
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
#[must_use]
pub fn fingerprint<S: AsRef<str>, A: AsRef<str>>(
    source: &str,
    content: &str,
    tags: &[S],
    conversation_thread: Option<&str>,
    attachment_ids: &[A],
) -> String {
    let canonical = Canonical {
        source: source.trim(),
        content: content.split_whitespace().collect::<Vec<_>>().join(" "),
        tags: tags.iter().map(|t| t.as_ref().trim()).collect(),
        conversation_thread: conversation_thread.map(str::trim),
        attachments: attachment_ids.iter().map(AsRef::as_ref).collect(),
    };
    // Serializing a struct of strings and sets cannot fail.
    let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}
