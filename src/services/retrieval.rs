//! Lease-gated memory retrieval.
//!
//! A request flows through the access resolver, the embedder, the vector
//! index and the relational store, and ends with exactly one audit record:
//!
//! ```text
//! resolve ─ denied ──────────────────────────────► audit(denied) ─► AccessDenied
//!    │
//!    └ granted ─► embed ─► search(2·limit) ─► re-check threshold
//!                                   │
//!                                   ├ none ──────► audit(granted, 0) ─► []
//!                                   │
//!                                   └ fold chunks ─► join ─► rank ─► audit(granted, ids)
//! ```
//!
//! Any failure before an audit was written is recorded as a denial carrying
//! the error text. Nothing is recorded twice for one request.

use super::{AccessDecision, AccessResolver, AuditDecision, AuditRecorder};
use crate::config::RetrievalConfig;
use crate::embedding::{Embedder, validate_dimensions};
use crate::models::{
    ChunkFilter, ChunkMatch, GLOBAL_ACCESS, LeaseId, Memory, MemoryId, Principal, RankedMemory,
};
use crate::storage::{MemoryStore, VectorIndex};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// A retrieval request as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    /// Principal whose memories are searched (unnormalized).
    pub principal: String,
    /// Natural-language query.
    pub prompt: String,
    /// Requesting entity.
    pub entity: String,
    /// Source the caller wants to restrict to.
    pub requested_source: Option<String>,
    /// Conversation the request originates from.
    pub conversation_thread: Option<String>,
    /// Maximum results; the configured default when absent.
    pub limit: Option<usize>,
}

impl RetrievalRequest {
    /// Creates an unscoped request with the default limit.
    #[must_use]
    pub fn new(
        principal: impl Into<String>,
        prompt: impl Into<String>,
        entity: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            prompt: prompt.into(),
            entity: entity.into(),
            requested_source: None,
            conversation_thread: None,
            limit: None,
        }
    }

    /// Restricts the request to one source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.requested_source = Some(source.into());
        self
    }

    /// Tags the request with its conversation.
    #[must_use]
    pub fn with_conversation_thread(mut self, thread: impl Into<String>) -> Self {
        self.conversation_thread = Some(thread.into());
        self
    }

    /// Sets the result limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// What is known about an attempt when it fails.
#[derive(Debug, Default)]
struct Attempt {
    recorded: bool,
    lease_id: Option<LeaseId>,
    source_filter: Option<String>,
}

/// Chunk hits folded to one memory.
#[derive(Debug)]
struct ScoredMemory {
    similarity: f32,
    matched_chunks: Vec<String>,
}

/// The retrieval orchestrator.
pub struct RetrievalService {
    config: RetrievalConfig,
    resolver: Arc<AccessResolver>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    memories: Arc<dyn MemoryStore>,
    audit: Arc<AuditRecorder>,
}

impl RetrievalService {
    /// Creates the orchestrator over its collaborators.
    #[must_use]
    pub fn new(
        config: RetrievalConfig,
        resolver: Arc<AccessResolver>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        memories: Arc<dyn MemoryStore>,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            config,
            resolver,
            embedder,
            index,
            memories,
            audit,
        }
    }

    /// Returns the memories the request's lease allows, best first.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for malformed fields or a limit outside
    ///   `1..=max_limit`. Nothing is audited.
    /// - [`Error::AccessDenied`] when no lease covers the request.
    /// - Any upstream error from the embedder, index or store, after it has
    ///   been recorded as a denial.
    #[instrument(
        skip(self, request),
        fields(
            operation = "retrieve",
            principal = %request.principal,
            entity = %request.entity,
            prompt_len = request.prompt.len(),
            result_count = tracing::field::Empty
        )
    )]
    pub fn retrieve(&self, request: RetrievalRequest) -> Result<Vec<RankedMemory>> {
        let start = Instant::now();
        let principal = Principal::parse(&request.principal)?;
        let limit = self.validate(&request)?;

        let mut attempt = Attempt::default();
        let result = self.run(&principal, &request, limit, &mut attempt);

        if let Err(e) = &result
            && !attempt.recorded
        {
            tracing::warn!(error = %e, "Retrieval failed before a decision was recorded");
            self.audit.record(
                AuditDecision::denied(principal, &request.entity, &request.prompt, e.to_string())
                    .with_lease(attempt.lease_id)
                    .with_source_filter(attempt.source_filter),
            );
        }

        let status = match &result {
            Ok(_) => "granted",
            Err(Error::AccessDenied { .. }) => "denied",
            Err(_) => "error",
        };
        metrics::histogram!("retrieval_duration_ms", "status" => status)
            .record(start.elapsed().as_secs_f64() * 1000.0);
        if let Ok(ranked) = &result {
            #[allow(clippy::cast_precision_loss)]
            let count = ranked.len() as f64;
            metrics::histogram!("retrieval_results").record(count);
            tracing::Span::current().record("result_count", ranked.len());
        }
        result
    }

    fn validate(&self, request: &RetrievalRequest) -> Result<usize> {
        if request.prompt.trim().is_empty() {
            return Err(Error::InvalidInput("prompt cannot be empty".to_string()));
        }
        if request.entity.trim().is_empty() {
            return Err(Error::InvalidInput("entity cannot be empty".to_string()));
        }
        if request.requested_source.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(Error::InvalidInput("source cannot be empty".to_string()));
        }
        let limit = request.limit.unwrap_or(self.config.default_limit);
        if limit == 0 || limit > self.config.max_limit {
            return Err(Error::InvalidInput(format!(
                "limit must be between 1 and {}, got {limit}",
                self.config.max_limit
            )));
        }
        Ok(limit)
    }

    fn run(
        &self,
        principal: &Principal,
        request: &RetrievalRequest,
        limit: usize,
        attempt: &mut Attempt,
    ) -> Result<Vec<RankedMemory>> {
        // `global` names the lease scope, not a source.
        let requested_source: Option<String> = request
            .requested_source
            .as_deref()
            .map(str::trim)
            .filter(|source| !source.eq_ignore_ascii_case(GLOBAL_ACCESS))
            .map(str::to_string);
        let lease = match self
            .resolver
            .resolve(principal, &request.entity, requested_source.as_deref())?
        {
            AccessDecision::Granted(lease) => lease,
            AccessDecision::Denied(reason) => {
                attempt.recorded = true;
                self.audit.record(
                    AuditDecision::denied(
                        principal.clone(),
                        &request.entity,
                        &request.prompt,
                        &reason,
                    )
                    .with_source_filter(requested_source),
                );
                return Err(Error::AccessDenied { reason });
            },
        };
        attempt.lease_id = Some(lease.id.clone());

        // A scoped lease narrows the search even when the caller asked for more.
        let effective_source = lease
            .access_specifier
            .source()
            .map(str::to_string)
            .or(requested_source);
        attempt.source_filter.clone_from(&effective_source);

        let query = self.embedder.embed(&request.prompt)?;
        validate_dimensions(&query, self.index.dimensions())?;

        let threshold = self.config.similarity_threshold;
        let filter = ChunkFilter::new(principal.as_str(), effective_source.clone());
        let candidates = limit.saturating_mul(self.config.candidate_multiplier.max(1));
        let matches: Vec<ChunkMatch> = self
            .index
            .search(&query, candidates, threshold, &filter)?
            .into_iter()
            .filter(|m| m.score >= threshold)
            .collect();

        let grant = AuditDecision::granted(
            principal.clone(),
            &request.entity,
            &request.prompt,
            lease.id.clone(),
        )
        .with_source_filter(effective_source);

        if matches.is_empty() {
            attempt.recorded = true;
            self.audit.record(grant.with_reason("lease matched; no memories above threshold"));
            return Ok(Vec::new());
        }

        let scored = fold_chunks(matches, &filter);
        let ids: Vec<MemoryId> = scored.keys().cloned().collect();
        let memories = self.memories.get_memories(principal, &ids)?;
        let ranked = rank(memories, scored, limit);

        attempt.recorded = true;
        self.audit
            .record(grant.with_memories(ranked.iter().map(|m| m.id.clone()).collect()));
        Ok(ranked)
    }
}

/// Folds chunk hits into per-memory scores.
///
/// A memory's similarity is its best chunk's score. Hits without a payload,
/// or whose payload falls outside the filter, are skipped.
fn fold_chunks(matches: Vec<ChunkMatch>, filter: &ChunkFilter) -> HashMap<MemoryId, ScoredMemory> {
    let mut scored: HashMap<MemoryId, ScoredMemory> = HashMap::new();
    for hit in matches {
        let Some(payload) = hit.payload else {
            tracing::warn!(vector.id = hit.id, "Chunk hit has no memory payload, skipping");
            continue;
        };
        if !filter.matches(&payload) {
            tracing::warn!(
                vector.id = hit.id,
                memory.id = %payload.memory_id,
                "Chunk hit outside the search filter, skipping"
            );
            continue;
        }
        let entry = scored.entry(payload.memory_id).or_insert(ScoredMemory {
            similarity: hit.score,
            matched_chunks: Vec::new(),
        });
        entry.similarity = entry.similarity.max(hit.score);
        entry.matched_chunks.push(payload.content);
    }
    scored
}

/// Joins scores onto memory rows, orders best first and truncates.
///
/// Ties are broken by memory id so the order is stable.
fn rank(
    memories: Vec<Memory>,
    mut scored: HashMap<MemoryId, ScoredMemory>,
    limit: usize,
) -> Vec<RankedMemory> {
    let mut ranked: Vec<RankedMemory> = memories
        .into_iter()
        .filter_map(|memory| {
            let Some(score) = scored.remove(&memory.id) else {
                return None;
            };
            Some(RankedMemory {
                id: memory.id,
                source: memory.source,
                extracted_content: memory.extracted_content,
                tags: memory.tags,
                created_at: memory.created_at,
                similarity: score.similarity,
                matched_chunks: score.matched_chunks,
                images: memory.images,
            })
        })
        .collect();

    for missing in scored.keys() {
        tracing::warn!(memory.id = %missing, "Indexed memory has no relational row, skipping");
    }

    ranked.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::ledger::LocalLedger;
    use crate::models::{AuditAction, ChunkPayload};
    use crate::services::LeaseManager;
    use crate::storage::{FlatVectorIndex, MemoryCache, SqliteStore};
    use proptest::prelude::*;
    use std::cmp::Ordering;
    use std::sync::Mutex;
    use test_case::test_case;

    const DIMS: usize = 8;

    /// Returns the scripted hits regardless of the query.
    struct ScriptedIndex {
        hits: Vec<ChunkMatch>,
        last_filter: Mutex<Option<ChunkFilter>>,
        last_limit: Mutex<usize>,
    }

    impl ScriptedIndex {
        fn new(hits: Vec<ChunkMatch>) -> Self {
            Self {
                hits,
                last_filter: Mutex::new(None),
                last_limit: Mutex::new(0),
            }
        }
    }

    impl VectorIndex for ScriptedIndex {
        fn dimensions(&self) -> usize {
            DIMS
        }

        fn upsert(&self, _id: u64, _vector: &[f32], _payload: &ChunkPayload) -> Result<()> {
            Ok(())
        }

        fn search(
            &self,
            _vector: &[f32],
            limit: usize,
            _score_threshold: f32,
            filter: &ChunkFilter,
        ) -> Result<Vec<ChunkMatch>> {
            *self.last_filter.lock().unwrap() = Some(filter.clone());
            *self.last_limit.lock().unwrap() = limit;
            Ok(self.hits.clone())
        }

        fn count(&self) -> Result<usize> {
            Ok(self.hits.len())
        }

        fn backend_name(&self) -> &'static str {
            "scripted"
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn dimensions(&self) -> usize {
            DIMS
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::OperationFailed {
                operation: "embed".to_string(),
                cause: "service unavailable".to_string(),
            })
        }
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        leases: Arc<LeaseManager>,
        audit: Arc<AuditRecorder>,
        index: Arc<ScriptedIndex>,
    }

    impl Fixture {
        fn new(hits: Vec<ChunkMatch>) -> Self {
            let store = Arc::new(SqliteStore::in_memory().unwrap());
            let ledger = Arc::new(LocalLedger::in_memory());
            let leases = Arc::new(LeaseManager::new(
                ledger.clone(),
                store.clone(),
                Arc::new(MemoryCache::new(100)),
            ));
            let audit = Arc::new(AuditRecorder::new(store.clone(), ledger));
            Self {
                store,
                leases,
                audit,
                index: Arc::new(ScriptedIndex::new(hits)),
            }
        }

        fn service_with(&self, embedder: Arc<dyn Embedder>) -> RetrievalService {
            RetrievalService::new(
                RetrievalConfig::default(),
                Arc::new(AccessResolver::new(self.leases.clone())),
                embedder,
                self.index.clone(),
                self.store.clone(),
                self.audit.clone(),
            )
        }

        fn service(&self) -> RetrievalService {
            self.service_with(Arc::new(HashEmbedder::new(DIMS)))
        }

        fn add_memory(&self, id: &str, source: &str) {
            self.store
                .insert_memory(&Memory {
                    id: MemoryId::new(id),
                    principal: Principal::parse("0xabc").unwrap(),
                    source: source.to_string(),
                    conversation_thread: None,
                    extracted_content: format!("content of {id}"),
                    tags: vec![],
                    fingerprint: format!("fp-{id}"),
                    images: vec![],
                    created_at: 1,
                })
                .unwrap();
        }

        fn trail(&self) -> Vec<crate::models::AuditRecord> {
            self.audit.trail("0xabc", 100).unwrap()
        }
    }

    fn hit(vector_id: u64, memory: &str, score: f32) -> ChunkMatch {
        ChunkMatch {
            id: vector_id,
            score,
            payload: Some(ChunkPayload {
                memory_id: MemoryId::new(memory),
                chunk_index: 0,
                content: format!("chunk {vector_id} of {memory}"),
                tags: vec![],
                principal: "0xabc".to_string(),
                source: "claude".to_string(),
            }),
        }
    }

    #[test]
    fn test_ranking_by_similarity() {
        let fixture = Fixture::new(vec![hit(1, "m1", 0.91), hit(2, "m2", 0.95), hit(3, "m3", 0.88)]);
        for id in ["m1", "m2", "m3"] {
            fixture.add_memory(id, "claude");
        }
        fixture.leases.create_lease("0xabc", "assistant1", "global", 7).unwrap();

        let ranked = fixture
            .service()
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1").with_limit(2))
            .unwrap();
        let scores: Vec<f32> = ranked.iter().map(|m| m.similarity).collect();
        assert_eq!(scores, vec![0.95, 0.91]);
        assert_eq!(*fixture.index.last_limit.lock().unwrap(), 4);

        let trail = fixture.trail();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::Granted);
        assert_eq!(
            trail[0].accessed_memories,
            vec![MemoryId::new("m2"), MemoryId::new("m1")]
        );
    }

    #[test]
    fn test_chunks_fold_to_best_score() {
        let fixture = Fixture::new(vec![hit(1, "m1", 0.6), hit(2, "m1", 0.9), hit(3, "m2", 0.7)]);
        fixture.add_memory("m1", "claude");
        fixture.add_memory("m2", "claude");
        fixture.leases.create_lease("0xabc", "assistant1", "global", 7).unwrap();

        let ranked = fixture
            .service()
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1"))
            .unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, MemoryId::new("m1"));
        assert!((ranked[0].similarity - 0.9).abs() < f32::EPSILON);
        assert_eq!(ranked[0].matched_chunks.len(), 2);
    }

    #[test]
    fn test_denial_is_audited_once() {
        let fixture = Fixture::new(vec![]);
        fixture.leases.create_lease("0xabc", "assistant1", "claude", 7).unwrap();

        let err = fixture
            .service()
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1"))
            .unwrap_err();
        assert!(matches!(err, Error::AccessDenied { ref reason } if reason.contains("no global lease")));

        let trail = fixture.trail();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::Denied);
        assert!(trail[0].accessed_memories.is_empty());
        assert!(trail[0].lease_id.is_none());
    }

    #[test]
    fn test_zero_matches_is_a_grant() {
        let fixture = Fixture::new(vec![hit(1, "m1", 0.2)]);
        fixture.add_memory("m1", "claude");
        fixture.leases.create_lease("0xabc", "assistant1", "global", 7).unwrap();

        let ranked = fixture
            .service()
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1"))
            .unwrap();
        assert!(ranked.is_empty());

        let trail = fixture.trail();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::Granted);
        assert_eq!(trail[0].memory_count(), 0);
    }

    #[test]
    fn test_scoped_lease_overrides_requested_source() {
        let fixture = Fixture::new(vec![]);
        let lease_id = fixture
            .leases
            .create_lease("0xabc", "assistant1", "claude", 7)
            .unwrap();

        fixture
            .service()
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1").with_source("claude"))
            .unwrap();
        let filter = fixture.index.last_filter.lock().unwrap().clone().unwrap();
        assert_eq!(filter.source.as_deref(), Some("claude"));
        assert_eq!(filter.principal, "0xabc");

        let trail = fixture.trail();
        assert_eq!(trail[0].lease_id, Some(lease_id));
        assert_eq!(trail[0].source_filter.as_deref(), Some("claude"));
    }

    #[test]
    fn test_global_lease_keeps_requested_source() {
        let fixture = Fixture::new(vec![]);
        fixture.leases.create_lease("0xabc", "assistant1", "global", 7).unwrap();

        fixture
            .service()
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1").with_source("notion"))
            .unwrap();
        let filter = fixture.index.last_filter.lock().unwrap().clone().unwrap();
        assert_eq!(filter.source.as_deref(), Some("notion"));
    }

    #[test_case("global" ; "lowercase")]
    #[test_case(" Global " ; "padded mixed case")]
    fn test_global_as_source_means_unscoped(source: &str) {
        let fixture = Fixture::new(vec![hit(1, "m1", 0.9)]);
        fixture.add_memory("m1", "claude");
        fixture.leases.create_lease("0xabc", "assistant1", "global", 7).unwrap();

        let ranked = fixture
            .service()
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1").with_source(source))
            .unwrap();
        assert_eq!(ranked.len(), 1);
        let filter = fixture.index.last_filter.lock().unwrap().clone().unwrap();
        assert!(filter.source.is_none());
        assert!(fixture.trail()[0].source_filter.is_none());
    }

    #[test]
    fn test_global_as_source_needs_a_global_lease() {
        let fixture = Fixture::new(vec![hit(1, "m1", 0.9)]);
        fixture.add_memory("m1", "claude");
        fixture.leases.create_lease("0xabc", "assistant1", "claude", 7).unwrap();

        let result = fixture
            .service()
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1").with_source("GLOBAL"));
        assert!(matches!(result, Err(Error::AccessDenied { .. })));
        assert!(fixture.trail()[0].source_filter.is_none());
    }

    #[test]
    fn test_malformed_payloads_are_skipped() {
        let mut foreign = hit(2, "m2", 0.9);
        if let Some(payload) = foreign.payload.as_mut() {
            payload.principal = "0xdef".to_string();
        }
        let orphan = ChunkMatch {
            id: 3,
            score: 0.99,
            payload: None,
        };
        let fixture = Fixture::new(vec![hit(1, "m1", 0.8), foreign, orphan]);
        fixture.add_memory("m1", "claude");
        fixture.leases.create_lease("0xabc", "assistant1", "global", 7).unwrap();

        let ranked = fixture
            .service()
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1"))
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, MemoryId::new("m1"));
    }

    #[test]
    fn test_memory_without_row_is_skipped() {
        let fixture = Fixture::new(vec![hit(1, "m1", 0.8), hit(2, "ghost", 0.9)]);
        fixture.add_memory("m1", "claude");
        fixture.leases.create_lease("0xabc", "assistant1", "global", 7).unwrap();

        let ranked = fixture
            .service()
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1"))
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(fixture.trail()[0].accessed_memories, vec![MemoryId::new("m1")]);
    }

    #[test]
    fn test_upstream_failure_is_recorded_as_denial() {
        let fixture = Fixture::new(vec![]);
        let lease_id = fixture
            .leases
            .create_lease("0xabc", "assistant1", "global", 7)
            .unwrap();

        let err = fixture
            .service_with(Arc::new(FailingEmbedder))
            .retrieve(RetrievalRequest::new("0xabc", "q", "assistant1"))
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));

        let trail = fixture.trail();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::Denied);
        assert!(trail[0].reason.contains("service unavailable"));
        assert_eq!(trail[0].lease_id, Some(lease_id));
    }

    #[test]
    fn test_invalid_requests_are_not_audited() {
        let fixture = Fixture::new(vec![]);
        let service = fixture.service();

        for request in [
            RetrievalRequest::new("0xabc", "  ", "assistant1"),
            RetrievalRequest::new("0xabc", "q", ""),
            RetrievalRequest::new("", "q", "assistant1"),
            RetrievalRequest::new("0xabc", "q", "assistant1").with_limit(0),
            RetrievalRequest::new("0xabc", "q", "assistant1").with_limit(51),
        ] {
            assert!(matches!(service.retrieve(request), Err(Error::InvalidInput(_))));
        }
        assert!(fixture.trail().is_empty());
    }

    #[test]
    fn test_real_index_round_trip() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let ledger = Arc::new(LocalLedger::in_memory());
        let leases = Arc::new(LeaseManager::new(
            ledger.clone(),
            store.clone(),
            Arc::new(MemoryCache::new(100)),
        ));
        let audit = Arc::new(AuditRecorder::new(store.clone(), ledger));
        let embedder = Arc::new(HashEmbedder::new(DIMS));
        let index = Arc::new(FlatVectorIndex::in_memory(DIMS));

        let memory = Memory {
            id: MemoryId::new("m1"),
            principal: Principal::parse("0xabc").unwrap(),
            source: "claude".to_string(),
            conversation_thread: None,
            extracted_content: "postgres database decision".to_string(),
            tags: vec![],
            fingerprint: "fp".to_string(),
            images: vec![],
            created_at: 1,
        };
        store.insert_memory(&memory).unwrap();
        let vector = embedder.embed(&memory.extracted_content).unwrap();
        index
            .upsert(
                1,
                &vector,
                &ChunkPayload {
                    memory_id: memory.id.clone(),
                    chunk_index: 0,
                    content: memory.extracted_content.clone(),
                    tags: vec![],
                    principal: "0xabc".to_string(),
                    source: "claude".to_string(),
                },
            )
            .unwrap();
        leases.create_lease("0xabc", "assistant1", "global", 7).unwrap();

        let service = RetrievalService::new(
            RetrievalConfig::default(),
            Arc::new(AccessResolver::new(leases)),
            embedder,
            index,
            store,
            audit,
        );
        let ranked = service
            .retrieve(RetrievalRequest::new("0xABC", "postgres database decision", "assistant1"))
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].similarity > 0.99);
    }

    fn memory_row(id: &str) -> Memory {
        Memory {
            id: MemoryId::new(id),
            principal: Principal::parse("0xabc").unwrap(),
            source: "claude".to_string(),
            conversation_thread: None,
            extracted_content: format!("content of {id}"),
            tags: vec![],
            fingerprint: format!("fp-{id}"),
            images: vec![],
            created_at: 1,
        }
    }

    proptest! {
        /// Best first, ties by id, never more than `limit`, and nothing
        /// dropped outranks anything kept.
        #[test]
        fn prop_ranking_sorted_and_truncated(
            // Coarse scores so ties are common.
            scores in prop::collection::vec((0u8..8).prop_map(|n| f32::from(n) / 8.0), 0..20),
            limit in 1usize..10,
        ) {
            let ids: Vec<String> = (0..scores.len()).map(|i| format!("m{i:02}")).collect();
            let memories: Vec<Memory> = ids.iter().rev().map(|id| memory_row(id)).collect();
            let scored: HashMap<MemoryId, ScoredMemory> = ids
                .iter()
                .zip(&scores)
                .map(|(id, &similarity)| {
                    (
                        MemoryId::new(id.as_str()),
                        ScoredMemory { similarity, matched_chunks: vec![] },
                    )
                })
                .collect();

            let ranked = rank(memories, scored, limit);

            prop_assert_eq!(ranked.len(), scores.len().min(limit));
            for pair in ranked.windows(2) {
                let order = pair[0]
                    .similarity
                    .total_cmp(&pair[1].similarity)
                    .then_with(|| pair[1].id.cmp(&pair[0].id));
                prop_assert_eq!(order, Ordering::Greater);
            }
            let mut expected = scores.clone();
            expected.sort_by(|a, b| b.total_cmp(a));
            expected.truncate(limit);
            let kept: Vec<f32> = ranked.iter().map(|m| m.similarity).collect();
            prop_assert_eq!(kept, expected);
        }
    }
}
