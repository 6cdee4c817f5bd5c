//! Semantic deduplication: greedy nearest-representative filtering over
//! record embeddings. A single forward pass in batch order keeps a record
//! iff no already-kept record's embedding lies within the distance
//! threshold; earlier records always win over later near-duplicates.

pub mod embed;
pub mod index;

use tracing::{debug, info};

use crate::error::Result;
use crate::record::RecordBatch;

pub use embed::{CachedEmbedder, EmbeddingProvider, HashingEmbedder, HttpEmbedder};
pub use index::{cosine_distance, SimilarityIndex};

/// Result of one dedup pass: the kept subsequence plus the dropped records,
/// both in original order. Dropped records are returned untouched; no field
/// merging with their representative ever happens.
#[derive(Debug)]
pub struct DedupOutcome {
    pub kept: RecordBatch,
    pub dropped: RecordBatch,
}

/// Drives one dedup invocation: embeds the configured field for every
/// record, then runs the greedy filter. The similarity index lives and dies
/// inside `dedup`; nothing persists across invocations.
pub struct Deduplicator<'a> {
    provider: &'a dyn EmbeddingProvider,
    field: &'a str,
    threshold: f32,
}

impl<'a> Deduplicator<'a> {
    pub fn new(provider: &'a dyn EmbeddingProvider, field: &'a str, threshold: f32) -> Self {
        Self {
            provider,
            field,
            threshold,
        }
    }

    pub async fn dedup(&self, batch: RecordBatch) -> Result<DedupOutcome> {
        if batch.is_empty() {
            return Ok(DedupOutcome {
                kept: Vec::new(),
                dropped: Vec::new(),
            });
        }

        // Embedding is the batched (and freely parallelizable) phase; a
        // record with a missing or empty dedup field fails the stage here,
        // before any keep/drop decision is made.
        let texts: Vec<String> = batch
            .iter()
            .enumerate()
            .map(|(position, record)| {
                record
                    .require_text(self.field, position)
                    .map(str::to_string)
            })
            .collect::<Result<_>>()?;
        let mut vectors = self.provider.embed_batch(&texts).await?;
        for vector in &mut vectors {
            embed::normalize(vector);
        }

        Ok(greedy_filter(batch, vectors, self.threshold))
    }
}

/// The sequential decision phase. Must visit records in original batch
/// order: ordering is the tie-break that makes output deterministic.
pub fn greedy_filter(batch: RecordBatch, vectors: Vec<Vec<f32>>, threshold: f32) -> DedupOutcome {
    debug_assert_eq!(batch.len(), vectors.len());
    let total = batch.len();
    let mut index = SimilarityIndex::new();
    let mut kept = Vec::new();
    let mut dropped = Vec::new();

    for (position, (record, vector)) in batch.into_iter().zip(vectors).enumerate() {
        match index.nearest(&vector) {
            Some((representative, distance)) if distance <= threshold => {
                debug!(position, representative, distance, "dropping near-duplicate");
                dropped.push(record);
            }
            _ => {
                index.insert(vector);
                kept.push(record);
            }
        }
    }

    info!(
        total,
        kept = kept.len(),
        dropped = dropped.len(),
        "dedup pass complete"
    );
    DedupOutcome { kept, dropped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    /// Maps exact texts to fixed vectors; panics on unknown text so tests
    /// stay honest about their fixtures.
    struct StaticEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    impl StaticEmbedder {
        fn new(entries: &[(&str, &[f32])]) -> Self {
            Self {
                table: entries
                    .iter()
                    .map(|(t, v)| (t.to_string(), v.to_vec()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StaticEmbedder {
        fn model_name(&self) -> &str {
            "static"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| self.table[t].clone()).collect())
        }
    }

    fn batch_of(texts: &[&str]) -> RecordBatch {
        texts
            .iter()
            .map(|t| Record::from_value(json!({"text": t}), 0).unwrap())
            .collect()
    }

    fn texts_of(batch: &RecordBatch) -> Vec<&str> {
        batch.iter().map(|r| r.text("text").unwrap()).collect()
    }

    // Scenario: records 1 and 2 near-identical, record 3 distinct; earliest
    // representative wins.
    fn three_record_embedder() -> StaticEmbedder {
        StaticEmbedder::new(&[
            ("alpha", &[1.0, 0.0]),
            ("alpha variant", &[0.999, 0.0447]),
            ("omega", &[0.0, 1.0]),
        ])
    }

    #[tokio::test]
    async fn near_duplicates_collapse_to_earliest() {
        let embedder = three_record_embedder();
        let dedup = Deduplicator::new(&embedder, "text", 0.2);
        let outcome = dedup
            .dedup(batch_of(&["alpha", "alpha variant", "omega"]))
            .await
            .unwrap();
        assert_eq!(texts_of(&outcome.kept), vec!["alpha", "omega"]);
        assert_eq!(texts_of(&outcome.dropped), vec!["alpha variant"]);
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_result() {
        let embedder = StaticEmbedder::new(&[]);
        let dedup = Deduplicator::new(&embedder, "text", 0.2);
        let outcome = dedup.dedup(Vec::new()).await.unwrap();
        assert!(outcome.kept.is_empty());
        assert!(outcome.dropped.is_empty());
    }

    #[tokio::test]
    async fn zero_threshold_drops_only_exact_matches() {
        let embedder = StaticEmbedder::new(&[
            ("a", &[1.0, 0.0]),
            ("b", &[1.0, 0.0]),
            ("c", &[0.999, 0.0447]),
        ]);
        let dedup = Deduplicator::new(&embedder, "text", 0.0);
        let outcome = dedup.dedup(batch_of(&["a", "b", "c"])).await.unwrap();
        // b shares a's exact vector and collapses; c is merely near and stays
        assert_eq!(texts_of(&outcome.kept), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn max_threshold_collapses_everything_to_first() {
        let embedder = three_record_embedder();
        let dedup = Deduplicator::new(&embedder, "text", 2.0);
        let outcome = dedup
            .dedup(batch_of(&["alpha", "alpha variant", "omega"]))
            .await
            .unwrap();
        assert_eq!(texts_of(&outcome.kept), vec!["alpha"]);
    }

    #[tokio::test]
    async fn dedup_is_idempotent() {
        let embedder = three_record_embedder();
        let dedup = Deduplicator::new(&embedder, "text", 0.2);
        let once = dedup
            .dedup(batch_of(&["alpha", "alpha variant", "omega"]))
            .await
            .unwrap();
        let twice = dedup.dedup(once.kept.clone()).await.unwrap();
        assert_eq!(once.kept, twice.kept);
        assert!(twice.dropped.is_empty());
    }

    #[tokio::test]
    async fn looser_threshold_keeps_no_more_records() {
        let embedder = three_record_embedder();
        let batch = || batch_of(&["alpha", "alpha variant", "omega"]);
        let mut previous = usize::MAX;
        for threshold in [0.0, 0.2, 1.0, 2.0] {
            let dedup = Deduplicator::new(&embedder, "text", threshold);
            let kept = dedup.dedup(batch()).await.unwrap().kept.len();
            assert!(kept <= previous, "threshold {threshold} kept {kept}");
            previous = kept;
        }
    }

    #[tokio::test]
    async fn output_is_deterministic_across_runs() {
        let embedder = three_record_embedder();
        let dedup = Deduplicator::new(&embedder, "text", 0.2);
        let a = dedup
            .dedup(batch_of(&["alpha", "alpha variant", "omega"]))
            .await
            .unwrap();
        let b = dedup
            .dedup(batch_of(&["alpha", "alpha variant", "omega"]))
            .await
            .unwrap();
        assert_eq!(a.kept, b.kept);
        assert_eq!(a.dropped, b.dropped);
    }

    #[tokio::test]
    async fn kept_records_form_an_ordered_subsequence() {
        let embedder = StaticEmbedder::new(&[
            ("one", &[1.0, 0.0, 0.0]),
            ("two", &[0.0, 1.0, 0.0]),
            ("one again", &[1.0, 0.0, 0.0]),
            ("three", &[0.0, 0.0, 1.0]),
        ]);
        let dedup = Deduplicator::new(&embedder, "text", 0.1);
        let outcome = dedup
            .dedup(batch_of(&["one", "two", "one again", "three"]))
            .await
            .unwrap();
        assert_eq!(texts_of(&outcome.kept), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn missing_field_fails_with_record_position() {
        let embedder = three_record_embedder();
        let dedup = Deduplicator::new(&embedder, "text", 0.2);
        let mut batch = batch_of(&["alpha"]);
        batch.push(Record::from_value(json!({"other": "field"}), 0).unwrap());
        let err = dedup.dedup(batch).await.unwrap_err();
        match err {
            crate::error::PipelineError::Data { position, .. } => assert_eq!(position, 1),
            other => panic!("unexpected error: {other}"),
        }
    }
}
