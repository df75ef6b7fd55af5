//! Property-based tests for research components using proptest.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use quarry_core::config::{CostModel, CuratorConfig, ResearchConfig};
use quarry_core::embeddings::LocalEmbedder;
use quarry_core::research::{
    Aggregator, ContextCurator, CostMeter, EmbeddingScorer, FetchStatus, ScrapedDocument,
    chunk_text, normalize_text, normalize_url,
};

fn curator(threshold: f32, budget: usize, chunk_size: usize) -> ContextCurator {
    ContextCurator::new(
        Arc::new(EmbeddingScorer::new(Arc::new(LocalEmbedder::new(64)))),
        &ResearchConfig {
            similarity_threshold: threshold,
            context_char_budget: budget,
            ..Default::default()
        },
        &CuratorConfig {
            chunk_size,
            min_chunk_chars: 1,
        },
    )
}

fn documents(texts: &[String]) -> Vec<ScrapedDocument> {
    texts
        .iter()
        .enumerate()
        .map(|(rank, text)| ScrapedDocument {
            url: format!("https://doc{rank}.example/"),
            title: format!("Doc {rank}"),
            raw_text: text.clone(),
            images: vec![],
            fetch_status: FetchStatus::Fetched,
            rank,
        })
        .collect()
}

fn prose() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{2,8}( [a-z]{2,8}){3,12}[.!?]", 1..8)
        .prop_map(|sentences| sentences.join(" "))
}

// --- Curation properties ---

proptest! {
    #[test]
    fn curation_is_deterministic(
        texts in prop::collection::vec(prose(), 1..6),
        query in "[a-z]{2,8}( [a-z]{2,8}){0,3}",
        threshold in 0.0f32..0.6,
        budget in 50usize..2_000,
    ) {
        let curator = curator(threshold, budget, 120);
        let docs = documents(&texts);
        let (first, second) = tokio_test::block_on(async {
            let meter = CostMeter::default();
            let first = curator.filter(&docs, &query, &meter).await;
            let second = curator.filter(&docs, &query, &meter).await;
            (first, second)
        });
        prop_assert_eq!(first, second);
    }

    #[test]
    fn curation_respects_threshold_order_and_budget(
        texts in prop::collection::vec(prose(), 1..6),
        query in "[a-z]{2,8}( [a-z]{2,8}){0,3}",
        threshold in 0.0f32..0.6,
        budget in 50usize..2_000,
    ) {
        let curator = curator(threshold, budget, 120);
        let docs = documents(&texts);
        let chunks = tokio_test::block_on(curator.filter(&docs, &query, &CostMeter::default()));

        let used: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
        prop_assert!(used <= budget);
        prop_assert!(chunks.iter().all(|c| c.score >= threshold && c.score > 0.0));
        prop_assert!(chunks.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn chunks_fit_size_and_minimum(
        text in prose(),
        chunk_size in 10usize..300,
        min_chars in 0usize..20,
    ) {
        for chunk in chunk_text(&text, chunk_size, min_chars) {
            let len = chunk.chars().count();
            prop_assert!(len <= chunk_size, "chunk of {} > {}", len, chunk_size);
            prop_assert!(len >= min_chars);
        }
    }

    #[test]
    fn chunking_keeps_every_word(text in prose()) {
        let chunks = chunk_text(&text, 10_000, 0);
        let rejoined = chunks.join(" ");
        let original: Vec<&str> = text.split_whitespace().collect();
        let after: Vec<&str> = rejoined.split_whitespace().collect();
        prop_assert_eq!(original, after);
    }
}

// --- Dedup properties ---

proptest! {
    #[test]
    fn claimed_urls_are_unique_across_claims(
        batches in prop::collection::vec(
            prop::collection::vec(
                ("[a-c]", "[a-c]{0,2}", prop::bool::ANY, prop::bool::ANY),
                0..6,
            ),
            1..6,
        ),
    ) {
        let aggregator = Aggregator::new("q", CostModel::default());
        let mut all_claimed = Vec::new();
        let mut expected = HashSet::new();
        for batch in &batches {
            let urls: Vec<String> = batch
                .iter()
                .map(|(host, path, slash, fragment)| {
                    let mut url = format!("https://{host}.example/{path}");
                    if *slash && !path.is_empty() {
                        url.push('/');
                    }
                    if *fragment {
                        url.push_str("#top");
                    }
                    url
                })
                .collect();
            expected.extend(urls.iter().map(|u| normalize_url(u)));
            all_claimed.extend(aggregator.claim_urls(&urls));
        }

        let unique: HashSet<String> = all_claimed.iter().map(|u| normalize_url(u)).collect();
        prop_assert_eq!(unique.len(), all_claimed.len());
        prop_assert_eq!(unique.len(), expected.len());
        prop_assert_eq!(aggregator.visited_count(), expected.len());
    }

    #[test]
    fn normalize_url_is_idempotent(
        host in "[a-z]{1,10}",
        path in "(/[a-z0-9]{1,5}){0,3}/?",
        fragment in prop::option::of("[a-z]{1,5}"),
    ) {
        let mut url = format!("https://{host}.example{path}");
        if let Some(f) = fragment {
            url.push('#');
            url.push_str(&f);
        }
        let once = normalize_url(&url);
        prop_assert_eq!(normalize_url(&once), once.clone());
        prop_assert!(!once.contains('#'));
    }

    #[test]
    fn normalize_text_is_idempotent(text in "[A-Za-z ,.?!]{0,40}") {
        let once = normalize_text(&text);
        prop_assert_eq!(normalize_text(&once), once);
    }
}
