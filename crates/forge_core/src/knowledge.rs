//! Knowledge store contract and an in-memory implementation.
//!
//! The store indexes previously generated fragments by a token signature.
//! Search scores every entry with Jaccard similarity between the query
//! signature and the entry signature, drops entries under the minimum
//! similarity, and orders the rest best-match first. Ties are broken by
//! higher success rate, then higher reuse count.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::types::KnowledgeEntry;

/// Words ignored when building signatures.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "the", "with", "for", "of", "to", "in", "on", "that", "this", "is", "it",
    "be", "as", "by", "or", "from", "at", "create", "make", "build", "please", "some", "use",
];

/// Default minimum similarity for a match.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.1;

/// Search filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl SearchFilters {
    pub fn stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    fn accepts(&self, entry: &KnowledgeEntry) -> bool {
        let stack_ok = match (&self.stack, &entry.stack) {
            (Some(wanted), Some(have)) => wanted.eq_ignore_ascii_case(have),
            (Some(_), None) => false,
            (None, _) => true,
        };
        let category_ok = match (&self.category, &entry.category) {
            (Some(wanted), Some(have)) => wanted.eq_ignore_ascii_case(have),
            (Some(_), None) => false,
            (None, _) => true,
        };
        stack_ok && category_ok
    }
}

/// Aggregate counts over a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeStats {
    #[serde(rename = "totalEntries")]
    pub total_entries: usize,
    #[serde(rename = "byKind")]
    pub by_kind: BTreeMap<String, usize>,
}

/// Read contract the generation core needs from a knowledge store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Ranked entries, best match first. Empty when nothing is similar enough.
    async fn search(&self, query: &str, filters: &SearchFilters) -> CoreResult<Vec<KnowledgeEntry>>;

    /// Aggregate statistics.
    async fn stats(&self) -> CoreResult<KnowledgeStats>;
}

/// Build a signature: sorted, deduplicated lowercase tokens without stop words.
pub fn signature_for(text: &str) -> String {
    tokens(text).into_iter().collect::<Vec<_>>().join(" ")
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 1 && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Jaccard similarity of two signatures.
pub fn similarity(a: &str, b: &str) -> f64 {
    let left: BTreeSet<&str> = a.split_whitespace().collect();
    let right: BTreeSet<&str> = b.split_whitespace().collect();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count() as f64;
    let total = left.union(&right).count() as f64;
    shared / total
}

/// In-memory knowledge store.
pub struct InMemoryKnowledgeStore {
    entries: RwLock<Vec<KnowledgeEntry>>,
    min_similarity: f64,
}

impl Default for InMemoryKnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    pub fn with_entries(entries: Vec<KnowledgeEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    pub fn min_similarity(mut self, threshold: f64) -> Self {
        self.min_similarity = threshold;
        self
    }

    /// Load entries from a JSON array file.
    pub fn load_json(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut entries: Vec<KnowledgeEntry> = serde_json::from_str(&content)?;
        for entry in entries.iter_mut().filter(|e| e.signature.is_empty()) {
            entry.signature = signature_for(&entry.description);
        }
        debug!("Loaded {} knowledge entries from {}", entries.len(), path.display());
        Ok(Self::with_entries(entries))
    }

    pub fn insert(&self, entry: KnowledgeEntry) {
        self.entries.write().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn rank(&self, query: &str, filters: &SearchFilters) -> Vec<KnowledgeEntry> {
        let query_signature = signature_for(query);
        let entries = self.entries.read();

        let mut scored: Vec<(f64, &KnowledgeEntry)> = entries
            .iter()
            .filter(|e| filters.accepts(e))
            .map(|e| (similarity(&query_signature, &e.signature), e))
            .filter(|(score, _)| *score >= self.min_similarity && *score > 0.0)
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| b.success_rate.total_cmp(&a.success_rate))
                .then_with(|| b.reuse_count.cmp(&a.reuse_count))
                .then_with(|| a.id.cmp(&b.id))
        });

        scored.into_iter().map(|(_, e)| e.clone()).collect()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn search(&self, query: &str, filters: &SearchFilters) -> CoreResult<Vec<KnowledgeEntry>> {
        let ranked = self.rank(query, filters);
        debug!("Knowledge search matched {} entries", ranked.len());
        Ok(ranked)
    }

    async fn stats(&self) -> CoreResult<KnowledgeStats> {
        let entries = self.entries.read();
        let mut by_kind = BTreeMap::new();
        for entry in entries.iter() {
            *by_kind.entry(entry.code_kind.clone()).or_insert(0) += 1;
        }
        Ok(KnowledgeStats {
            total_entries: entries.len(),
            by_kind,
        })
    }
}

/// Store that is never reachable. Useful when no knowledge base is configured.
pub struct UnavailableKnowledgeStore;

#[async_trait]
impl KnowledgeStore for UnavailableKnowledgeStore {
    async fn search(&self, _query: &str, _filters: &SearchFilters) -> CoreResult<Vec<KnowledgeEntry>> {
        Err(CoreError::KnowledgeUnavailable("no knowledge store configured".to_string()))
    }

    async fn stats(&self) -> CoreResult<KnowledgeStats> {
        Err(CoreError::KnowledgeUnavailable("no knowledge store configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryKnowledgeStore {
        InMemoryKnowledgeStore::with_entries(vec![
            KnowledgeEntry::new("k1", "component", "login form with email and password")
                .with_code("<form></form>")
                .with_stats(4, 0.9)
                .with_stack("react"),
            KnowledgeEntry::new("k2", "component", "navigation bar with dropdown menu")
                .with_stats(10, 0.8)
                .with_stack("react"),
            KnowledgeEntry::new("k3", "service", "password reset email service")
                .with_stats(1, 0.5)
                .with_stack("express"),
        ])
    }

    #[test]
    fn test_signature_is_sorted_and_deduplicated() {
        assert_eq!(signature_for("Login form, login BUTTON"), "button form login");
        assert_eq!(signature_for("create the a"), "");
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("a b", "a b"), 1.0);
        assert_eq!(similarity("a b", "c d"), 0.0);
        assert_eq!(similarity("", "a"), 0.0);
        assert!((similarity("a b", "b c") - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_search_orders_best_match_first() {
        let results = store()
            .search("login form with password", &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results[0].id, "k1");
        assert!(results.iter().all(|e| e.id != "k2"));
    }

    #[tokio::test]
    async fn test_search_empty_below_threshold() {
        let results = store()
            .search("kubernetes helm chart", &SearchFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_filters_by_stack() {
        let filters = SearchFilters::default().stack("express");
        let results = store().search("password email", &filters).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "k3");
    }

    #[tokio::test]
    async fn test_ties_break_on_success_rate_then_reuse() {
        let store = InMemoryKnowledgeStore::with_entries(vec![
            KnowledgeEntry::new("low", "component", "pricing table").with_stats(50, 0.5),
            KnowledgeEntry::new("high", "component", "pricing table").with_stats(1, 0.9),
            KnowledgeEntry::new("reused", "component", "pricing table").with_stats(7, 0.9),
        ]);
        let results = store
            .search("pricing table", &SearchFilters::default())
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["reused", "high", "low"]);
    }

    #[tokio::test]
    async fn test_stats_by_kind() {
        let stats = store().stats().await.unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_kind.get("component"), Some(&2));
        assert_eq!(stats.by_kind.get("service"), Some(&1));
    }
}
