use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::IntentAnalysis;

struct CachedAnalysis {
    analysis: IntentAnalysis,
    inserted_at: Instant,
}

/// Short-lived cache of intent analyses keyed by a normalized prefix of the
/// request text.
pub struct AnalysisCache {
    entries: DashMap<String, CachedAnalysis>,
    ttl: Duration,
    key_chars: usize,
}

impl AnalysisCache {
    pub fn new(ttl: Duration, key_chars: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            key_chars: key_chars.max(1),
        }
    }

    /// Lowercased, whitespace-collapsed, truncated to `key_chars` characters.
    pub fn key_for(&self, content: &str) -> String {
        content
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
            .chars()
            .take(self.key_chars)
            .collect()
    }

    /// Live entry for `content`; an expired entry is removed on the way out.
    pub fn get(&self, content: &str) -> Option<IntentAnalysis> {
        let key = self.key_for(content);
        match self.entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                return Some(entry.analysis.clone());
            }
            Some(_) => {}
            None => return None,
        }
        // The read guard is released before taking the shard write lock.
        self.entries
            .remove_if(&key, |_, cached| cached.inserted_at.elapsed() >= self.ttl);
        None
    }

    pub fn insert(&self, content: &str, analysis: IntentAnalysis) {
        self.entries.insert(
            self.key_for(content),
            CachedAnalysis {
                analysis,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, cached| cached.inserted_at.elapsed() < self.ttl);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "swept expired intent analyses");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
