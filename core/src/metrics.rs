use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, Default)]
pub struct HitMiss {
    pub hits: u64,
    pub misses: u64,
}

impl HitMiss {
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f32 / total as f32
    }
}

#[derive(Debug, Clone, Default)]
struct MetricsState {
    agent_cache: HitMiss,
    embed_cache: HitMiss,
    derived_cache: HashMap<String, HitMiss>,
    papers_succeeded: u64,
    papers_failed: u64,
    insights_emitted: u64,
}

/// Process-wide counters. Constructed explicitly and passed down; clones
/// share state.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    state: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_agent_cache(&self, hit: bool) {
        let mut state = self.state.lock().unwrap();
        if hit {
            state.agent_cache.hits += 1;
        } else {
            state.agent_cache.misses += 1;
        }
    }

    pub fn record_embed_cache(&self, hit: bool) {
        let mut state = self.state.lock().unwrap();
        if hit {
            state.embed_cache.hits += 1;
        } else {
            state.embed_cache.misses += 1;
        }
    }

    pub fn record_derived_cache(&self, artifact_type: &str, hit: bool) {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .derived_cache
            .entry(artifact_type.to_string())
            .or_default();
        if hit {
            entry.hits += 1;
        } else {
            entry.misses += 1;
        }
    }

    pub fn record_paper(&self, success: bool) {
        let mut state = self.state.lock().unwrap();
        if success {
            state.papers_succeeded += 1;
        } else {
            state.papers_failed += 1;
        }
    }

    pub fn record_insights(&self, count: u64) {
        self.state.lock().unwrap().insights_emitted += count;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap();
        let mut derived: Vec<(String, HitMiss)> = state
            .derived_cache
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        derived.sort_by(|a, b| a.0.cmp(&b.0));

        MetricsSnapshot {
            agent_cache: state.agent_cache,
            embed_cache: state.embed_cache,
            derived_cache: derived,
            papers_succeeded: state.papers_succeeded,
            papers_failed: state.papers_failed,
            insights_emitted: state.insights_emitted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub agent_cache: HitMiss,
    pub embed_cache: HitMiss,
    pub derived_cache: Vec<(String, HitMiss)>,
    pub papers_succeeded: u64,
    pub papers_failed: u64,
    pub insights_emitted: u64,
}
