use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::model::RawArtifacts;
use crate::view::ComposeConfig;
use crate::view::compose::{VIEW_MODEL_VERSION, ViewModel, compose_view_model};
use crate::view::trust::TRUST_RULESET_VERSION;

pub fn fingerprint(raw: &RawArtifacts, config: &ComposeConfig) -> String {
    let mut hasher = Sha256::new();
    let manifest = raw.manifest.as_ref().map(ToString::to_string);
    let governed_report = raw.governed_report.as_ref().map(ToString::to_string);

    let parts: [&str; 8] = [
        VIEW_MODEL_VERSION,
        TRUST_RULESET_VERSION,
        &raw.narrative,
        &raw.analytics.to_string(),
        &raw.diagnostics.to_string(),
        manifest.as_deref().unwrap_or("<absent>"),
        governed_report.as_deref().unwrap_or("<absent>"),
        &format!("{config:?}"),
    ];
    // Length-prefixed so adjacent fields cannot run into each other.
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
pub struct ViewModelMemo {
    capacity: usize,
    entries: HashMap<String, Arc<ViewModel>>,
    recency: VecDeque<String>,
    stats: MemoStats,
}

impl ViewModelMemo {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
            stats: MemoStats::default(),
        }
    }

    pub fn get_or_compose(&mut self, raw: &RawArtifacts, config: &ComposeConfig) -> Arc<ViewModel> {
        let key = fingerprint(raw, config);

        if let Some(model) = self.entries.get(&key).cloned() {
            self.stats.hits += 1;
            self.touch(&key);
            debug!(fingerprint = %key, "view model memo hit");
            return model;
        }

        self.stats.misses += 1;
        let model = Arc::new(compose_view_model(raw, config));
        self.entries.insert(key.clone(), Arc::clone(&model));
        self.recency.push_back(key);

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.recency.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            self.stats.evictions += 1;
        }

        model
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> MemoStats {
        self.stats
    }

    fn touch(&mut self, key: &str) {
        if let Some(position) = self.recency.iter().position(|entry| entry == key) {
            if let Some(entry) = self.recency.remove(position) {
                self.recency.push_back(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(narrative: &str) -> RawArtifacts {
        RawArtifacts {
            narrative: narrative.to_string(),
            analytics: json!({}),
            diagnostics: json!({}),
            manifest: Some(json!({"render_policy": {"allow_report": true}})),
            governed_report: None,
        }
    }

    #[test]
    fn fingerprint_tracks_inputs_and_config() {
        let config = ComposeConfig::default();
        let base = fingerprint(&raw("## A\nbody"), &config);

        assert_eq!(base, fingerprint(&raw("## A\nbody"), &config));
        assert_ne!(base, fingerprint(&raw("## A\nbody!"), &config));
        assert_ne!(
            base,
            fingerprint(
                &raw("## A\nbody"),
                &ComposeConfig {
                    primary_limit: 1,
                    ..config
                }
            )
        );

        let mut without_manifest = raw("## A\nbody");
        without_manifest.manifest = None;
        assert_ne!(base, fingerprint(&without_manifest, &config));
    }

    #[test]
    fn hit_returns_the_same_allocation() {
        let mut memo = ViewModelMemo::new(4);
        let config = ComposeConfig::default();

        let first = memo.get_or_compose(&raw("## A\nbody"), &config);
        let second = memo.get_or_compose(&raw("## A\nbody"), &config);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(memo.stats().hits, 1);
        assert_eq!(memo.stats().misses, 1);
        assert_eq!(first.fingerprint(), fingerprint(&raw("## A\nbody"), &config));
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let mut memo = ViewModelMemo::new(2);
        let config = ComposeConfig::default();

        let a = memo.get_or_compose(&raw("## A"), &config);
        memo.get_or_compose(&raw("## B"), &config);
        memo.get_or_compose(&raw("## A"), &config);
        memo.get_or_compose(&raw("## C"), &config);

        assert_eq!(memo.len(), 2);
        assert_eq!(memo.stats().evictions, 1);
        let a_again = memo.get_or_compose(&raw("## A"), &config);
        assert!(Arc::ptr_eq(&a, &a_again));

        memo.get_or_compose(&raw("## B"), &config);
        assert_eq!(memo.stats().misses, 4);
    }
}
