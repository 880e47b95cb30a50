//! Entity Resolver
//!
//! Pairs free-text entity names that denote the same thing across two
//! systems ("ACME Corp." / "Acme Corporation"). The `EntityMatcher`
//! capability is asked first; when it is unavailable a Jaro-Winkler
//! pairing over normalized names is used instead.

use crate::capability::{bounded, EntityMatcher, EntityPair};
use crate::observability::redact;
use crate::similarity::normalize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct EntityResolver {
    matcher: Arc<dyn EntityMatcher>,
    timeout: Duration,
    threshold: f64,
}

impl EntityResolver {
    pub fn new(matcher: Arc<dyn EntityMatcher>, timeout: Duration, threshold: f64) -> Self {
        Self {
            matcher,
            timeout,
            threshold,
        }
    }

    pub async fn resolve(&self, entities: &[String]) -> Vec<EntityPair> {
        if entities.is_empty() {
            return Vec::new();
        }
        let known: HashSet<&str> = entities.iter().map(String::as_str).collect();
        match bounded(self.timeout, self.matcher.resolve_entities(entities)).await {
            Ok(pairs) => {
                let pairs: Vec<EntityPair> = pairs
                    .into_iter()
                    .filter(|p| known.contains(p.left.as_str()) && known.contains(p.right.as_str()))
                    .collect();
                info!("Resolved {} entity pairs", pairs.len());
                pairs
            }
            Err(e) => {
                warn!(
                    "Entity matcher unavailable, falling back to Jaro-Winkler: {}",
                    redact(&e.to_string())
                );
                deterministic_pairs(entities, self.threshold)
            }
        }
    }
}

/// Greedy pairing: each entity joins at most one pair, best partner first.
pub fn deterministic_pairs(entities: &[String], threshold: f64) -> Vec<EntityPair> {
    let normalized: Vec<String> = entities.iter().map(|e| normalize(e)).collect();
    let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
    for i in 0..entities.len() {
        for j in (i + 1)..entities.len() {
            if normalized[i] == normalized[j] && entities[i] == entities[j] {
                continue;
            }
            let score = strsim::jaro_winkler(&normalized[i], &normalized[j]);
            if score >= threshold {
                candidates.push((i, j, score));
            }
        }
    }
    // Highest score first; index order breaks ties so output is stable.
    candidates.sort_by(|x, y| y.2.total_cmp(&x.2).then(x.0.cmp(&y.0)).then(x.1.cmp(&y.1)));

    let mut used: HashSet<usize> = HashSet::new();
    let mut pairs = Vec::new();
    for (i, j, score) in candidates {
        if used.contains(&i) || used.contains(&j) {
            continue;
        }
        used.insert(i);
        used.insert(j);
        pairs.push(EntityPair {
            left: entities[i].clone(),
            right: entities[j].clone(),
            confidence: score,
        });
    }
    pairs
}
