// fix-catalog-rs/src/matcher.rs
// Scoring and ranking of catalog entries against a detected error.

use std::sync::Arc;

use remedy_types::{DetectedError, Field};

use crate::catalog::{CompiledPattern, FixCatalog};

/// One ranked candidate produced by [`Matcher::find_candidates`].
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub pattern: Arc<CompiledPattern>,
    /// Raw additive score before confidence weighting.
    pub score: u32,
    /// Ranking key: `score * confidence`.
    pub weight: f64,
}

/// Scores catalog entries against detected errors.
///
/// The matcher only proposes a ranked list; no candidate is "correct" by
/// construction. The orchestrator tries candidates in order until one
/// survives validation or the list is exhausted.
pub struct Matcher {
    catalog: Arc<FixCatalog>,
}

const CATEGORY_POINTS: u32 = 3;
const SEVERITY_POINTS: u32 = 2;
const MESSAGE_HIT_POINTS: u32 = 5;
const TRACE_HIT_POINTS: u32 = 2;

impl Matcher {
    pub fn new(catalog: Arc<FixCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<FixCatalog> {
        &self.catalog
    }

    /// Rank every catalog entry against `error`, highest likelihood
    /// first. Entries scoring zero are excluded. The ranking key is
    /// `score * confidence`, which rewards a high-confidence pattern at
    /// moderate raw score over a low-confidence pattern with a single
    /// strong hit. Ties keep catalog insertion order (stable sort).
    pub fn find_candidates(&self, error: &DetectedError) -> Vec<RankedCandidate> {
        let mut candidates: Vec<RankedCandidate> = self
            .catalog
            .list()
            .into_iter()
            .filter_map(|entry| {
                let score = score_pattern(&entry, error);
                if score == 0 {
                    return None;
                }
                let weight = f64::from(score) * entry.pattern.confidence;
                Some(RankedCandidate {
                    pattern: entry,
                    score,
                    weight,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(
            error.id = %error.id,
            candidate_count = candidates.len(),
            "matcher ranked candidates"
        );

        candidates
    }
}

fn score_pattern(entry: &CompiledPattern, error: &DetectedError) -> u32 {
    let pattern = &entry.pattern;
    let mut score = 0;

    if pattern.categories.contains(&error.category) {
        score += CATEGORY_POINTS;
    }
    if pattern.severities.contains(&error.severity) {
        score += SEVERITY_POINTS;
    }

    for rule in &pattern.match_rules {
        if !rule.matches(error) {
            continue;
        }
        score += match rule.primary_field() {
            Field::Message => MESSAGE_HIT_POINTS,
            Field::Trace => TRACE_HIT_POINTS,
        };
    }

    score
}
