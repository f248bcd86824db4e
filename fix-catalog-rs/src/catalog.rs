// fix-catalog-rs/src/catalog.rs
// Insertion-ordered catalog of fix patterns.

use std::sync::{Arc, RwLock};

use remedy_types::FixPattern;

/// Errors raised by catalog mutation.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("pattern {0} already present in catalog")]
    DuplicateId(String),

    #[error("pattern {id} has invalid match expression: {source}")]
    InvalidExpression {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern {id} has confidence {confidence}, expected [0, 1]")]
    InvalidConfidence { id: String, confidence: f64 },

    #[error("pattern {0} not found")]
    NotFound(String),
}

/// A catalog entry after insertion-time validation.
///
/// Kept behind `Arc` so matcher results stay valid even if the entry is
/// later removed from the catalog.
#[derive(Debug)]
pub struct CompiledPattern {
    pub pattern: FixPattern,
}

/// Mutable, insertion-ordered fix catalog.
///
/// Ties in the matcher's ranking break by insertion order, so `Vec` is
/// the natural backing store; id lookups scan, which is fine at catalog
/// scale (tens to hundreds of entries).
#[derive(Debug, Default)]
pub struct FixCatalog {
    entries: RwLock<Vec<Arc<CompiledPattern>>>,
}

impl FixCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a pattern. Duplicate ids, invalid regexes, and
    /// out-of-range confidence values are rejected up front.
    pub fn add(&self, pattern: FixPattern) -> Result<(), CatalogError> {
        if !(0.0..=1.0).contains(&pattern.confidence) {
            return Err(CatalogError::InvalidConfidence {
                id: pattern.id.clone(),
                confidence: pattern.confidence,
            });
        }
        for rule in &pattern.match_rules {
            rule.validate().map_err(|source| CatalogError::InvalidExpression {
                id: pattern.id.clone(),
                source,
            })?;
        }

        let mut entries = self.entries.write().expect("catalog lock poisoned");
        if entries.iter().any(|e| e.pattern.id == pattern.id) {
            return Err(CatalogError::DuplicateId(pattern.id));
        }

        tracing::debug!(pattern.id = %pattern.id, pattern.name = %pattern.name, "catalog add");
        entries.push(Arc::new(CompiledPattern { pattern }));
        Ok(())
    }

    /// Remove a pattern by id. In-flight attempts holding an Arc to the
    /// entry are unaffected.
    pub fn remove(&self, id: &str) -> Result<(), CatalogError> {
        let mut entries = self.entries.write().expect("catalog lock poisoned");
        let before = entries.len();
        entries.retain(|e| e.pattern.id != id);
        if entries.len() == before {
            return Err(CatalogError::NotFound(id.to_string()));
        }
        tracing::debug!(pattern.id = %id, "catalog remove");
        Ok(())
    }

    /// Snapshot of all entries in insertion order.
    pub fn list(&self) -> Vec<Arc<CompiledPattern>> {
        self.entries
            .read()
            .expect("catalog lock poisoned")
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<CompiledPattern>> {
        self.entries
            .read()
            .expect("catalog lock poisoned")
            .iter()
            .find(|e| e.pattern.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("catalog lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
