// remedy-types-rs/src/rules.rs
// Closed match-expression grammar for fix patterns.
//
// Patterns match errors through a small, auditable expression language:
// field selectors over the error's message/trace text, three comparison
// forms, and boolean combinators. Expressions are plain data (serde
// records); evaluation is a trivial interpreter. There is deliberately no
// dynamic code execution anywhere in the rule surface.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::DetectedError;

/// Which text field of the error an expression inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Message,
    Trace,
}

/// One match expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MatchExpr {
    Contains { field: Field, needle: String },
    Equals { field: Field, value: String },
    Regex { field: Field, pattern: String },
    All { exprs: Vec<MatchExpr> },
    Any { exprs: Vec<MatchExpr> },
    Not { expr: Box<MatchExpr> },
}

impl MatchExpr {
    /// Validate every regex in the expression tree. Called when a pattern
    /// is added to the catalog so a bad pattern is rejected up front
    /// instead of silently never matching.
    pub fn validate(&self) -> Result<(), regex::Error> {
        match self {
            MatchExpr::Contains { .. } | MatchExpr::Equals { .. } => Ok(()),
            MatchExpr::Regex { pattern, .. } => Regex::new(pattern).map(|_| ()),
            MatchExpr::All { exprs } | MatchExpr::Any { exprs } => {
                exprs.iter().try_for_each(MatchExpr::validate)
            }
            MatchExpr::Not { expr } => expr.validate(),
        }
    }

    /// The outermost field this expression inspects.
    ///
    /// Mixed-field combinators count as `Message` for scoring purposes;
    /// catalog authors who want distinct message/trace weights write
    /// separate top-level expressions.
    pub fn primary_field(&self) -> Field {
        match self {
            MatchExpr::Contains { field, .. }
            | MatchExpr::Equals { field, .. }
            | MatchExpr::Regex { field, .. } => *field,
            MatchExpr::All { exprs } | MatchExpr::Any { exprs } => exprs
                .first()
                .map(MatchExpr::primary_field)
                .unwrap_or(Field::Message),
            MatchExpr::Not { expr } => expr.primary_field(),
        }
    }

    /// Evaluate against a detected error. A `Trace` selector on an error
    /// without trace text evaluates to false.
    pub fn matches(&self, error: &DetectedError) -> bool {
        match self {
            MatchExpr::Contains { field, needle } => {
                field_text(error, *field).is_some_and(|t| t.contains(needle.as_str()))
            }
            MatchExpr::Equals { field, value } => {
                field_text(error, *field).is_some_and(|t| t == value.as_str())
            }
            MatchExpr::Regex { field, pattern } => match Regex::new(pattern) {
                Ok(re) => field_text(error, *field).is_some_and(|t| re.is_match(t)),
                Err(err) => {
                    // Validated at catalog insertion; reaching this means a
                    // hand-built expression bypassed validation.
                    tracing::warn!(pattern = %pattern, error = %err, "invalid match regex");
                    false
                }
            },
            MatchExpr::All { exprs } => {
                !exprs.is_empty() && exprs.iter().all(|e| e.matches(error))
            }
            MatchExpr::Any { exprs } => exprs.iter().any(|e| e.matches(error)),
            MatchExpr::Not { expr } => !expr.matches(error),
        }
    }
}

fn field_text(error: &DetectedError, field: Field) -> Option<&str> {
    match field {
        Field::Message => Some(error.message.as_str()),
        Field::Trace => error.trace.as_deref(),
    }
}
