// fix-catalog-rs/src/lib.rs
// Runtime-mutable fix catalog and the candidate matcher.
//
// Design notes:
// - The catalog is an explicit object owned by its pipeline, never a
//   process-wide singleton, so independent pipelines can run with
//   different catalogs in one process.
// - Entries are compiled (regexes validated) at insertion and handed out
//   as Arc snapshots; catalog mutation never affects in-flight attempts.
// - Locks are plain std RwLocks held only for the duration of a
//   synchronous operation, never across an await point.

mod catalog;
mod matcher;

#[cfg(test)]
mod tests;

pub use catalog::{CatalogError, CompiledPattern, FixCatalog};
pub use matcher::{Matcher, RankedCandidate};
