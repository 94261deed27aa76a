//! autotick-lib: state and scheduling for automated feedstock maintenance
//!
//! The crate keeps one document per feedstock in a sharded, multi-backend store,
//! derives the dependency graph between feedstocks from their recipes, and runs
//! migrations over that graph:
//! - `store`: documents, backends and the scoped write path
//! - `graph`: node documents, the output lookup table and build order
//! - `migration`: the migration variants, their fingerprints and effective graphs
//! - `schedule`: opens at most one proposal per node and fingerprint
//! - `reconcile`: follows opened proposals until they close
//! - `deploy` / `snapshot`: publishing and preserving store state

pub mod config;
pub mod consts;
pub mod deploy;
pub mod forge;
pub mod git;
pub mod graph;
pub mod locks;
pub mod migration;
pub mod paths;
pub mod reconcile;
pub mod runner;
pub mod schedule;
pub mod snapshot;
pub mod store;
pub mod testing;
pub mod util;
