//! Rebate resolution and computation engine for a purchasing
//! cooperative.
//!
//! Pipeline: raw purchase rows -> aggregation -> per-entity rebate
//! calculation (contract resolution + overrides + tier evaluation) ->
//! cooperative-wide consolidation and opportunity analysis. All
//! computation is synchronous and in-memory; the only I/O lives in the
//! catalog store.

pub mod aggregation;
pub mod calculator;
pub mod catalog;
pub mod dataset;
pub mod error;
pub mod fields;
pub mod opportunity;
pub mod recap;
pub mod resolver;
pub mod seed;
pub mod store;
pub mod tier;
pub mod types;

pub use error::{DataIntegrityWarning, RfaError, RfaResult};
pub use fields::FieldCatalog;
pub use store::CatalogStore;
