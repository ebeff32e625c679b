//! Snapshot normalization: resolve columns, enrich rows, then page, aggregate and
//! look up over the enriched table.

pub mod aggregate;
pub mod enrich;
pub mod error;
pub mod lookup;
pub mod paginate;
pub mod schema;

pub use error::PipelineError;
