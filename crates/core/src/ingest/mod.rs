pub mod file;
pub mod nse;
pub mod provider;
pub mod types;

pub use provider::{provider_from_settings, SnapshotProvider};
pub use types::{RawRecord, RawSnapshot, RawValue};
