//! Persistent disk tier.
//!
//! - [`store`]: content-addressed file store
//! - [`metadata`]: out-of-band per-entry metadata
//! - [`eviction`]: LRU eviction under size and age budgets

pub mod eviction;
pub mod metadata;
pub mod store;

pub use eviction::{
    EvictionBudget, EvictionCandidate, EvictionPlan, EvictionPlanner, EvictionResult,
    DEFAULT_TRIM_RATIO,
};
pub use metadata::{Metadata, MetadataBackend, MetadataMode, MetadataStore, METADATA_ATTRIBUTE};
pub use store::{DiskEntry, DiskStore, DiskStoreOptions, Entries, EntryFields};
