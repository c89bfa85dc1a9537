//! The incremental query engine.
//!
//! Every pipeline stage is a memoized query behind a uniform
//! `force(key) → result` interface. The engine tracks the dynamic dependency
//! graph between queries, fingerprints inputs and outputs into 128-bit
//! digests, and reuses on-disk results across sessions via red/green marking.

pub mod cache;
pub mod context;
pub mod deps;
pub mod fingerprint;
pub mod incremental;
pub mod key;
pub mod provider;

pub use cache::{CacheEntry, CacheStats, QueryCache, QueryOutput};
pub use context::{OptionClass, QueryContext, QueryError, QueryOptions, OPTION_CLASSES};
pub use deps::DependencyTracker;
pub use fingerprint::Fingerprint;
pub use incremental::{PrevSessionEntry, QueryColor};
pub use key::{QueryKey, QueryKind};
pub use provider::{Provider, ProviderRegistry};
