//! Live Sports Data Ingest (spec §4.A) — periodic polling of external sports
//! providers, atomic file-store refinement, and the cached read API mode
//! resolvers consult to compute baselines and outcomes.

pub mod circuit_breaker;
pub mod provider;
pub mod refine;
pub mod store;
pub mod types;

pub use provider::{BreakerGuardedClient, HttpProviderClient, ProviderClient};
pub use store::LiveDataStore;
pub use types::{RefinedGameDoc, STATUS_FINAL, STATUS_IN_PROGRESS, STATUS_SCHEDULED};
