//! Telemetry entities persisted by the collector.
//!
//! Each entity declares its identity, its per-field merge rules and the
//! dimension lookups it uses for enrichment. [`catalog`] lists the default
//! worker registration of every entity.

pub mod catalog;
mod node;
mod register;
mod service;
mod trace;

pub use catalog::{CatalogEntry, CATALOG};
pub use node::{ApplicationTopology, NodeMapping};
pub use register::Instance;
pub use service::ServiceReferenceMetric;
pub use trace::GlobalTrace;

/// Cache namespace resolving application ids to application codes.
pub const APPLICATION_NAMESPACE: &str = "application";
