//! The offline worker.
//!
//! A worker instance belongs to one deployed version. It pre-caches the
//! static manifest on install, drops stale partitions on activation, and
//! serves intercepted requests network-first (documents) or cache-first with
//! background revalidation (static assets). The [`Registration`] decides
//! which instance controls pages; pages talk to it over [`WorkerHandle`].

pub mod channel;
mod lifecycle;
mod manager;
mod registration;
mod routing;

pub use channel::WorkerHandle;
pub use manager::WorkerSettings;
pub use registration::{Registration, UpdateOutcome};
