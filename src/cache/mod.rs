//! Versioned cache partitions.
//!
//! This module provides the storage side of the offline worker:
//! - Requests and responses as the worker sees them
//! - A partition registry (create / enumerate / delete / put / lookup)
//! - Tagging of served responses with where they came from

mod storage;
mod types;

pub use storage::{PartitionStore, SqliteStorage};
pub use types::{
  CachedResponse, ClientId, Request, RequestKey, Response, ResponseSource, Served,
};

pub(crate) use storage::parse_datetime;
