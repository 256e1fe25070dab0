//! Node-side counter snapshots.
//!
//! A [`SnapshotEngine`] turns cumulative counters read from a
//! [`CounterSource`] into validated per-interval diffs. The node collector
//! serves one engine per target family and per connection through
//! [`NodeSessionFactory`].

pub mod error;
pub mod source;
pub mod procfs;
pub mod engine;
pub mod service;

pub use engine::SnapshotEngine;
pub use error::SnapshotError;
pub use procfs::{MdtSource, OstSource};
pub use service::{CounterService, NodeInfoService, NodeSessionFactory};
pub use source::{AbsoluteCounters, CounterSource, MemorySource};
