//! The central aggregating process.
//!
//! Per monitored node a [`NodeReader`](pipeline::NodeReader) pulls diffs
//! through a [`ProtocolClient`](client::ProtocolClient) whenever the
//! [`Scheduler`](scheduler::Scheduler) releases it, stamps them with an
//! aligned timestamp and pushes them into a bounded queue. The matching
//! [`NodeWriter`](pipeline::NodeWriter) turns them into documents and hands
//! them to the configured [`SamplePersister`](persist::SamplePersister).

pub mod config;
pub mod error;
pub mod client;
pub mod scheduler;
pub mod pipeline;
pub mod persist;
pub mod writer;
pub mod nid;
pub mod stats;
pub mod registry;
pub mod query_service;
pub mod app;

#[cfg(test)]
mod testing;

pub use app::{open_sink, Aggregator, AggregatorApp, Connectors};
pub use config::AggregatorConfig;
pub use error::CollectError;
