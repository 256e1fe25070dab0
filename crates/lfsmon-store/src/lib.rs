//! Persistence port for rate samples.
//!
//! Samples are stored as flat documents in collections named after the
//! filesystem and calendar month. [`DocumentSink`] is the port the
//! aggregator writes through; [`SqliteSink`] and [`MemorySink`] implement
//! it. [`SampleReader`] is the read API offered to downstream consumers.

pub mod error;
pub mod document;
pub mod sink;
pub mod sqlite;
pub mod memory;
pub mod reader;

pub use document::{CollectionName, SampleDocument, SampleQuery, Watermark, AGGREGATE_NID, WATERMARK_NAME};
pub use error::StoreError;
pub use memory::MemorySink;
pub use reader::SampleReader;
pub use sink::DocumentSink;
pub use sqlite::SqliteSink;
