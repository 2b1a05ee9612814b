//! Shared data types for the ChatVault message storage engine: the cleaned
//! message record, the `(year, month, day)` partition key with its on-disk
//! layout, and the per-intake-file ingest checkpoint.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod checkpoint;
mod partition;
mod record;

pub use checkpoint::{CheckpointStatus, IngestCheckpoint};
pub use partition::{group_by_partition, Error as PartitionError, PartitionKey};
pub use record::Record;
