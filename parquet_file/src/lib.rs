//! Parquet encode/decode and the on-disk layout of the partitioned message
//! dataset.
//!
//! Everything that touches a `.parquet` byte goes through this crate:
//! writers pick the codec and encoding properties, readers apply column
//! projection and pushed-down row filters, and the dataset module walks the
//! `year=YYYY/month=MM/day=DD` tree.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod dataset;
pub mod metadata;
pub mod reader;
pub mod writer;

pub use dataset::PartitionDir;
pub use reader::Predicate;
pub use writer::Codec;
