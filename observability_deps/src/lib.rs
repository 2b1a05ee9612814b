//! This crate exists to pin the observability stack used across all
//! ChatVault crates to a single version, so that upgrades happen in one
//! place and every crate logs through the same `tracing` dispatch.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_docs)]

pub use tracing;
