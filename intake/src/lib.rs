//! The intake side of the storage engine: producers append raw JSON records
//! to per-date line-delimited files under a file lock, the ingester streams
//! them back out, and everything unusable lands in a structured error log.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod error_log;
pub mod log;
pub mod reader;

pub use error_log::{ErrorKind, ErrorLog};
pub use log::{append_record, append_records};
pub use reader::{count_lines, stream_lines, LineItem};
