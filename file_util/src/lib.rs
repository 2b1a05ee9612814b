//! Filesystem primitives shared by the storage crates: write-then-rename
//! atomic replacement and a polled advisory file lock.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod atomic;
pub mod lock;

pub use atomic::atomic_write;
pub use lock::FileLock;
