//! Library crate for mergepw.
//!
//! This crate exposes the building blocks of the `mergepw` tool:
//! - Account directory model, reader and writer (`db`)
//! - Regex selection of users (`select`)
//! - The merge itself (`merge`)
//! - Configuration file and option resolution (`config`)
//! - Error and result types (`error`)
//!
//! It is used by the `mergepw` binary and by tests.
#![doc = include_str!("../README.md")]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod select;

// Re-export commonly used items at the crate root for convenience
pub use db::{Database, IdBounds, IdRange};
pub use error::{MergeError, Result};
pub use merge::{MergeOptions, MergeOutcome, MergeReport, merge, merge_dirs};
