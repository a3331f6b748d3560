#![forbid(unsafe_code)]

//! `spool-storage`
//!
//! Storage primitives for the caching proxy:
//!
//! - [`RangeSet`] — which byte offsets of a fixed-size file are present,
//!   as an interval list or a block bitmap.
//! - [`SparseFile`] — the pre-allocated data file, addressed by absolute
//!   offset.
//! - [`meta`] — durable, atomic persistence of a resource's attributes and
//!   range set.
//! - [`DebouncedSaver`] — per-resource save scheduling.

mod error;
pub mod meta;
mod range_set;
mod saver;
mod sparse;

pub use error::{StorageError, StorageResult};
pub use meta::MetaHeader;
pub use range_set::{BITMAP_THRESHOLD, BLOCK_SIZE, RangeSet};
pub use saver::{DebouncedSaver, SAVE_DEBOUNCE};
pub use sparse::SparseFile;
