#![forbid(unsafe_code)]

//! `spool-core`
//!
//! Shared primitives for the spool caching proxy: stable resource
//! identities, content-type sniffing, and file-name derivation.

mod naming;
mod resource_id;
mod sniff;

pub use naming::{derive_extension, derive_file_name, parse_content_disposition, sanitize_file_name};
pub use resource_id::ResourceId;
pub use sniff::sniff_mime;
