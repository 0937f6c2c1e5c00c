//! Bundle shape: where the content lives inside an upload, and whether it
//! has the canonical layout.
//!
//! 1. [`scan`]: lenient discovery of the content root and metadata file
//! 2. [`validate`]: strict check of the discovered root

pub mod scan;
pub mod validate;

pub use scan::{find_content_root, locate_metadata, Discovery};
pub use validate::{validate, ValidationResult};
