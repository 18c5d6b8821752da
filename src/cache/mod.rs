//! Cache module for segment storage.
//!
//! Provides the on-disk segment cache and the asset manifests.

pub mod manifest;
pub mod segments;

// Re-export commonly used types
pub use manifest::Manifest;
pub use segments::{write_atomic, SegmentStore};
