//! Module validation framework
//!
//! Checks manifests and descriptors before a module is admitted into the
//! registry.

pub mod manifest_validator;

pub use manifest_validator::{ManifestValidator, ValidationResult};
