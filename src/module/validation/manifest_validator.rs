//! Manifest validation
//!
//! Validates module identity and dependency declarations. Every problem is
//! collected so an operator can fix a manifest in one pass.

use tracing::{debug, warn};

use crate::module::error::KernelError;
use crate::module::registry::manifest::ModuleManifest;
use crate::module::registry::records::{
    ModuleDescriptor, MAX_MODULE_NAME_LEN, MIN_MODULE_NAME_LEN,
};

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Manifest is valid
    Valid,
    /// Manifest is invalid with specific errors
    Invalid(Vec<String>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Turn an invalid result into a `Discovery` error for `location`
    pub fn into_result(self, location: impl Into<String>) -> Result<(), KernelError> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(errors) => {
                Err(KernelError::discovery(location, errors.join("; ")))
            }
        }
    }
}

/// Manifest validator
#[derive(Debug, Clone, Default)]
pub struct ManifestValidator;

impl ManifestValidator {
    /// Create a new manifest validator
    pub fn new() -> Self {
        Self
    }

    /// Validate a parsed `module.toml`
    pub fn validate(&self, manifest: &ModuleManifest) -> ValidationResult {
        let mut errors = Vec::new();
        if manifest.path.as_deref().is_some_and(|p| p.trim().is_empty()) {
            errors.push("Module path cannot be empty".to_string());
        }
        self.check(
            &manifest.name,
            &manifest.version,
            &manifest.dependencies,
            &mut errors,
        );
        self.finish(&manifest.name, errors)
    }

    /// Validate a descriptor registered directly by the host
    pub fn validate_descriptor(&self, descriptor: &ModuleDescriptor) -> ValidationResult {
        let mut errors = Vec::new();
        if descriptor.path.trim().is_empty() {
            errors.push("Module path cannot be empty".to_string());
        }
        self.check(
            &descriptor.name,
            &descriptor.version,
            &descriptor.dependencies,
            &mut errors,
        );
        self.finish(&descriptor.name, errors)
    }

    fn check(&self, name: &str, version: &str, dependencies: &[String], errors: &mut Vec<String>) {
        if name.is_empty() {
            errors.push("Module name cannot be empty".to_string());
        } else if !self.is_valid_name(name) {
            errors.push(format!(
                "Invalid module name: {} (must be {}-{} characters, alphanumeric with dashes/underscores)",
                name, MIN_MODULE_NAME_LEN, MAX_MODULE_NAME_LEN
            ));
        }

        if version.is_empty() {
            errors.push("Module version cannot be empty".to_string());
        } else if !self.is_valid_version(version) {
            errors.push(format!(
                "Invalid version format: {} (expected semantic versioning)",
                version
            ));
        }

        let mut seen: Vec<&str> = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if !self.is_valid_name(dep) {
                errors.push(format!("Invalid dependency name: {}", dep));
            }
            if dep == name {
                errors.push(format!("Module {} cannot depend on itself", name));
            }
            if seen.contains(&dep.as_str()) {
                errors.push(format!("Duplicate dependency: {}", dep));
            } else {
                seen.push(dep);
            }
        }
    }

    fn finish(&self, name: &str, errors: Vec<String>) -> ValidationResult {
        if errors.is_empty() {
            debug!("Manifest validation passed for module: {}", name);
            ValidationResult::Valid
        } else {
            warn!(
                "Manifest validation failed for module {}: {:?}",
                name, errors
            );
            ValidationResult::Invalid(errors)
        }
    }

    /// Validate module name format
    #[inline]
    fn is_valid_name(&self, name: &str) -> bool {
        // Fast checks first
        if name.len() < MIN_MODULE_NAME_LEN || name.len() > MAX_MODULE_NAME_LEN {
            return false;
        }

        // Must start with alphanumeric
        if !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            return false;
        }

        name.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    /// Validate version format
    ///
    /// Accepts: major.minor[.patch][-prerelease][+build]
    #[inline]
    fn is_valid_version(&self, version: &str) -> bool {
        let (base, build) = match version.split_once('+') {
            Some((base, build)) => (base, Some(build)),
            None => (version, None),
        };
        let (version_part, prerelease) = match base.split_once('-') {
            Some((v, pre)) => (v, Some(pre)),
            None => (base, None),
        };

        let tag_ok = |tag: Option<&str>| {
            tag.map_or(true, |t| {
                !t.is_empty()
                    && t.split('.').all(|part| {
                        !part.is_empty()
                            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                    })
            })
        };
        if !tag_ok(prerelease) || !tag_ok(build) {
            return false;
        }

        let nums: Vec<&str> = version_part.split('.').collect();
        if nums.len() < 2 || nums.len() > 3 {
            return false;
        }

        nums.iter().all(|n| {
            !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) && n.parse::<u32>().is_ok()
        })
    }
}
