//! Module discovery
//!
//! Scans module roots for `<root>/<module>/module.toml` and returns validated
//! candidates. Discovery only reads the filesystem; turning a candidate into
//! a live module is the loader's job.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::module::error::{KernelError, Result};
use crate::module::registry::manifest::{load_module_config, ModuleManifest};
use crate::module::registry::records::ModuleDescriptor;
use crate::module::validation::ManifestValidator;

/// Manifest file expected in every module directory
pub const MANIFEST_FILE: &str = "module.toml";

/// Optional per-module configuration file
pub const CONFIG_FILE: &str = "config.toml";

/// Discovered module information
#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    /// Module directory path
    pub directory: PathBuf,
    /// Module manifest
    pub manifest: ModuleManifest,
    /// Flattened `config.toml`, empty if absent
    pub config: HashMap<String, String>,
}

impl DiscoveredModule {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn descriptor(&self) -> ModuleDescriptor {
        self.manifest.to_descriptor()
    }
}

/// Outcome of a scan: admitted candidates plus the ones that were excluded
#[derive(Debug, Default)]
pub struct DiscoveryScan {
    pub modules: Vec<DiscoveredModule>,
    pub rejected: Vec<KernelError>,
}

/// Module discovery scanner
pub struct ModuleDiscovery {
    roots: Vec<PathBuf>,
    validator: ManifestValidator,
}

impl ModuleDiscovery {
    /// Create a scanner over the given roots, searched in order
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            roots: roots.into_iter().map(|p| p.as_ref().to_path_buf()).collect(),
            validator: ManifestValidator::new(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Discover all modules under every root
    ///
    /// A missing root contributes nothing. A malformed or invalid manifest
    /// excludes that module only; the first root to declare a name wins.
    pub fn discover_modules(&self) -> Result<DiscoveryScan> {
        let mut scan = DiscoveryScan::default();
        let mut seen: HashSet<String> = HashSet::new();

        for root in &self.roots {
            if !root.exists() {
                debug!("Module root does not exist, skipping: {:?}", root);
                continue;
            }
            info!("Discovering modules in {:?}", root);

            for directory in Self::module_directories(root)? {
                match self.load_candidate(&directory) {
                    Ok(module) => {
                        if !seen.insert(module.manifest.name.clone()) {
                            warn!(
                                module = %module.manifest.name,
                                "Duplicate module in {:?}, keeping the first one found",
                                directory
                            );
                            scan.rejected.push(KernelError::discovery(
                                directory.display().to_string(),
                                format!("duplicate module name '{}'", module.manifest.name),
                            ));
                            continue;
                        }
                        scan.modules.push(module);
                    }
                    Err(e) => {
                        warn!(phase = "discover", "Excluding module: {}", e);
                        scan.rejected.push(e);
                    }
                }
            }
        }

        info!(
            "Discovered {} modules ({} rejected)",
            scan.modules.len(),
            scan.rejected.len()
        );
        Ok(scan)
    }

    /// Subdirectories of `root` holding a manifest, sorted for stable scans
    fn module_directories(root: &Path) -> Result<Vec<PathBuf>> {
        let location = root.display().to_string();
        let entries = fs::read_dir(root).map_err(|e| {
            KernelError::discovery(&location, format!("failed to read module root: {}", e))
        })?;

        let mut directories = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                KernelError::discovery(&location, format!("failed to read directory entry: {}", e))
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if !path.join(MANIFEST_FILE).is_file() {
                debug!("No {} found in {:?}, skipping", MANIFEST_FILE, path);
                continue;
            }
            directories.push(path);
        }
        directories.sort();
        Ok(directories)
    }

    fn load_candidate(&self, directory: &Path) -> Result<DiscoveredModule> {
        let manifest_path = directory.join(MANIFEST_FILE);
        let manifest = ModuleManifest::from_file(&manifest_path)?;
        self.validator
            .validate(&manifest)
            .into_result(manifest_path.display().to_string())?;
        let config = load_module_config(directory.join(CONFIG_FILE))?;

        debug!(module = %manifest.name, "Found module in {:?}", directory);
        Ok(DiscoveredModule {
            directory: directory.to_path_buf(),
            manifest,
            config,
        })
    }
}
