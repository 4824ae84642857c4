//! Configuration and resource selection.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::resources::{Registry, ResourceError};

/// Environment variable naming an alternate resource directory.
pub const RESOURCE_DIR_ENV: &str = "CFDI_RESOURCE_DIR";

/// Where schema definitions and canonicalization templates come from.
/// - Bundled: the versions compiled into the library.
/// - Directory: `<dir>/<version>/schema.json` and `<dir>/<version>/cadena.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResourceSource {
    #[default]
    Bundled,
    Directory(PathBuf),
}

/// Library configuration.
///
/// # Examples
/// ```rust
/// use cfdi_core::config::{Config, ResourceSource};
///
/// let config = Config::new(ResourceSource::Bundled);
/// let registry = config.registry()?;
/// assert!(registry.versions().any(|v| v == "3.0"));
/// # Ok::<(), cfdi_core::resources::ResourceError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Config {
    resources: ResourceSource,
}

impl Config {
    pub fn new(resources: ResourceSource) -> Self {
        Self { resources }
    }

    pub fn with_resource_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(ResourceSource::Directory(dir.into()))
    }

    /// Reads [`RESOURCE_DIR_ENV`]; unset or empty means bundled resources.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        match lookup(RESOURCE_DIR_ENV).filter(|dir| !dir.trim().is_empty()) {
            Some(dir) => Self::with_resource_dir(dir),
            None => Self::default(),
        }
    }

    pub fn resources(&self) -> &ResourceSource {
        &self.resources
    }

    pub fn resource_dir(&self) -> Option<&Path> {
        match &self.resources {
            ResourceSource::Bundled => None,
            ResourceSource::Directory(dir) => Some(dir),
        }
    }

    /// Loads (or reuses) the registry for the configured source.
    pub fn registry(&self) -> Result<Arc<Registry>, ResourceError> {
        match &self.resources {
            ResourceSource::Bundled => Registry::bundled(),
            ResourceSource::Directory(dir) => Registry::from_dir(dir).map(Arc::new),
        }
    }
}
