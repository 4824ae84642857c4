//! Versioned schema definitions and canonicalization templates.
//!
//! Each supported document version has a `schema.json` and a `cadena.json`.
//! The versions shipped with the crate are compiled in; a directory with the
//! same `<version>/schema.json` + `<version>/cadena.json` layout can be
//! loaded at runtime instead.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use thiserror::Error;
use tracing::debug;

use crate::comprobante::canonical::Template;
use crate::comprobante::sign::SignatureAlgorithm;
use crate::comprobante::validation::Schema;

pub const SCHEMA_FILE: &str = "schema.json";
pub const TEMPLATE_FILE: &str = "cadena.json";

const BUNDLED_RESOURCES: &[(&str, &str, &str)] = &[(
    "3.0",
    include_str!("../assets/3.0/schema.json"),
    include_str!("../assets/3.0/cadena.json"),
)];

static BUNDLED: LazyLock<Result<Arc<Registry>, ResourceError>> = LazyLock::new(|| {
    let mut registry = Registry::default();
    for (version, schema, template) in BUNDLED_RESOURCES {
        registry.insert_json(version, schema, template)?;
    }
    Ok(Arc::new(registry))
});

/// No schema or template is registered for a document version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported document version {version:?}")]
pub struct UnsupportedVersion {
    pub version: String,
}

#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    #[error("failed to read resource {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("invalid resource {name}: {message}")]
    Invalid { name: String, message: String },
    #[error("resource {name} declares version {found:?}, expected {expected:?}")]
    VersionMismatch {
        name: String,
        expected: String,
        found: String,
    },
    #[error("template for version {version} references signature field {field}")]
    SignatureFieldReferenced { version: String, field: String },
    #[error("no resource versions found in {}", path.display())]
    Empty { path: PathBuf },
}

/// Resources for one document version.
#[derive(Debug, Clone)]
pub struct VersionResources {
    schema: Schema,
    template: Template,
}

impl VersionResources {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.template.signature_algorithm
    }
}

/// Read-only map from version tag to its resources. Built once and shared.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    versions: BTreeMap<String, VersionResources>,
}

impl Registry {
    /// Registry of the resources compiled into the crate.
    pub fn bundled() -> Result<Arc<Registry>, ResourceError> {
        BUNDLED.clone()
    }

    /// Loads every `<version>/` sub-directory of `dir`.
    pub fn from_dir(dir: &Path) -> Result<Registry, ResourceError> {
        let entries = fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
        let mut registry = Registry::default();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let version = entry.file_name().to_string_lossy().into_owned();
            let schema = read_resource(&path.join(SCHEMA_FILE))?;
            let template = read_resource(&path.join(TEMPLATE_FILE))?;
            registry.insert_json(&version, &schema, &template)?;
            debug!(version = %version, dir = %path.display(), "loaded resources");
        }
        if registry.versions.is_empty() {
            return Err(ResourceError::Empty {
                path: dir.to_path_buf(),
            });
        }
        Ok(registry)
    }

    /// Parses and registers one version from JSON text.
    pub fn insert_json(
        &mut self,
        version: &str,
        schema_json: &str,
        template_json: &str,
    ) -> Result<(), ResourceError> {
        let schema: Schema =
            serde_json::from_str(schema_json).map_err(|e| ResourceError::Invalid {
                name: format!("{version}/{SCHEMA_FILE}"),
                message: e.to_string(),
            })?;
        let template: Template =
            serde_json::from_str(template_json).map_err(|e| ResourceError::Invalid {
                name: format!("{version}/{TEMPLATE_FILE}"),
                message: e.to_string(),
            })?;
        self.insert(version, schema, template)
    }

    /// Registers one version.
    ///
    /// # Errors
    /// Fails when either resource declares another version, or when the
    /// template references a signature field of the root element.
    pub fn insert(
        &mut self,
        version: &str,
        schema: Schema,
        template: Template,
    ) -> Result<(), ResourceError> {
        for (name, found) in [
            (SCHEMA_FILE, schema.version.as_str()),
            (TEMPLATE_FILE, template.version.as_str()),
        ] {
            if found != version {
                return Err(ResourceError::VersionMismatch {
                    name: format!("{version}/{name}"),
                    expected: version.to_string(),
                    found: found.to_string(),
                });
            }
        }
        if let Some(field) = template.signature_field_references().into_iter().next() {
            return Err(ResourceError::SignatureFieldReferenced {
                version: version.to_string(),
                field,
            });
        }
        self.versions
            .insert(version.to_string(), VersionResources { schema, template });
        Ok(())
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    pub fn get(&self, version: &str) -> Result<&VersionResources, UnsupportedVersion> {
        self.versions.get(version).ok_or_else(|| UnsupportedVersion {
            version: version.to_string(),
        })
    }

    pub fn schema(&self, version: &str) -> Result<&Schema, UnsupportedVersion> {
        self.get(version).map(VersionResources::schema)
    }

    pub fn template(&self, version: &str) -> Result<&Template, UnsupportedVersion> {
        self.get(version).map(VersionResources::template)
    }
}

fn read_resource(path: &Path) -> Result<String, ResourceError> {
    fs::read_to_string(path).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: std::io::Error) -> ResourceError {
    ResourceError::Io {
        path: path.to_path_buf(),
        source: Arc::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_registry_has_version_3_0() {
        let registry = Registry::bundled().expect("bundled");
        assert_eq!(registry.versions().collect::<Vec<_>>(), vec!["3.0"]);
        let resources = registry.get("3.0").expect("3.0");
        assert_eq!(resources.signature_algorithm(), SignatureAlgorithm::Sha1WithRsa);
        assert_eq!(
            resources.schema().schema_location,
            "http://www.sat.gob.mx/cfd/3 cfdv3.xsd"
        );
        assert!(resources.template().signature_field_references().is_empty());
    }

    #[test]
    fn bundled_registry_is_shared() {
        let a = Registry::bundled().expect("bundled");
        let b = Registry::bundled().expect("bundled");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let registry = Registry::bundled().expect("bundled");
        let err = registry.template("2.0").unwrap_err();
        assert_eq!(err.version, "2.0");
    }

    #[test]
    fn rejects_template_that_signs_its_own_signature() {
        let (_, schema, _) = BUNDLED_RESOURCES[0];
        let template = r#"{"version": "3.0", "signature_algorithm": "SHA1withRSA",
            "segments": [{"field": "@version"}, {"field": "@sello"}]}"#;
        let err = Registry::default()
            .insert_json("3.0", schema, template)
            .unwrap_err();
        assert!(matches!(
            err,
            ResourceError::SignatureFieldReferenced { ref field, .. } if field == "@sello"
        ));
    }

    #[test]
    fn rejects_version_mismatch_and_bad_json() {
        let (_, schema, template) = BUNDLED_RESOURCES[0];
        let err = Registry::default()
            .insert_json("3.2", schema, template)
            .unwrap_err();
        assert!(matches!(err, ResourceError::VersionMismatch { .. }));

        let err = Registry::default()
            .insert_json("3.0", "{", template)
            .unwrap_err();
        assert!(matches!(err, ResourceError::Invalid { ref name, .. } if name == "3.0/schema.json"));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let err = Registry::from_dir(Path::new("no/such/resources")).unwrap_err();
        assert!(matches!(err, ResourceError::Io { .. }));
    }
}
