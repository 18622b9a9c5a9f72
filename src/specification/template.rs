/// Named configuration templates.
///
/// A template is a reusable base configuration for one specification type.
/// Construction resolves `template_name`/`template`/`templates` references
/// through a `TemplateManager` before the caller's own keys are overlaid.
///
/// Templates can be registered programmatically or loaded from a manifest:
/// a JSON file listing `(name, specification_type, path, description,
/// author, last_modified)` records with paths relative to the manifest's
/// directory, one directory tree per template set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::errors::SpecificationError;
use crate::logging::{self, Component};

/// Option shown in discovery lists for skipping templating entirely.
pub const NO_TEMPLATE: &str = "no-template";

// ---------------------------------------------------------------------------
// Template records
// ---------------------------------------------------------------------------

/// One manifest entry, as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub specification_type: String,
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

/// A resolved template: manifest metadata plus the loaded configuration.
#[derive(Debug, Clone)]
pub struct TemplateDetails {
    pub name: String,
    pub specification_type: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub last_modified: Option<String>,
    configuration: Map<String, Value>,
}

impl TemplateDetails {
    pub fn configuration(&self) -> &Map<String, Value> {
        &self.configuration
    }
}

// ---------------------------------------------------------------------------
// Template manager
// ---------------------------------------------------------------------------

/// Registry of raw (pre-construction) template configurations, looked up by
/// `(specification_type, name)`.
#[derive(Debug, Clone, Default)]
pub struct TemplateManager {
    templates: Vec<TemplateDetails>,
}

impl TemplateManager {
    pub fn new() -> Self {
        TemplateManager::default()
    }

    /// Register a template directly.
    pub fn register(
        &mut self,
        specification_type: impl Into<String>,
        name: impl Into<String>,
        configuration: Map<String, Value>,
    ) {
        self.templates.push(TemplateDetails {
            name: name.into(),
            specification_type: specification_type.into(),
            description: None,
            author: None,
            last_modified: None,
            configuration,
        });
    }

    /// Load a manifest file and every template configuration it names.
    pub fn from_manifest(manifest_path: impl AsRef<Path>) -> Result<Self, SpecificationError> {
        let manifest_path = manifest_path.as_ref();
        let manifest_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));

        let raw = std::fs::read_to_string(manifest_path)?;
        let entries: Vec<ManifestEntry> = serde_json::from_str(&raw).map_err(|error| {
            SpecificationError::invalid(
                "TemplateManifest",
                vec![format!(
                    "'{}' is not a valid template manifest: {}",
                    manifest_path.display(),
                    error
                )],
            )
        })?;

        let mut manager = TemplateManager::new();
        for entry in entries {
            let template_path = manifest_dir.join(&entry.path);
            let body = std::fs::read_to_string(&template_path)?;
            let configuration: Value = serde_json::from_str(&body).map_err(|error| {
                SpecificationError::invalid(
                    "TemplateManifest",
                    vec![format!(
                        "template '{}' at '{}' is not valid JSON: {}",
                        entry.name,
                        template_path.display(),
                        error
                    )],
                )
            })?;
            let Value::Object(configuration) = configuration else {
                return Err(SpecificationError::invalid(
                    "TemplateManifest",
                    vec![format!(
                        "template '{}' at '{}' must be a JSON object",
                        entry.name,
                        template_path.display()
                    )],
                ));
            };

            manager.templates.push(TemplateDetails {
                name: entry.name,
                specification_type: entry.specification_type,
                description: entry.description,
                author: entry.author,
                last_modified: entry.last_modified,
                configuration,
            });
        }

        logging::info(
            Component::Template,
            None,
            &format!(
                "loaded {} templates from '{}'",
                manager.templates.len(),
                manifest_path.display()
            ),
        );
        Ok(manager)
    }

    /// The raw configuration for a named template, or `None` if not found.
    pub fn get_template(&self, specification_type: &str, name: &str) -> Option<&Map<String, Value>> {
        self.templates
            .iter()
            .find(|template| {
                template.specification_type == specification_type && template.name == name
            })
            .map(TemplateDetails::configuration)
    }

    pub fn details(&self, specification_type: &str, name: &str) -> Option<&TemplateDetails> {
        self.templates
            .iter()
            .find(|template| {
                template.specification_type == specification_type && template.name == name
            })
    }

    /// The specification types that have at least one template registered.
    pub fn specification_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .templates
            .iter()
            .map(|template| template.specification_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// `(value, display name)` pairs for UI discovery, led by the synthetic
    /// `no-template` entry.
    pub fn options(&self, specification_type: &str) -> Vec<(String, String)> {
        let mut options = vec![(NO_TEMPLATE.to_string(), "No Template".to_string())];
        for template in &self.templates {
            if template.specification_type == specification_type {
                options.push((template.name.clone(), template.name.clone()));
            }
        }
        options
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager_with(specification_type: &str, name: &str, config: Value) -> TemplateManager {
        let Value::Object(map) = config else {
            panic!("test template must be an object");
        };
        let mut manager = TemplateManager::new();
        manager.register(specification_type, name, map);
        manager
    }

    #[test]
    fn test_lookup_is_scoped_by_specification_type() {
        let manager = manager_with(
            "BackendSpecification",
            "nwis-hourly",
            json!({"backend_type": "rest", "format": "json"}),
        );

        assert!(
            manager
                .get_template("BackendSpecification", "nwis-hourly")
                .is_some()
        );
        assert!(
            manager
                .get_template("DataSourceSpecification", "nwis-hourly")
                .is_none(),
            "the same name under a different type must not resolve"
        );
        assert!(manager.get_template("BackendSpecification", "other").is_none());
    }

    #[test]
    fn test_options_include_synthetic_no_template_entry() {
        let manager = manager_with(
            "ThresholdSpecification",
            "flood-stages",
            json!({"origin": "thresholds"}),
        );

        let options = manager.options("ThresholdSpecification");
        assert_eq!(options[0].0, NO_TEMPLATE);
        assert!(options.iter().any(|(value, _)| value == "flood-stages"));

        // Types without templates still offer the synthetic entry.
        let bare = manager.options("SchemeSpecification");
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].0, NO_TEMPLATE);
    }

    #[test]
    fn test_specification_types_are_unique_and_sorted() {
        let mut manager = TemplateManager::new();
        manager.register("B", "two", Map::new());
        manager.register("A", "one", Map::new());
        manager.register("B", "three", Map::new());

        assert_eq!(manager.specification_types(), vec!["A", "B"]);
    }
}
