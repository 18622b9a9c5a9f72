/// Backend locator specifications.
///
/// A `BackendSpecification` describes where a dataset's raw bytes come from:
/// the backend type (file, rest, ...), an address pattern, and the data
/// format the retrieved bytes are in. Credentials and parse options ride in
/// the open `properties` map.

use serde_json::{Map, Value};

use crate::specification::base::{
    BuildContext, FieldDescriptor, FieldKind, FieldReader, PropertyMap, Specification,
    TemplatedSpecification, overlay_opt_text, overlay_text, push_properties,
};

/// Any specification that owns exactly one backend.
pub trait LoaderSpecification {
    fn backend(&self) -> &BackendSpecification;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendSpecification {
    /// Lowercase backend type key: "file", "rest", ...
    pub backend_type: String,
    /// Address pattern the backend resolves into concrete sources.
    pub address: Option<String>,
    /// Data format key for retriever dispatch: "json", "csv", ...
    pub format: String,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

impl BackendSpecification {
    pub fn new(backend_type: impl Into<String>, address: impl Into<String>, format: impl Into<String>) -> Self {
        BackendSpecification {
            backend_type: backend_type.into().to_lowercase(),
            address: Some(address.into()),
            format: format.into(),
            properties: PropertyMap::new(),
            template_name: None,
        }
    }
}

const SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::required("backend_type", FieldKind::Text),
    FieldDescriptor::optional("address", FieldKind::Text),
    FieldDescriptor::required("format", FieldKind::Text),
];

impl Specification for BackendSpecification {
    const SPECIFICATION_TYPE: &'static str = "BackendSpecification";

    fn schema() -> &'static [FieldDescriptor] {
        SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, _ctx: &BuildContext) -> Result<Self, String> {
        Ok(BackendSpecification {
            backend_type: fields.take_required_text("backend_type")?.to_lowercase(),
            address: fields.take_text("address")?,
            format: fields.take_required_text("format")?,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "backend_type".to_string(),
            Value::String(self.backend_type.clone()),
        );
        if let Some(address) = &self.address {
            map.insert("address".to_string(), Value::String(address.clone()));
        }
        map.insert("format".to_string(), Value::String(self.format.clone()));
        if let Some(template_name) = &self.template_name {
            map.insert(
                "template_name".to_string(),
                Value::String(template_name.clone()),
            );
        }
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if self.backend_type.trim().is_empty() {
            messages.push("a backend requires a non-empty 'backend_type'".to_string());
        }
        if self.format.trim().is_empty() {
            messages.push("a backend requires a non-empty 'format'".to_string());
        }
        messages
    }

    fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    fn identity(&self) -> Option<&str> {
        self.template_name.as_deref()
    }
}

impl TemplatedSpecification for BackendSpecification {
    fn template_name(&self) -> Option<&str> {
        self.template_name.as_deref()
    }

    fn set_template_name(&mut self, name: Option<String>) {
        self.template_name = name;
    }

    fn apply_configuration(
        &mut self,
        cfg: &Map<String, Value>,
        _ctx: &BuildContext,
    ) -> Result<(), String> {
        overlay_text(&mut self.backend_type, cfg, "backend_type");
        self.backend_type = self.backend_type.to_lowercase();
        overlay_opt_text(&mut self.address, cfg, "address");
        overlay_text(&mut self.format, cfg, "format");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_through_to_value() {
        let backend = BackendSpecification::create(
            json!({
                "backend_type": "REST",
                "address": "https://waterservices.usgs.gov/nwis/iv",
                "format": "json",
                "timeout_seconds": 30
            }),
            None,
        )
        .expect("valid backend")
        .into_one()
        .expect("single instance");

        assert_eq!(backend.backend_type, "rest", "type key is lowercased");
        assert_eq!(
            backend.properties.get("timeout_seconds"),
            Some(&json!(30)),
            "unrecognized keys are preserved in properties"
        );

        let rebuilt = BackendSpecification::create(backend.to_value(), None)
            .expect("serialized form should rebuild")
            .into_one()
            .expect("single instance");
        assert_eq!(rebuilt, backend);
    }

    #[test]
    fn test_missing_required_fields_are_reported_together() {
        let error = BackendSpecification::create(json!({"address": "/tmp/x.json"}), None)
            .expect_err("missing fields should fail");
        let rendered = error.to_string();
        assert!(rendered.contains("backend_type"), "got: {}", rendered);
        assert!(rendered.contains("format"), "got: {}", rendered);
    }

    #[test]
    fn test_overlay_replaces_only_present_keys() {
        let mut backend = BackendSpecification::new("file", "observations.json", "json");
        let ctx = BuildContext::new(None);
        let overlay = json!({"address": "predictions.json"});
        let Value::Object(overlay) = overlay else {
            unreachable!()
        };

        backend
            .overlay_configuration(&overlay, &ctx)
            .expect("overlay should apply");
        assert_eq!(backend.address.as_deref(), Some("predictions.json"));
        assert_eq!(backend.backend_type, "file", "absent key keeps old value");
        assert_eq!(backend.format, "json");
    }
}
