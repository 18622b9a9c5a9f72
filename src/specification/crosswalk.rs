/// Crosswalk specifications.
///
/// A crosswalk links observation-side location identifiers to
/// prediction-side identifiers. The `field` selector extracts the observed
/// identifier; its first associated field supplies the predicted identifier.
/// The two output columns are named by `observation_field_name` and
/// `prediction_field_name`, which must agree across every crosswalk of an
/// evaluation.

use serde_json::{Map, Value};

use crate::specification::backend::{BackendSpecification, LoaderSpecification};
use crate::specification::base::{
    BuildContext, FieldDescriptor, FieldKind, FieldReader, PropertyMap, Specification,
    TemplatedSpecification, overlay_opt_text, overlay_segments, overlay_spec, overlay_text,
    push_properties, push_segments,
};
use crate::specification::fields::ValueSelector;

#[derive(Debug, Clone, PartialEq)]
pub struct CrosswalkSpecification {
    pub name: Option<String>,
    pub backend: BackendSpecification,
    pub field: ValueSelector,
    pub observation_field_name: String,
    pub prediction_field_name: String,
    /// Search root within the crosswalk document.
    pub origin: Vec<String>,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

const SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::optional("name", FieldKind::Text),
    FieldDescriptor::required("backend", FieldKind::Spec),
    FieldDescriptor::required("field", FieldKind::Spec),
    FieldDescriptor::required("observation_field_name", FieldKind::Text),
    FieldDescriptor::required("prediction_field_name", FieldKind::Text),
    FieldDescriptor::optional("origin", FieldKind::Segments),
];

impl Specification for CrosswalkSpecification {
    const SPECIFICATION_TYPE: &'static str = "CrosswalkSpecification";

    fn schema() -> &'static [FieldDescriptor] {
        SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, ctx: &BuildContext) -> Result<Self, String> {
        Ok(CrosswalkSpecification {
            name: fields.take_text("name")?,
            backend: fields.take_required_spec("backend", ctx)?,
            field: fields.take_required_spec("field", ctx)?,
            observation_field_name: fields.take_required_text("observation_field_name")?,
            prediction_field_name: fields.take_required_text("prediction_field_name")?,
            origin: fields.take_segments("origin")?,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Value::String(name.clone()));
        }
        map.insert("backend".to_string(), self.backend.to_value());
        map.insert("field".to_string(), self.field.to_value());
        map.insert(
            "observation_field_name".to_string(),
            Value::String(self.observation_field_name.clone()),
        );
        map.insert(
            "prediction_field_name".to_string(),
            Value::String(self.prediction_field_name.clone()),
        );
        push_segments(&mut map, "origin", &self.origin);
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if self.field.associated_fields.is_empty() {
            messages.push(
                "a crosswalk field requires at least one associated field carrying \
                 the predicted location identifier"
                    .to_string(),
            );
        }
        messages
    }

    fn validate(&self) -> Vec<String> {
        let mut messages = self.validate_self();
        messages.extend(self.backend.validate());
        messages.extend(self.field.validate());
        messages
    }

    fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    fn identity(&self) -> Option<&str> {
        self.name.as_deref().or(self.template_name.as_deref())
    }
}

impl TemplatedSpecification for CrosswalkSpecification {
    fn template_name(&self) -> Option<&str> {
        self.template_name.as_deref()
    }

    fn set_template_name(&mut self, name: Option<String>) {
        self.template_name = name;
    }

    fn apply_configuration(
        &mut self,
        cfg: &Map<String, Value>,
        ctx: &BuildContext,
    ) -> Result<(), String> {
        overlay_opt_text(&mut self.name, cfg, "name");
        overlay_spec(&mut self.backend, cfg, "backend", ctx)?;
        overlay_spec(&mut self.field, cfg, "field", ctx)?;
        overlay_text(&mut self.observation_field_name, cfg, "observation_field_name");
        overlay_text(&mut self.prediction_field_name, cfg, "prediction_field_name");
        overlay_segments(&mut self.origin, cfg, "origin")
    }
}

impl LoaderSpecification for CrosswalkSpecification {
    fn backend(&self) -> &BackendSpecification {
        &self.backend
    }
}
