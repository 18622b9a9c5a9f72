/// Measurement unit declarations.
///
/// A unit may be declared three ways: a literal `value` ("ft^3/s"), the name
/// of a `field` carrying the unit per row, or a document `path` resolved
/// once per source. Exactly one must be populated; a bare string in
/// configuration is shorthand for the literal form.

use serde_json::{Map, Value};

use crate::specification::base::{
    BuildContext, FieldDescriptor, FieldKind, FieldReader, PropertyMap, Specification,
    TemplatedSpecification, overlay_opt_text, overlay_segments, push_properties, push_segments,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnitDefinition {
    pub value: Option<String>,
    pub field: Option<String>,
    pub path: Vec<String>,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

impl UnitDefinition {
    pub fn literal(value: impl Into<String>) -> Self {
        UnitDefinition {
            value: Some(value.into()),
            ..UnitDefinition::default()
        }
    }
}

const SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::optional("value", FieldKind::Text),
    FieldDescriptor::optional("field", FieldKind::Text),
    FieldDescriptor::optional("path", FieldKind::Segments),
];

impl Specification for UnitDefinition {
    const SPECIFICATION_TYPE: &'static str = "UnitDefinition";

    fn schema() -> &'static [FieldDescriptor] {
        SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, _ctx: &BuildContext) -> Result<Self, String> {
        Ok(UnitDefinition {
            value: fields.take_text("value")?,
            field: fields.take_text("field")?,
            path: fields.take_segments("path")?,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(value) = &self.value {
            map.insert("value".to_string(), Value::String(value.clone()));
        }
        if let Some(field) = &self.field {
            map.insert("field".to_string(), Value::String(field.clone()));
        }
        push_segments(&mut map, "path", &self.path);
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let populated = usize::from(self.value.is_some())
            + usize::from(self.field.is_some())
            + usize::from(!self.path.is_empty());
        if populated == 1 {
            Vec::new()
        } else {
            vec![format!(
                "exactly one of 'value', 'field', or 'path' must be set on a unit \
                 definition; found {}",
                populated
            )]
        }
    }

    fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    fn from_scalar(text: &str) -> Option<Self> {
        Some(UnitDefinition::literal(text))
    }
}

impl TemplatedSpecification for UnitDefinition {
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
        overlay_opt_text(&mut self.value, cfg, "value");
        overlay_opt_text(&mut self.field, cfg, "field");
        overlay_segments(&mut self.path, cfg, "path")
    }
}
