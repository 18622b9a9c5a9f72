/// Location identification specifications.
///
/// Declares whether and how location identifiers are discovered for a
/// retrieved dataset: from a field of the data (column, filename, value,
/// optionally filtered through a regex pattern) or from a static id list.
/// Violations are reported through deferred validation rather than raised
/// at construction, matching the rest of the specification protocol.

use serde_json::{Map, Value};

use crate::specification::base::{
    BuildContext, FieldDescriptor, FieldKind, FieldReader, PropertyMap, Specification,
    TemplatedSpecification, overlay_bool, overlay_opt_text, overlay_text_list, push_properties,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocationSpecification {
    /// Whether location identifiers should be discovered at all.
    pub identify: bool,
    /// Where identifiers come from: "column", "filename", or "value".
    pub from_field: Option<String>,
    /// Regex (filename/value) or column name (column) refining `from_field`.
    pub pattern: Option<String>,
    /// Static identifiers, paired positionally with the backend's sources.
    pub ids: Vec<String>,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

impl LocationSpecification {
    pub fn from_ids(ids: &[&str]) -> Self {
        LocationSpecification {
            identify: true,
            ids: ids.iter().map(|id| id.to_string()).collect(),
            ..LocationSpecification::default()
        }
    }
}

const SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::optional("identify", FieldKind::Boolean),
    FieldDescriptor::optional("from_field", FieldKind::Text),
    FieldDescriptor::optional("pattern", FieldKind::Text),
    FieldDescriptor::optional("ids", FieldKind::TextList),
];

impl Specification for LocationSpecification {
    const SPECIFICATION_TYPE: &'static str = "LocationSpecification";

    fn schema() -> &'static [FieldDescriptor] {
        SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, _ctx: &BuildContext) -> Result<Self, String> {
        Ok(LocationSpecification {
            identify: fields.take_bool("identify")?.unwrap_or(false),
            from_field: fields.take_text("from_field")?,
            pattern: fields.take_text("pattern")?,
            ids: fields.take_text_list("ids")?,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("identify".to_string(), Value::Bool(self.identify));
        if let Some(from_field) = &self.from_field {
            map.insert("from_field".to_string(), Value::String(from_field.clone()));
        }
        if let Some(pattern) = &self.pattern {
            map.insert("pattern".to_string(), Value::String(pattern.clone()));
        }
        if !self.ids.is_empty() {
            map.insert(
                "ids".to_string(),
                Value::Array(
                    self.ids
                        .iter()
                        .map(|id| Value::String(id.clone()))
                        .collect(),
                ),
            );
        }
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if self.from_field.is_some() && !self.ids.is_empty() {
            messages.push(
                "only one of 'from_field' and 'ids' may be set on a location specification"
                    .to_string(),
            );
        }
        if self.pattern.is_some() && self.from_field.is_none() {
            messages.push("a location 'pattern' requires 'from_field'".to_string());
        }
        if self.identify && self.from_field.is_none() && self.ids.is_empty() {
            messages.push(
                "location identification requires either 'from_field' or 'ids'".to_string(),
            );
        }
        if let Some(pattern) = &self.pattern {
            if let Err(error) = regex::Regex::new(pattern) {
                messages.push(format!("'{}' is not a valid pattern: {}", pattern, error));
            }
        }
        messages
    }

    fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }
}

impl TemplatedSpecification for LocationSpecification {
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
        overlay_bool(&mut self.identify, cfg, "identify");
        overlay_opt_text(&mut self.from_field, cfg, "from_field");
        overlay_opt_text(&mut self.pattern, cfg, "pattern");
        overlay_text_list(&mut self.ids, cfg, "ids");
        Ok(())
    }
}
