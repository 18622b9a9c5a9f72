/// Field extraction and renaming specifications.
///
/// A `ValueSelector` declares how a named value is pulled out of a source
/// document or table; `AssociatedField`s are sibling values retrieved
/// alongside it (a date column accompanying a value column). A
/// `FieldMappingSpecification` renames a retrieved column/value into the
/// field name the evaluation expects.

use serde_json::{Map, Value};

use crate::specification::base::{
    BuildContext, FieldDescriptor, FieldKind, FieldReader, PropertyMap, Specification,
    TemplatedSpecification, overlay_opt_text, overlay_segments, overlay_spec_list, overlay_text,
    push_properties, push_segments, push_spec_list,
};

/// The recognized `where` discriminators for a selector.
pub const WHERE_VALUE: &str = "value";
pub const WHERE_KEY: &str = "key";
pub const WHERE_COLUMN: &str = "column";
pub const WHERE_FILENAME: &str = "filename";

const KNOWN_WHERE: [&str; 4] = [WHERE_VALUE, WHERE_KEY, WHERE_COLUMN, WHERE_FILENAME];

// ---------------------------------------------------------------------------
// Associated fields
// ---------------------------------------------------------------------------

/// A named, typed sub-selector resolved relative to each retrieved record.
/// Its path is always a non-empty segment sequence, defaulting to `[name]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociatedField {
    pub name: String,
    pub datatype: Option<String>,
    pub path: Vec<String>,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

impl AssociatedField {
    pub fn new(name: impl Into<String>, datatype: Option<&str>) -> Self {
        let name = name.into();
        AssociatedField {
            path: vec![name.clone()],
            name,
            datatype: datatype.map(String::from),
            properties: PropertyMap::new(),
            template_name: None,
        }
    }
}

const ASSOCIATED_SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::required("name", FieldKind::Text),
    FieldDescriptor::optional("datatype", FieldKind::Text),
    FieldDescriptor::optional("path", FieldKind::Segments),
];

impl Specification for AssociatedField {
    const SPECIFICATION_TYPE: &'static str = "AssociatedField";

    fn schema() -> &'static [FieldDescriptor] {
        ASSOCIATED_SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, _ctx: &BuildContext) -> Result<Self, String> {
        let name = fields.take_required_text("name")?;
        let mut path = fields.take_segments("path")?;
        if path.is_empty() {
            path = vec![name.clone()];
        }
        Ok(AssociatedField {
            name,
            datatype: fields.take_text("datatype")?,
            path,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        if let Some(datatype) = &self.datatype {
            map.insert("datatype".to_string(), Value::String(datatype.clone()));
        }
        push_segments(&mut map, "path", &self.path);
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        // Construction guarantees a non-empty path.
        Vec::new()
    }

    fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    fn identity(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl TemplatedSpecification for AssociatedField {
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
        overlay_text(&mut self.name, cfg, "name");
        overlay_opt_text(&mut self.datatype, cfg, "datatype");
        overlay_segments(&mut self.path, cfg, "path")?;
        if self.path.is_empty() {
            self.path = vec![self.name.clone()];
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Value selectors
// ---------------------------------------------------------------------------

/// Declarative rule for extracting a named value and its sibling fields.
///
/// `origin` locates the record set within a document (wildcards allowed) and
/// `path` locates the value within each record; both are normalized to
/// ordered segment sequences at construction, never raw "/"-joined strings.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSelector {
    pub name: String,
    /// Where the value lives: value / key / column / filename.
    pub where_: String,
    pub origin: Vec<String>,
    pub path: Vec<String>,
    pub datatype: Option<String>,
    pub associated_fields: Vec<AssociatedField>,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

const SELECTOR_SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::required("name", FieldKind::Text),
    FieldDescriptor::required("where", FieldKind::Text),
    FieldDescriptor::optional("origin", FieldKind::Segments),
    FieldDescriptor::optional("path", FieldKind::Segments),
    FieldDescriptor::optional("datatype", FieldKind::Text),
    FieldDescriptor::optional("associated_fields", FieldKind::SpecList),
];

impl Specification for ValueSelector {
    const SPECIFICATION_TYPE: &'static str = "ValueSelector";

    fn schema() -> &'static [FieldDescriptor] {
        SELECTOR_SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, ctx: &BuildContext) -> Result<Self, String> {
        Ok(ValueSelector {
            name: fields.take_required_text("name")?,
            where_: fields.take_required_text("where")?.to_lowercase(),
            origin: fields.take_segments("origin")?,
            path: fields.take_segments("path")?,
            datatype: fields.take_text("datatype")?,
            associated_fields: fields.take_spec_list("associated_fields", ctx)?,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        map.insert("where".to_string(), Value::String(self.where_.clone()));
        push_segments(&mut map, "origin", &self.origin);
        push_segments(&mut map, "path", &self.path);
        if let Some(datatype) = &self.datatype {
            map.insert("datatype".to_string(), Value::String(datatype.clone()));
        }
        push_spec_list(&mut map, "associated_fields", &self.associated_fields);
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if !KNOWN_WHERE.contains(&self.where_.as_str()) {
            messages.push(format!(
                "'{}' is not a valid selector 'where'; expected one of: {}",
                self.where_,
                KNOWN_WHERE.join(", ")
            ));
        }
        messages
    }

    fn validate(&self) -> Vec<String> {
        let mut messages = self.validate_self();
        for field in &self.associated_fields {
            messages.extend(field.validate());
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
        Some(&self.name)
    }
}

impl TemplatedSpecification for ValueSelector {
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
        overlay_text(&mut self.name, cfg, "name");
        overlay_text(&mut self.where_, cfg, "where");
        self.where_ = self.where_.to_lowercase();
        overlay_segments(&mut self.origin, cfg, "origin")?;
        overlay_segments(&mut self.path, cfg, "path")?;
        overlay_opt_text(&mut self.datatype, cfg, "datatype");
        overlay_spec_list(&mut self.associated_fields, cfg, "associated_fields", ctx)
    }
}

// ---------------------------------------------------------------------------
// Field mappings
// ---------------------------------------------------------------------------

/// A rename rule: expose `value` (a column/value/filename of the retrieved
/// data) under the evaluation-facing name `field`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMappingSpecification {
    pub field: String,
    pub map_type: String,
    pub value: String,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

const MAPPING_SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::required("field", FieldKind::Text),
    FieldDescriptor::required("map_type", FieldKind::Text),
    FieldDescriptor::required("value", FieldKind::Text),
];

impl Specification for FieldMappingSpecification {
    const SPECIFICATION_TYPE: &'static str = "FieldMappingSpecification";

    fn schema() -> &'static [FieldDescriptor] {
        MAPPING_SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, _ctx: &BuildContext) -> Result<Self, String> {
        Ok(FieldMappingSpecification {
            field: fields.take_required_text("field")?,
            map_type: fields.take_required_text("map_type")?.to_lowercase(),
            value: fields.take_required_text("value")?,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("field".to_string(), Value::String(self.field.clone()));
        map.insert("map_type".to_string(), Value::String(self.map_type.clone()));
        map.insert("value".to_string(), Value::String(self.value.clone()));
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        Vec::new()
    }

    fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    fn identity(&self) -> Option<&str> {
        Some(&self.field)
    }
}

impl TemplatedSpecification for FieldMappingSpecification {
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
        overlay_text(&mut self.field, cfg, "field");
        overlay_text(&mut self.map_type, cfg, "map_type");
        self.map_type = self.map_type.to_lowercase();
        overlay_text(&mut self.value, cfg, "value");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_associated_field_path_defaults_to_name() {
        let field = AssociatedField::create(json!({"name": "value_date"}), None)
            .expect("valid field")
            .into_one()
            .expect("single instance");
        assert_eq!(field.path, vec!["value_date"]);
    }

    #[test]
    fn test_selector_paths_normalize_to_segments() {
        let selector = ValueSelector::create(
            json!({
                "name": "observation",
                "where": "value",
                "origin": "records/*",
                "path": "flow/value",
                "datatype": "float"
            }),
            None,
        )
        .expect("valid selector")
        .into_one()
        .expect("single instance");

        assert_eq!(selector.origin, vec!["records", "*"]);
        assert_eq!(selector.path, vec!["flow", "value"]);
    }

    #[test]
    fn test_selector_round_trip() {
        let selector = ValueSelector::create(
            json!({
                "name": "observation",
                "where": "value",
                "origin": ["records", "*"],
                "path": ["flow"],
                "datatype": "float",
                "associated_fields": [
                    {"name": "value_date", "datatype": "datetime"},
                    {"name": "site", "path": "site_no"}
                ]
            }),
            None,
        )
        .expect("valid selector")
        .into_one()
        .expect("single instance");

        let rebuilt = ValueSelector::create(selector.to_value(), None)
            .expect("serialized selector should rebuild")
            .into_one()
            .expect("single instance");
        assert_eq!(rebuilt, selector);
    }

    #[test]
    fn test_unknown_where_is_rejected() {
        let messages = ValueSelector::check(
            json!({"name": "observation", "where": "somewhere"}),
            None,
        );
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("'somewhere'"), "got: {}", messages[0]);
    }

    #[test]
    fn test_associated_field_overlay_restores_default_path() {
        let mut field = AssociatedField::new("value_date", Some("datetime"));
        field.path = vec!["dateTime".to_string()];

        let ctx = BuildContext::new(None);
        let Value::Object(cfg) = json!({"name": "observed_at", "path": []}) else {
            unreachable!()
        };
        field
            .overlay_configuration(&cfg, &ctx)
            .expect("overlay should apply");
        assert_eq!(field.name, "observed_at");
        assert_eq!(
            field.path,
            vec!["observed_at"],
            "cleared path falls back to the new name"
        );
    }
}
