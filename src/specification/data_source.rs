/// Observation and prediction dataset specifications.

use serde_json::{Map, Value};

use crate::specification::backend::{BackendSpecification, LoaderSpecification};
use crate::specification::base::{
    BuildContext, FieldDescriptor, FieldKind, FieldReader, PropertyMap, Specification,
    TemplatedSpecification, overlay_opt_spec, overlay_spec, overlay_spec_list, overlay_text,
    push_properties, push_spec_list,
};
use crate::specification::fields::{FieldMappingSpecification, ValueSelector};
use crate::specification::locations::LocationSpecification;
use crate::specification::unit::UnitDefinition;

/// Default join axis when a source does not declare its own.
pub const DEFAULT_X_AXIS: &str = "value_date";

/// Default output column for extracted values.
pub const DEFAULT_VALUE_FIELD: &str = "value";

/// One observation or prediction dataset: where the bytes come from, how
/// values are selected out of them, what unit they carry, and how rows are
/// keyed for joining.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceSpecification {
    pub name: String,
    pub backend: BackendSpecification,
    pub value_selectors: Vec<ValueSelector>,
    pub unit: UnitDefinition,
    pub locations: Option<LocationSpecification>,
    pub field_mapping: Vec<FieldMappingSpecification>,
    /// Join key column, shared across all sources of the same role.
    pub x_axis: String,
    /// Output column the extracted values land in.
    pub value_field: String,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

const SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::required("name", FieldKind::Text),
    FieldDescriptor::required("backend", FieldKind::Spec),
    FieldDescriptor::required("value_selectors", FieldKind::SpecList),
    FieldDescriptor::required("unit", FieldKind::Spec),
    FieldDescriptor::optional("locations", FieldKind::Spec),
    FieldDescriptor::optional("field_mapping", FieldKind::SpecList),
    FieldDescriptor::optional("x_axis", FieldKind::Text),
    FieldDescriptor::optional("value_field", FieldKind::Text),
];

impl Specification for DataSourceSpecification {
    const SPECIFICATION_TYPE: &'static str = "DataSourceSpecification";

    fn schema() -> &'static [FieldDescriptor] {
        SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, ctx: &BuildContext) -> Result<Self, String> {
        Ok(DataSourceSpecification {
            name: fields.take_required_text("name")?,
            backend: fields.take_required_spec("backend", ctx)?,
            value_selectors: fields.take_spec_list("value_selectors", ctx)?,
            unit: fields.take_required_spec("unit", ctx)?,
            locations: fields.take_spec("locations", ctx)?,
            field_mapping: fields.take_spec_list("field_mapping", ctx)?,
            x_axis: fields
                .take_text("x_axis")?
                .unwrap_or_else(|| DEFAULT_X_AXIS.to_string()),
            value_field: fields
                .take_text("value_field")?
                .unwrap_or_else(|| DEFAULT_VALUE_FIELD.to_string()),
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        map.insert("backend".to_string(), self.backend.to_value());
        push_spec_list(&mut map, "value_selectors", &self.value_selectors);
        map.insert("unit".to_string(), self.unit.to_value());
        if let Some(locations) = &self.locations {
            map.insert("locations".to_string(), locations.to_value());
        }
        push_spec_list(&mut map, "field_mapping", &self.field_mapping);
        map.insert("x_axis".to_string(), Value::String(self.x_axis.clone()));
        map.insert(
            "value_field".to_string(),
            Value::String(self.value_field.clone()),
        );
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if self.value_selectors.is_empty() {
            messages.push(format!(
                "data source '{}' requires at least one value selector",
                self.name
            ));
        }
        messages
    }

    fn validate(&self) -> Vec<String> {
        let mut messages = self.validate_self();
        messages.extend(self.backend.validate());
        for selector in &self.value_selectors {
            messages.extend(selector.validate());
        }
        messages.extend(self.unit.validate());
        if let Some(locations) = &self.locations {
            messages.extend(locations.validate());
        }
        for mapping in &self.field_mapping {
            messages.extend(mapping.validate());
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

impl TemplatedSpecification for DataSourceSpecification {
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
        overlay_spec(&mut self.backend, cfg, "backend", ctx)?;
        overlay_spec_list(&mut self.value_selectors, cfg, "value_selectors", ctx)?;
        overlay_spec(&mut self.unit, cfg, "unit", ctx)?;
        overlay_opt_spec(&mut self.locations, cfg, "locations", ctx)?;
        overlay_spec_list(&mut self.field_mapping, cfg, "field_mapping", ctx)?;
        overlay_text(&mut self.x_axis, cfg, "x_axis");
        overlay_text(&mut self.value_field, cfg, "value_field");
        Ok(())
    }
}

impl LoaderSpecification for DataSourceSpecification {
    fn backend(&self) -> &BackendSpecification {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "name": "observations",
            "backend": {"backend_type": "file", "address": "obs.json", "format": "json"},
            "value_selectors": [{
                "name": "observation",
                "where": "value",
                "origin": "records/*",
                "path": "flow",
                "datatype": "float",
                "associated_fields": [{"name": "value_date", "datatype": "datetime"}]
            }],
            "unit": "ft^3/s"
        })
    }

    #[test]
    fn test_axis_and_value_field_defaults() {
        let source = DataSourceSpecification::create(minimal(), None)
            .expect("valid data source")
            .into_one()
            .expect("single instance");
        assert_eq!(source.x_axis, "value_date");
        assert_eq!(source.value_field, "value");
    }

    #[test]
    fn test_round_trip() {
        let source = DataSourceSpecification::create(minimal(), None)
            .expect("valid data source")
            .into_one()
            .expect("single instance");
        let rebuilt = DataSourceSpecification::create(source.to_value(), None)
            .expect("serialized form should rebuild")
            .into_one()
            .expect("single instance");
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn test_nested_validation_bubbles_up() {
        let mut invalid = minimal();
        invalid["unit"] = json!({});
        let messages = DataSourceSpecification::check(invalid, None);
        assert!(
            messages
                .iter()
                .any(|m| m.contains("exactly one of 'value', 'field', or 'path'")),
            "got: {:?}",
            messages
        );
    }

    #[test]
    fn test_empty_selector_list_is_invalid() {
        let mut invalid = minimal();
        invalid["value_selectors"] = json!([]);
        let messages = DataSourceSpecification::check(invalid, None);
        assert!(
            messages
                .iter()
                .any(|m| m.contains("at least one value selector")),
            "got: {:?}",
            messages
        );
    }

    #[test]
    fn test_list_overlay_matches_by_name_and_appends_the_rest() {
        let ctx = BuildContext::new(None);
        let mut source = DataSourceSpecification::create(minimal(), None)
            .expect("valid data source")
            .into_one()
            .expect("single instance");

        let Value::Object(cfg) = json!({
            "value_selectors": [
                {"name": "observation", "datatype": "int"},
                {"name": "stage", "where": "value", "path": "stage"}
            ]
        }) else {
            unreachable!()
        };
        source
            .apply_configuration(&cfg, &ctx)
            .expect("overlay should apply");

        assert_eq!(source.value_selectors.len(), 2, "unmatched entry appended");
        assert_eq!(
            source.value_selectors[0].datatype.as_deref(),
            Some("int"),
            "matched entry updated in place"
        );
        assert_eq!(
            source.value_selectors[0].path,
            vec!["flow"],
            "keys absent from the overlay keep their old values"
        );
        assert_eq!(source.value_selectors[1].name, "stage");
    }
}
