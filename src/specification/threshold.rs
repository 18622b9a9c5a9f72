/// Threshold specifications.
///
/// Thresholds are named, weighted values (or value series) that bucket the
/// data being scored — flood stages, percentile flows. A threshold source
/// declares where its table lives, which locations it covers, the ordered
/// definitions to extract, and optional application rules that let a
/// threshold keyed one way (day of year) match data keyed another
/// (full timestamps).

use serde_json::{Map, Value};

use crate::specification::backend::{BackendSpecification, LoaderSpecification};
use crate::specification::base::{
    BuildContext, FieldDescriptor, FieldKind, FieldReader, PropertyMap, Specification,
    TemplatedSpecification, overlay_number, overlay_opt_spec, overlay_opt_text, overlay_segments,
    overlay_spec, overlay_spec_list, overlay_text, push_properties, push_segments, push_spec_list,
};
use crate::specification::fields::AssociatedField;
use crate::specification::locations::LocationSpecification;
use crate::specification::unit::UnitDefinition;

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// One named threshold to extract: where its values live, its relative
/// weight, and the unit those values carry.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdDefinition {
    pub name: String,
    pub field: Vec<String>,
    pub weight: f64,
    pub unit: UnitDefinition,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

impl ThresholdDefinition {
    /// The terminal path segment, used as a secondary lookup key.
    pub fn terminal_field(&self) -> Option<&str> {
        self.field.last().map(String::as_str)
    }
}

const DEFINITION_SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::required("name", FieldKind::Text),
    FieldDescriptor::required("field", FieldKind::Segments),
    FieldDescriptor::required("weight", FieldKind::Number),
    FieldDescriptor::required("unit", FieldKind::Spec),
];

impl Specification for ThresholdDefinition {
    const SPECIFICATION_TYPE: &'static str = "ThresholdDefinition";

    fn schema() -> &'static [FieldDescriptor] {
        DEFINITION_SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, ctx: &BuildContext) -> Result<Self, String> {
        Ok(ThresholdDefinition {
            name: fields.take_required_text("name")?,
            field: fields.take_segments("field")?,
            weight: fields.take_required_number("weight")?,
            unit: fields.take_required_spec("unit", ctx)?,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        push_segments(&mut map, "field", &self.field);
        map.insert("weight".to_string(), serde_json::json!(self.weight));
        map.insert("unit".to_string(), self.unit.to_value());
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if self.field.is_empty() {
            messages.push(format!(
                "threshold definition '{}' requires a non-empty 'field' path",
                self.name
            ));
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            messages.push(format!(
                "threshold definition '{}' requires a positive weight",
                self.name
            ));
        }
        messages
    }

    fn validate(&self) -> Vec<String> {
        let mut messages = self.validate_self();
        messages.extend(self.unit.validate());
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

impl TemplatedSpecification for ThresholdDefinition {
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
        overlay_segments(&mut self.field, cfg, "field")?;
        overlay_number(&mut self.weight, cfg, "weight");
        overlay_spec(&mut self.unit, cfg, "unit", ctx)
    }
}

// ---------------------------------------------------------------------------
// Application rules
// ---------------------------------------------------------------------------

/// Extra field-transform rules letting threshold values key-match against
/// rows whose native index differs from the threshold's native index.
///
/// `threshold_field` combines columns of the threshold table into the series
/// key (month + day into a "day" value); `observation_field` and
/// `prediction_field` synthesize the matching key columns on the joined
/// data.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdApplicationRules {
    pub name: Option<String>,
    pub threshold_field: AssociatedField,
    pub observation_field: Option<AssociatedField>,
    pub prediction_field: Option<AssociatedField>,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

const RULES_SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::optional("name", FieldKind::Text),
    FieldDescriptor::required("threshold_field", FieldKind::Spec),
    FieldDescriptor::optional("observation_field", FieldKind::Spec),
    FieldDescriptor::optional("prediction_field", FieldKind::Spec),
];

impl Specification for ThresholdApplicationRules {
    const SPECIFICATION_TYPE: &'static str = "ThresholdApplicationRules";

    fn schema() -> &'static [FieldDescriptor] {
        RULES_SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, ctx: &BuildContext) -> Result<Self, String> {
        Ok(ThresholdApplicationRules {
            name: fields.take_text("name")?,
            threshold_field: fields.take_required_spec("threshold_field", ctx)?,
            observation_field: fields.take_spec("observation_field", ctx)?,
            prediction_field: fields.take_spec("prediction_field", ctx)?,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Value::String(name.clone()));
        }
        map.insert("threshold_field".to_string(), self.threshold_field.to_value());
        if let Some(observation_field) = &self.observation_field {
            map.insert("observation_field".to_string(), observation_field.to_value());
        }
        if let Some(prediction_field) = &self.prediction_field {
            map.insert("prediction_field".to_string(), prediction_field.to_value());
        }
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if self.observation_field.is_none() && self.prediction_field.is_none() {
            messages.push(
                "threshold application rules require at least one of \
                 'observation_field' or 'prediction_field'"
                    .to_string(),
            );
        }
        messages
    }

    fn validate(&self) -> Vec<String> {
        let mut messages = self.validate_self();
        messages.extend(self.threshold_field.validate());
        if let Some(observation_field) = &self.observation_field {
            messages.extend(observation_field.validate());
        }
        if let Some(prediction_field) = &self.prediction_field {
            messages.extend(prediction_field.validate());
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
        self.name.as_deref()
    }
}

impl TemplatedSpecification for ThresholdApplicationRules {
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
        overlay_spec(&mut self.threshold_field, cfg, "threshold_field", ctx)?;
        overlay_opt_spec(&mut self.observation_field, cfg, "observation_field", ctx)?;
        overlay_opt_spec(&mut self.prediction_field, cfg, "prediction_field", ctx)
    }
}

// ---------------------------------------------------------------------------
// Threshold sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpecification {
    pub name: Option<String>,
    pub backend: BackendSpecification,
    pub locations: Option<LocationSpecification>,
    pub definitions: Vec<ThresholdDefinition>,
    pub application_rules: Option<ThresholdApplicationRules>,
    pub origin: Vec<String>,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

impl ThresholdSpecification {
    /// Sum of definition weights; the total possible score contribution.
    pub fn total_weight(&self) -> f64 {
        self.definitions.iter().map(|definition| definition.weight).sum()
    }

    /// Case-insensitive lookup by definition name or terminal path segment.
    pub fn get(&self, key: &str) -> Option<&ThresholdDefinition> {
        self.definitions.iter().find(|definition| {
            definition.name.eq_ignore_ascii_case(key)
                || definition
                    .terminal_field()
                    .is_some_and(|field| field.eq_ignore_ascii_case(key))
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

const THRESHOLD_SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::optional("name", FieldKind::Text),
    FieldDescriptor::required("backend", FieldKind::Spec),
    FieldDescriptor::optional("locations", FieldKind::Spec),
    FieldDescriptor::required("definitions", FieldKind::SpecList),
    FieldDescriptor::optional("application_rules", FieldKind::Spec),
    FieldDescriptor::optional("origin", FieldKind::Segments),
];

impl Specification for ThresholdSpecification {
    const SPECIFICATION_TYPE: &'static str = "ThresholdSpecification";

    fn schema() -> &'static [FieldDescriptor] {
        THRESHOLD_SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, ctx: &BuildContext) -> Result<Self, String> {
        Ok(ThresholdSpecification {
            name: fields.take_text("name")?,
            backend: fields.take_required_spec("backend", ctx)?,
            locations: fields.take_spec("locations", ctx)?,
            definitions: fields.take_spec_list("definitions", ctx)?,
            application_rules: fields.take_spec("application_rules", ctx)?,
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
        if let Some(locations) = &self.locations {
            map.insert("locations".to_string(), locations.to_value());
        }
        push_spec_list(&mut map, "definitions", &self.definitions);
        if let Some(application_rules) = &self.application_rules {
            map.insert("application_rules".to_string(), application_rules.to_value());
        }
        push_segments(&mut map, "origin", &self.origin);
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if self.definitions.is_empty() {
            messages.push("a threshold source requires at least one definition".to_string());
        }
        messages
    }

    fn validate(&self) -> Vec<String> {
        let mut messages = self.validate_self();
        messages.extend(self.backend.validate());
        if let Some(locations) = &self.locations {
            messages.extend(locations.validate());
        }
        for definition in &self.definitions {
            messages.extend(definition.validate());
        }
        if let Some(application_rules) = &self.application_rules {
            messages.extend(application_rules.validate());
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
        self.name.as_deref().or(self.template_name.as_deref())
    }
}

impl TemplatedSpecification for ThresholdSpecification {
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
        overlay_opt_spec(&mut self.locations, cfg, "locations", ctx)?;
        overlay_spec_list(&mut self.definitions, cfg, "definitions", ctx)?;
        overlay_opt_spec(&mut self.application_rules, cfg, "application_rules", ctx)?;
        overlay_segments(&mut self.origin, cfg, "origin")
    }
}

impl LoaderSpecification for ThresholdSpecification {
    fn backend(&self) -> &BackendSpecification {
        &self.backend
    }
}
