/// Scoring scheme specifications.
///
/// A scheme names the metrics to compute and how heavily each one counts.
/// Metric names are resolved against the metric registry at validation time
/// so a typo fails before any data moves.

use serde_json::{Map, Value};

use crate::errors::SpecificationError;
use crate::metrics::{self, ScoringScheme};
use crate::specification::base::{
    BuildContext, FieldDescriptor, FieldKind, FieldReader, PropertyMap, Specification,
    TemplatedSpecification, overlay_number, overlay_spec_list, overlay_text, push_properties,
    push_spec_list,
};

pub const DEFAULT_METRIC_WEIGHT: f64 = 1.0;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpecification {
    pub name: String,
    pub weight: f64,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

const METRIC_SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::required("name", FieldKind::Text),
    FieldDescriptor::optional("weight", FieldKind::Number),
];

impl Specification for MetricSpecification {
    const SPECIFICATION_TYPE: &'static str = "MetricSpecification";

    fn schema() -> &'static [FieldDescriptor] {
        METRIC_SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, _ctx: &BuildContext) -> Result<Self, String> {
        Ok(MetricSpecification {
            name: fields.take_required_text("name")?,
            weight: fields.take_number("weight")?.unwrap_or(DEFAULT_METRIC_WEIGHT),
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        map.insert("weight".to_string(), serde_json::json!(self.weight));
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if !metrics::metric_exists(&self.name) {
            messages.push(format!("'{}' is not a recognized metric", self.name));
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            messages.push(format!("metric '{}' requires a positive weight", self.name));
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

    fn from_scalar(text: &str) -> Option<Self> {
        Some(MetricSpecification {
            name: text.to_string(),
            weight: DEFAULT_METRIC_WEIGHT,
            properties: PropertyMap::new(),
            template_name: None,
        })
    }
}

impl TemplatedSpecification for MetricSpecification {
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
        overlay_number(&mut self.weight, cfg, "weight");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Schemes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SchemeSpecification {
    pub metrics: Vec<MetricSpecification>,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

impl SchemeSpecification {
    /// Sum of metric weights; the scheme's total possible contribution per
    /// evaluated pair.
    pub fn total_weight(&self) -> f64 {
        self.metrics.iter().map(|metric| metric.weight).sum()
    }

    /// Instantiate the scoring machinery this scheme describes.
    pub fn generate_scheme(&self) -> Result<ScoringScheme, SpecificationError> {
        let mut instances = Vec::with_capacity(self.metrics.len());
        let mut messages = Vec::new();
        for metric in &self.metrics {
            match metrics::get_metric(&metric.name, metric.weight) {
                Ok(instance) => instances.push(instance),
                Err(error) => messages.push(error.to_string()),
            }
        }
        if !messages.is_empty() {
            return Err(SpecificationError::invalid(
                Self::SPECIFICATION_TYPE,
                messages,
            ));
        }
        Ok(ScoringScheme::new(instances))
    }
}

const SCHEME_SCHEMA: &[FieldDescriptor] =
    &[FieldDescriptor::required("metrics", FieldKind::SpecList)];

impl Specification for SchemeSpecification {
    const SPECIFICATION_TYPE: &'static str = "SchemeSpecification";

    fn schema() -> &'static [FieldDescriptor] {
        SCHEME_SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, ctx: &BuildContext) -> Result<Self, String> {
        Ok(SchemeSpecification {
            metrics: fields.take_spec_list("metrics", ctx)?,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        push_spec_list(&mut map, "metrics", &self.metrics);
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if self.metrics.is_empty() {
            messages.push("a scoring scheme requires at least one metric".to_string());
        }
        messages
    }

    fn validate(&self) -> Vec<String> {
        let mut messages = self.validate_self();
        for metric in &self.metrics {
            messages.extend(metric.validate());
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

impl TemplatedSpecification for SchemeSpecification {
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
        overlay_spec_list(&mut self.metrics, cfg, "metrics", ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scheme_builds_and_sums_weights() {
        let scheme = SchemeSpecification::create(
            json!({
                "metrics": [
                    {"name": "probability_of_detection", "weight": 10},
                    {"name": "false_alarm_ratio", "weight": 5},
                    {"name": "pearson_correlation_coefficient", "weight": 8}
                ]
            }),
            None,
        )
        .expect("valid scheme")
        .into_one()
        .expect("single instance");

        assert_eq!(scheme.total_weight(), 23.0);
        let generated = scheme.generate_scheme().expect("all metrics are registered");
        assert_eq!(generated.len(), 3);
    }

    #[test]
    fn test_unknown_metric_is_reported() {
        let messages = SchemeSpecification::check(
            json!({"metrics": [{"name": "clairvoyance", "weight": 1}]}),
            None,
        );
        assert!(
            messages.iter().any(|m| m.contains("clairvoyance")),
            "got: {:?}",
            messages
        );
    }

    #[test]
    fn test_bare_metric_names_get_default_weight() {
        let metric = MetricSpecification::create(json!("normalized_nash_sutcliffe"), None)
            .expect("scalar metric name")
            .into_one()
            .expect("single instance");
        assert_eq!(metric.weight, DEFAULT_METRIC_WEIGHT);
    }
}
