/// The root evaluation specification.
///
/// Everything an evaluation needs hangs off this one document: where
/// observations and predictions come from, how their location identifiers
/// cross-walk to one another, which thresholds bucket the comparison, and
/// the scheme that scores it.

use serde_json::{Map, Value};

use crate::specification::base::{
    BuildContext, FieldDescriptor, FieldKind, FieldReader, PropertyMap, Specification,
    TemplatedSpecification, overlay_opt_text, overlay_spec, overlay_spec_list, push_properties,
    push_spec_list,
};
use crate::specification::crosswalk::CrosswalkSpecification;
use crate::specification::data_source::DataSourceSpecification;
use crate::specification::scoring::SchemeSpecification;
use crate::specification::threshold::ThresholdSpecification;

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSpecification {
    pub name: Option<String>,
    pub observations: Vec<DataSourceSpecification>,
    pub predictions: Vec<DataSourceSpecification>,
    pub crosswalks: Vec<CrosswalkSpecification>,
    pub thresholds: Vec<ThresholdSpecification>,
    pub scheme: SchemeSpecification,
    pub properties: PropertyMap,
    template_name: Option<String>,
}

impl EvaluationSpecification {
    /// The maximum score a single location pair can earn: every threshold
    /// source's definition weights plus the scheme's metric weights.
    pub fn weight_per_location(&self) -> f64 {
        let threshold_weight: f64 = self
            .thresholds
            .iter()
            .map(ThresholdSpecification::total_weight)
            .sum();
        threshold_weight + self.scheme.total_weight()
    }
}

const EVALUATION_SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::optional("name", FieldKind::Text),
    FieldDescriptor::required("observations", FieldKind::SpecList),
    FieldDescriptor::required("predictions", FieldKind::SpecList),
    FieldDescriptor::required("crosswalks", FieldKind::SpecList),
    FieldDescriptor::required("thresholds", FieldKind::SpecList),
    FieldDescriptor::required("scheme", FieldKind::Spec),
];

impl Specification for EvaluationSpecification {
    const SPECIFICATION_TYPE: &'static str = "EvaluationSpecification";

    fn schema() -> &'static [FieldDescriptor] {
        EVALUATION_SCHEMA
    }

    fn from_fields(fields: &mut FieldReader, ctx: &BuildContext) -> Result<Self, String> {
        Ok(EvaluationSpecification {
            name: fields.take_text("name")?,
            observations: fields.take_spec_list("observations", ctx)?,
            predictions: fields.take_spec_list("predictions", ctx)?,
            crosswalks: fields.take_spec_list("crosswalks", ctx)?,
            thresholds: fields.take_spec_list("thresholds", ctx)?,
            scheme: fields.take_required_spec("scheme", ctx)?,
            properties: fields.finish_properties(),
            template_name: None,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Value::String(name.clone()));
        }
        push_spec_list(&mut map, "observations", &self.observations);
        push_spec_list(&mut map, "predictions", &self.predictions);
        push_spec_list(&mut map, "crosswalks", &self.crosswalks);
        push_spec_list(&mut map, "thresholds", &self.thresholds);
        map.insert("scheme".to_string(), self.scheme.to_value());
        push_properties(&mut map, &self.properties);
        Value::Object(map)
    }

    fn validate_self(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if self.observations.is_empty() {
            messages.push("an evaluation requires at least one observation source".to_string());
        }
        if self.predictions.is_empty() {
            messages.push("an evaluation requires at least one prediction source".to_string());
        }
        if self.crosswalks.is_empty() {
            messages.push("an evaluation requires at least one crosswalk source".to_string());
        }
        if self.thresholds.is_empty() {
            messages.push("an evaluation requires at least one threshold source".to_string());
        }
        messages
    }

    fn validate(&self) -> Vec<String> {
        let mut messages = self.validate_self();
        for source in &self.observations {
            messages.extend(source.validate());
        }
        for source in &self.predictions {
            messages.extend(source.validate());
        }
        for crosswalk in &self.crosswalks {
            messages.extend(crosswalk.validate());
        }
        for thresholds in &self.thresholds {
            messages.extend(thresholds.validate());
        }
        messages.extend(self.scheme.validate());
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

impl TemplatedSpecification for EvaluationSpecification {
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
        overlay_spec_list(&mut self.observations, cfg, "observations", ctx)?;
        overlay_spec_list(&mut self.predictions, cfg, "predictions", ctx)?;
        overlay_spec_list(&mut self.crosswalks, cfg, "crosswalks", ctx)?;
        overlay_spec_list(&mut self.thresholds, cfg, "thresholds", ctx)?;
        overlay_spec(&mut self.scheme, cfg, "scheme", ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_evaluation() -> Value {
        json!({
            "name": "spring freshet check",
            "observations": [{
                "name": "gauges",
                "backend": {"backend_type": "file", "address": "obs.json", "format": "json"},
                "value_selectors": [{"name": "streamflow", "where": "value", "path": "values/*/flow"}],
                "unit": {"field": "unit_code"}
            }],
            "predictions": [{
                "name": "model",
                "backend": {"backend_type": "file", "address": "pred.csv", "format": "csv"},
                "value_selectors": [{"name": "streamflow", "where": "column"}],
                "unit": {"value": "cms"}
            }],
            "crosswalks": [{
                "backend": {"backend_type": "file", "address": "xwalk.json", "format": "json"},
                "field": {
                    "name": "site_no",
                    "where": "key",
                    "path": "*",
                    "associated_fields": [{"name": "model_id", "path": "reach"}]
                },
                "observation_field_name": "observed_location",
                "prediction_field_name": "predicted_location"
            }],
            "thresholds": [{
                "backend": {"backend_type": "file", "address": "stages.json", "format": "json"},
                "definitions": [
                    {"name": "Action", "field": "action_stage", "weight": 2, "unit": "cms"},
                    {"name": "Flood", "field": "flood_stage", "weight": 5, "unit": "cms"}
                ]
            }],
            "scheme": {
                "metrics": [
                    {"name": "probability_of_detection", "weight": 10},
                    {"name": "normalized_nash_sutcliffe", "weight": 15}
                ]
            }
        })
    }

    #[test]
    fn test_full_document_builds_and_round_trips() {
        let evaluation = EvaluationSpecification::create(minimal_evaluation(), None)
            .expect("valid evaluation document")
            .into_one()
            .expect("single instance");

        assert_eq!(evaluation.name.as_deref(), Some("spring freshet check"));
        assert_eq!(evaluation.observations.len(), 1);
        assert_eq!(evaluation.thresholds[0].definitions.len(), 2);

        let rebuilt = EvaluationSpecification::create(evaluation.to_value(), None)
            .expect("serialized form should rebuild")
            .into_one()
            .expect("single instance");
        assert_eq!(rebuilt, evaluation);
    }

    #[test]
    fn test_weight_per_location_combines_thresholds_and_scheme() {
        let evaluation = EvaluationSpecification::create(minimal_evaluation(), None)
            .expect("valid evaluation document")
            .into_one()
            .expect("single instance");
        // Threshold weights (2 + 5) plus metric weights (10 + 15).
        assert_eq!(evaluation.weight_per_location(), 32.0);
    }

    #[test]
    fn test_validation_messages_cover_every_nested_failure() {
        let mut broken = minimal_evaluation();
        broken["observations"][0]["value_selectors"][0]["where"] = json!("telepathy");
        broken["scheme"]["metrics"][0]["name"] = json!("vibes");

        let messages = EvaluationSpecification::check(broken, None);
        assert!(
            messages.iter().any(|m| m.contains("telepathy")),
            "selector failure should surface: {:?}",
            messages
        );
        assert!(
            messages.iter().any(|m| m.contains("vibes")),
            "metric failure should surface: {:?}",
            messages
        );
    }

    #[test]
    fn test_missing_collections_reported_together() {
        let error = EvaluationSpecification::create(
            json!({"scheme": {"metrics": ["pearson_correlation_coefficient"]}}),
            None,
        )
        .expect_err("empty evaluation should fail");
        let rendered = error.to_string();
        for field in ["observations", "predictions", "crosswalks", "thresholds"] {
            assert!(
                rendered.contains(field),
                "'{}' should be named in: {}",
                field,
                rendered
            );
        }
    }
}
