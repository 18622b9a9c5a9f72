/// Evaluation orchestration.
///
/// The `Evaluator` takes a validated `EvaluationSpecification` and runs the
/// whole pipeline: reconcile field names, load crosswalk and time-series
/// data, join observations to predictions per location pair, normalize
/// units, materialize thresholds, and score each pair with the configured
/// scheme. Field-name problems surface before any data is read.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::errors::{EvaluationError, SpecificationError};
use crate::frames::{self, FieldValue, Frame};
use crate::logging::{self, Component};
use crate::metrics::{MetricResults, ScoringScheme, Threshold, ThresholdValue};
use crate::retrieval;
use crate::specification::{EvaluationSpecification, Specification, ThresholdSpecification};
use crate::units;

/// Run an evaluation end to end.
pub fn evaluate(
    specification: EvaluationSpecification,
) -> Result<EvaluationResults, EvaluationError> {
    Evaluator::new(specification)?.evaluate()
}

// ----------------------------------------------------------------------------
// Evaluator
// ----------------------------------------------------------------------------

pub struct Evaluator {
    specification: EvaluationSpecification,
    /// The shared value field name across observation and prediction
    /// selectors.
    field_name: String,
    observation_x_axis: String,
    prediction_x_axis: String,
    /// Joined column names carrying the two value series.
    observation_field: String,
    prediction_field: String,
    /// Crosswalk key column names.
    observation_key: String,
    prediction_key: String,
}

impl Evaluator {
    pub fn new(specification: EvaluationSpecification) -> Result<Self, EvaluationError> {
        let messages = specification.validate();
        if !messages.is_empty() {
            return Err(EvaluationError::Specification(SpecificationError::invalid(
                EvaluationSpecification::SPECIFICATION_TYPE,
                messages,
            )));
        }

        let observed_name = unique(
            specification
                .observations
                .iter()
                .flat_map(|source| source.value_selectors.iter().map(|s| s.name.clone())),
            "Observation sources use mismatched value fields",
        )?;
        let predicted_name = unique(
            specification
                .predictions
                .iter()
                .flat_map(|source| source.value_selectors.iter().map(|s| s.name.clone())),
            "Prediction sources use mismatched value fields",
        )?;
        if observed_name != predicted_name {
            return Err(EvaluationError::FieldMismatch(format!(
                "The observed field '{}' does not match the predicted field '{}'",
                observed_name, predicted_name
            )));
        }

        let observation_x_axis = unique(
            specification
                .observations
                .iter()
                .map(|source| source.x_axis.clone()),
            "Observation sources use mismatched x axes",
        )?;
        let prediction_x_axis = unique(
            specification
                .predictions
                .iter()
                .map(|source| source.x_axis.clone()),
            "Prediction sources use mismatched x axes",
        )?;

        unique(
            specification
                .observations
                .iter()
                .map(|source| source.value_field.clone()),
            "Observation sources use mismatched value field columns",
        )?;
        unique(
            specification
                .predictions
                .iter()
                .map(|source| source.value_field.clone()),
            "Prediction sources use mismatched value field columns",
        )?;

        let observation_key = unique(
            specification
                .crosswalks
                .iter()
                .map(|crosswalk| crosswalk.observation_field_name.clone()),
            "Crosswalk sources use mismatched observation field names",
        )?;
        let prediction_key = unique(
            specification
                .crosswalks
                .iter()
                .map(|crosswalk| crosswalk.prediction_field_name.clone()),
            "Crosswalk sources use mismatched prediction field names",
        )?;

        Ok(Evaluator {
            observation_field: format!("{}_observation", observed_name),
            prediction_field: format!("{}_prediction", observed_name),
            field_name: observed_name,
            observation_x_axis,
            prediction_x_axis,
            observation_key,
            prediction_key,
            specification,
        })
    }

    pub fn evaluate(&self) -> Result<EvaluationResults, EvaluationError> {
        logging::info(
            Component::Evaluation,
            self.specification.name.as_deref(),
            "starting evaluation",
        );

        let crosswalk = self.get_crosswalk()?;
        let mut data = self.get_data_to_evaluate(&crosswalk)?;
        self.apply_application_rules(&mut data)?;
        self.normalize_values(&mut data)?;

        let observation_units = units_by_location(&data, self.observation_key.as_str());
        let thresholds = self.get_thresholds(&observation_units)?;
        let scheme = self
            .specification
            .scheme
            .generate_scheme()
            .map_err(EvaluationError::Specification)?;

        self.score(&data, &thresholds, &scheme)
    }

    /// Concatenate every crosswalk source into one mapping table.
    fn get_crosswalk(&self) -> Result<Frame, EvaluationError> {
        let mut crosswalk = Frame::new();
        for source in &self.specification.crosswalks {
            crosswalk.extend(retrieval::get_crosswalk_data(source)?);
        }
        if crosswalk.is_empty() {
            return Err(EvaluationError::NoCrosswalkData);
        }
        logging::info(
            Component::Evaluation,
            None,
            &format!("crosswalk covers {} location pair(s)", crosswalk.len()),
        );
        Ok(crosswalk)
    }

    /// Load both sides and join them through the crosswalk: observations by
    /// their location, predictions by the cross-walked location and shared
    /// time axis.
    fn get_data_to_evaluate(&self, crosswalk: &Frame) -> Result<Frame, EvaluationError> {
        let mut observations = Frame::new();
        for source in &self.specification.observations {
            observations.extend(retrieval::get_data(source)?);
        }
        let mut predictions = Frame::new();
        for source in &self.specification.predictions {
            predictions.extend(retrieval::get_data(source)?);
        }

        for (frame, label) in [(&observations, "observation"), (&predictions, "prediction")] {
            if !frame.is_empty() && !frame.has_column("location") {
                return Err(EvaluationError::MissingColumn {
                    column: "location".to_string(),
                    context: format!("retrieved {} data", label),
                });
            }
        }

        let with_observations = crosswalk.inner_join(
            &observations,
            &[self.observation_key.as_str()],
            &["location"],
            "",
            "",
        );
        let joined = with_observations.inner_join(
            &predictions,
            &[self.prediction_key.as_str(), self.observation_x_axis.as_str()],
            &["location", self.prediction_x_axis.as_str()],
            "_observation",
            "_prediction",
        );

        logging::info(
            Component::Evaluation,
            None,
            &format!("joined {} comparable row(s)", joined.len()),
        );
        Ok(joined)
    }

    /// Synthesize the key columns threshold application rules call for, one
    /// per side, named `<field>_observation` / `<field>_prediction`.
    fn apply_application_rules(&self, data: &mut Frame) -> Result<(), EvaluationError> {
        for source in &self.specification.thresholds {
            let Some(rules) = &source.application_rules else {
                continue;
            };
            let sides = [
                (
                    rules.observation_field.as_ref(),
                    "_observation",
                    self.observation_x_axis.as_str(),
                ),
                (
                    rules.prediction_field.as_ref(),
                    "_prediction",
                    self.observation_x_axis.as_str(),
                ),
            ];
            for (field, suffix, fallback_column) in sides {
                let Some(field) = field else { continue };
                let target = format!("{}{}", field.name, suffix);
                let datatype = field.datatype.as_deref().unwrap_or("day");
                for row in data.rows_mut() {
                    let mut values: Vec<FieldValue> = field
                        .path
                        .iter()
                        .filter_map(|column| row.get(column).cloned())
                        .collect();
                    if values.is_empty() {
                        if let Some(value) = row.get(fallback_column).cloned() {
                            values.push(value);
                        }
                    }
                    if values.is_empty() {
                        continue;
                    }
                    let combined = frames::combine_to_datatype(&values, datatype)
                        .map_err(EvaluationError::ParseError)?;
                    row.set(target.clone(), combined);
                }
            }
        }
        Ok(())
    }

    /// Bring predicted values into the observed unit so thresholds and
    /// metrics compare like with like. A no-op when the units already agree.
    fn normalize_values(&self, data: &mut Frame) -> Result<(), EvaluationError> {
        let prediction_field = self.prediction_field.clone();
        for row in data.rows_mut() {
            let observed_unit = match row.get("unit_observation").and_then(|u| u.as_text()) {
                Some(unit) => unit.to_string(),
                None => continue,
            };
            let predicted_unit = match row.get("unit_prediction").and_then(|u| u.as_text()) {
                Some(unit) => unit.to_string(),
                None => continue,
            };
            if units::same_unit(&observed_unit, &predicted_unit) {
                continue;
            }
            let Some(value) = row.get(&prediction_field).and_then(|v| v.as_number()) else {
                continue;
            };
            let converted = units::convert(value, &predicted_unit, &observed_unit)?;
            row.set(prediction_field.clone(), FieldValue::Number(converted));
            row.set("unit_prediction", FieldValue::Text(observed_unit));
        }
        Ok(())
    }

    /// Materialize thresholds grouped by observed location, each converted
    /// into the unit that location reports its observations in.
    fn get_thresholds(
        &self,
        observation_units: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, Vec<Threshold>>, EvaluationError> {
        let mut by_location: BTreeMap<String, Vec<Threshold>> = BTreeMap::new();

        for source in &self.specification.thresholds {
            let (observed_key, predicted_key) = rule_keys(source);
            for retrieved in retrieval::get_threshold_data(source)? {
                let target = observation_units.get(&retrieved.location).map(String::as_str);
                let value = convert_threshold(retrieved.value, retrieved.unit.as_deref(), target)?;
                by_location
                    .entry(retrieved.location.clone())
                    .or_default()
                    .push(Threshold {
                        name: retrieved.name,
                        weight: retrieved.weight,
                        value,
                        observed_key: observed_key.clone(),
                        predicted_key: predicted_key.clone(),
                    });
            }
        }

        Ok(by_location)
    }

    /// Score each location pair. Pairs without thresholds are skipped.
    fn score(
        &self,
        data: &Frame,
        thresholds: &BTreeMap<String, Vec<Threshold>>,
        scheme: &ScoringScheme,
    ) -> Result<EvaluationResults, EvaluationError> {
        let mut pairs = Vec::new();
        let mut location_map = BTreeMap::new();

        for (key, group) in
            data.group_by(&[self.observation_key.as_str(), self.prediction_key.as_str()])
        {
            let observed_location = key[0].clone();
            let predicted_location = key[1].clone();

            let Some(location_thresholds) = thresholds.get(&observed_location) else {
                logging::debug(
                    Component::Evaluation,
                    Some(&observed_location),
                    "no thresholds for location; skipping",
                );
                continue;
            };

            let results = scheme.score(
                &group,
                &self.observation_field,
                &self.prediction_field,
                location_thresholds,
            );
            append_location(&mut location_map, &observed_location, &predicted_location);
            append_location(&mut location_map, &predicted_location, &observed_location);
            pairs.push(((observed_location, predicted_location), results));
        }

        let results = EvaluationResults::new(pairs, location_map);
        logging::info(
            Component::Evaluation,
            self.specification.name.as_deref(),
            &format!(
                "evaluated {} location pair(s), grade {:.2}",
                results.pair_count(),
                results.grade()
            ),
        );
        Ok(results)
    }
}

/// The shared field name of this evaluation: `<field>` in the joined
/// `<field>_observation` / `<field>_prediction` columns.
impl Evaluator {
    pub fn field_name(&self) -> &str {
        &self.field_name
    }
}

/// Record a pairing in one direction without duplicating it. A location can
/// cross-walk to several counterparts, so the map holds lists.
fn append_location(map: &mut BTreeMap<String, Vec<String>>, from: &str, to: &str) {
    let entry = map.entry(from.to_string()).or_default();
    if !entry.iter().any(|existing| existing == to) {
        entry.push(to.to_string());
    }
}

fn unique(
    names: impl Iterator<Item = String>,
    message: &str,
) -> Result<String, EvaluationError> {
    let mut distinct: Vec<String> = Vec::new();
    for name in names {
        if !distinct.contains(&name) {
            distinct.push(name);
        }
    }
    match distinct.len() {
        1 => Ok(distinct.into_iter().next().unwrap_or_default()),
        0 => Err(EvaluationError::FieldMismatch(format!(
            "{}: none are configured",
            message
        ))),
        _ => Err(EvaluationError::FieldMismatch(format!(
            "{}: {}",
            message,
            distinct.join(", ")
        ))),
    }
}

fn rule_keys(source: &ThresholdSpecification) -> (Option<String>, Option<String>) {
    match &source.application_rules {
        Some(rules) => (
            rules
                .observation_field
                .as_ref()
                .map(|field| format!("{}_observation", field.name)),
            rules
                .prediction_field
                .as_ref()
                .map(|field| format!("{}_prediction", field.name)),
        ),
        None => (None, None),
    }
}

fn convert_threshold(
    value: ThresholdValue,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<ThresholdValue, EvaluationError> {
    let (Some(from), Some(to)) = (from, to) else {
        return Ok(value);
    };
    if units::same_unit(from, to) {
        return Ok(value);
    }
    match value {
        ThresholdValue::Scalar(scalar) => {
            Ok(ThresholdValue::Scalar(units::convert(scalar, from, to)?))
        }
        ThresholdValue::Series(series) => {
            let mut converted = BTreeMap::new();
            for (key, scalar) in series {
                converted.insert(key, units::convert(scalar, from, to)?);
            }
            Ok(ThresholdValue::Series(converted))
        }
    }
}

/// First non-null observation unit seen for each observed location. Sources
/// can report in different units, so one global unit is not enough.
fn units_by_location(data: &Frame, location_column: &str) -> BTreeMap<String, String> {
    let mut units = BTreeMap::new();
    for row in data.rows() {
        let Some(location) = row.get(location_column).and_then(|v| v.as_text()) else {
            continue;
        };
        if units.contains_key(location) {
            continue;
        }
        if let Some(unit) = row.get("unit_observation").and_then(|u| u.as_text()) {
            units.insert(location.to_string(), unit.to_string());
        }
    }
    units
}

// ----------------------------------------------------------------------------
// Results
// ----------------------------------------------------------------------------

/// The outcome of a whole evaluation: per-pair metric results plus rolled-up
/// totals and distribution statistics.
#[derive(Debug, Clone)]
pub struct EvaluationResults {
    pairs: Vec<((String, String), MetricResults)>,
    location_map: BTreeMap<String, Vec<String>>,
    total: f64,
    maximum_value: f64,
}

impl EvaluationResults {
    fn new(
        pairs: Vec<((String, String), MetricResults)>,
        location_map: BTreeMap<String, Vec<String>>,
    ) -> Self {
        let total = pairs.iter().map(|(_, results)| results.total()).sum();
        let maximum_value = pairs.iter().map(|(_, results)| results.maximum()).sum();
        EvaluationResults {
            pairs,
            location_map,
            total,
            maximum_value,
        }
    }

    pub fn pairs(&self) -> &[((String, String), MetricResults)] {
        &self.pairs
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Every cross-walked counterpart of a location, in either direction.
    /// Empty when the location was not scored.
    pub fn counterparts(&self, location: &str) -> &[String] {
        self.location_map
            .get(location)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn maximum_value(&self) -> f64 {
        self.maximum_value
    }

    /// Earned share of the available weight, in [0, 1]. NaN when nothing
    /// could be scored.
    pub fn performance(&self) -> f64 {
        if self.maximum_value == 0.0 {
            return f64::NAN;
        }
        self.total / self.maximum_value
    }

    /// Performance as a percentage truncated to two decimals, so 0.99999
    /// reads 99.99 rather than rounding up to a perfect score.
    pub fn grade(&self) -> f64 {
        let performance = self.performance();
        if performance.is_nan() {
            return f64::NAN;
        }
        (performance * 10000.0).trunc() / 100.0
    }

    fn normalized_values(&self) -> Vec<f64> {
        self.pairs
            .iter()
            .flat_map(|(_, results)| results.normalized_values())
            .collect()
    }

    pub fn mean(&self) -> f64 {
        let values = self.normalized_values();
        if values.is_empty() {
            return f64::NAN;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    pub fn median(&self) -> f64 {
        let mut values = self.normalized_values();
        if values.is_empty() {
            return f64::NAN;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let middle = values.len() / 2;
        if values.len() % 2 == 1 {
            values[middle]
        } else {
            (values[middle - 1] + values[middle]) / 2.0
        }
    }

    pub fn standard_deviation(&self) -> f64 {
        let values = self.normalized_values();
        if values.len() < 2 {
            return f64::NAN;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        variance.sqrt()
    }

    /// Serialize for reports. NaN becomes null.
    pub fn to_value(&self) -> Value {
        let pairs: Vec<Value> = self
            .pairs
            .iter()
            .map(|((observed, predicted), results)| {
                let thresholds: Vec<Value> = results
                    .thresholds
                    .iter()
                    .map(|(threshold, scores)| {
                        let scores: Vec<Value> = scores
                            .iter()
                            .map(|score| {
                                json!({
                                    "metric": score.metric,
                                    "value": number_or_null(score.value),
                                    "normalized": number_or_null(score.normalized),
                                    "scaled_value": number_or_null(score.scaled_value),
                                    "weight": score.weight,
                                })
                            })
                            .collect();
                        json!({"threshold": threshold, "scores": scores})
                    })
                    .collect();
                json!({
                    "observed_location": observed,
                    "predicted_location": predicted,
                    "total": number_or_null(results.total()),
                    "maximum": number_or_null(results.maximum()),
                    "thresholds": thresholds,
                })
            })
            .collect();

        let mut map = Map::new();
        map.insert("total".to_string(), number_or_null(self.total));
        map.insert("maximum_value".to_string(), number_or_null(self.maximum_value));
        map.insert("performance".to_string(), number_or_null(self.performance()));
        map.insert("grade".to_string(), number_or_null(self.grade()));
        map.insert("mean".to_string(), number_or_null(self.mean()));
        map.insert("median".to_string(), number_or_null(self.median()));
        map.insert(
            "standard_deviation".to_string(),
            number_or_null(self.standard_deviation()),
        );
        map.insert("pairs".to_string(), Value::Array(pairs));
        map.insert(
            "location_map".to_string(),
            Value::Object(
                self.location_map
                    .iter()
                    .map(|(key, counterparts)| {
                        let rendered = counterparts
                            .iter()
                            .map(|location| Value::String(location.clone()))
                            .collect();
                        (key.clone(), Value::Array(rendered))
                    })
                    .collect(),
            ),
        );
        Value::Object(map)
    }
}

fn number_or_null(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
