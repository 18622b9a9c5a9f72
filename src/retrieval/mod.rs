/// Data retrieval.
///
/// Connects loader specifications to backends and format parsers and hands
/// back frames with a stable shape: one column per selector (named after the
/// selector), one column per associated field, plus "location" and "unit"
/// columns. Crosswalk and threshold sources get their own entry points since
/// their output shapes differ from time-series data.

pub mod csv;
pub mod json;

use std::path::Path;

use regex::Regex;
use serde_json::Value;

use crate::backends::build_backend;
use crate::errors::EvaluationError;
use crate::frames::{self, Frame};
use crate::logging::{self, Component};
use crate::metrics::ThresholdValue;
use crate::specification::{
    CrosswalkSpecification, DataSourceSpecification, FieldMappingSpecification,
    LoaderSpecification, LocationSpecification, ThresholdSpecification, UnitDefinition,
    ValueSelector,
};
use crate::specification::fields::{WHERE_FILENAME, WHERE_KEY};

// ----------------------------------------------------------------------------
// Source context
// ----------------------------------------------------------------------------

/// Everything a format parser needs to know about the source it is reading,
/// beyond the selectors themselves.
pub struct SourceContext<'a> {
    pub x_axis: &'a str,
    pub value_field: &'a str,
    pub locations: Option<&'a LocationSpecification>,
    pub unit: Option<&'a UnitDefinition>,
    pub source_index: usize,
    pub identifier: &'a str,
}

impl SourceContext<'_> {
    /// The location explicitly assigned to this whole source, when the
    /// specification lists ids. Ids pair with sources positionally; extra
    /// sources reuse the last id.
    pub fn assigned_location(&self) -> Option<String> {
        let locations = self.locations?;
        if locations.ids.is_empty() {
            return None;
        }
        locations
            .ids
            .get(self.source_index)
            .or_else(|| locations.ids.last())
            .cloned()
    }

    /// Whether rows without a resolvable location should be dropped.
    pub fn wants_location(&self) -> bool {
        self.locations.is_some()
    }

    pub fn file_stem(&self) -> String {
        Path::new(self.identifier)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.identifier.to_string())
    }

    /// Run a raw location string through the identification pattern. The
    /// first capture group wins, then the whole match; no match means the
    /// row is not one of the configured locations.
    pub fn apply_pattern(&self, raw: &str) -> Option<String> {
        let pattern = match self.locations.and_then(|locations| locations.pattern.as_deref()) {
            Some(pattern) => pattern,
            None => return Some(raw.to_string()),
        };
        let regex = Regex::new(pattern).ok()?;
        let captures = regex.captures(raw)?;
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|found| found.as_str().to_string())
    }
}

// ----------------------------------------------------------------------------
// Format registry
// ----------------------------------------------------------------------------

type Retriever = fn(&[u8], &[ValueSelector], &SourceContext) -> Result<Frame, EvaluationError>;

const FORMATS: &[(&str, Retriever)] = &[("json", json::retrieve), ("csv", csv::retrieve)];

fn get_retriever(format: &str) -> Result<Retriever, EvaluationError> {
    let key = format.to_lowercase();
    FORMATS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, retriever)| *retriever)
        .ok_or(EvaluationError::UnsupportedFormat(key))
}

// ----------------------------------------------------------------------------
// Time-series data
// ----------------------------------------------------------------------------

/// Load every source of a data source specification into one frame.
pub fn get_data(specification: &DataSourceSpecification) -> Result<Frame, EvaluationError> {
    let backend = build_backend(specification.backend())?;
    let retriever = get_retriever(&specification.backend.format)?;

    let mut combined = Frame::new();
    let sources: Vec<String> = backend.sources().to_vec();
    for (source_index, identifier) in sources.iter().enumerate() {
        let bytes = backend.read(identifier)?;
        let ctx = SourceContext {
            x_axis: &specification.x_axis,
            value_field: &specification.value_field,
            locations: specification.locations.as_ref(),
            unit: Some(&specification.unit),
            source_index,
            identifier,
        };
        let mut frame = retriever(&bytes, &specification.value_selectors, &ctx)?;
        apply_field_mapping(&mut frame, &specification.field_mapping);
        combined.extend(frame);
    }

    logging::info(
        Component::Retrieval,
        Some(&specification.name),
        &format!(
            "loaded {} row(s) from {} source(s)",
            combined.len(),
            sources.len()
        ),
    );
    Ok(combined)
}

/// Rename retrieved columns per the specification's field mappings.
fn apply_field_mapping(frame: &mut Frame, mappings: &[FieldMappingSpecification]) {
    for mapping in mappings {
        if mapping.map_type != "column" && mapping.map_type != "field" {
            logging::warn(
                Component::Retrieval,
                None,
                &format!("ignoring field mapping of type '{}'", mapping.map_type),
            );
            continue;
        }
        for row in frame.rows_mut() {
            row.rename(&mapping.value, &mapping.field);
        }
    }
}

// ----------------------------------------------------------------------------
// Crosswalk data
// ----------------------------------------------------------------------------

/// Load a crosswalk source into a two-column mapping frame: the selector's
/// value under the observation field name, its first associated field under
/// the prediction field name.
pub fn get_crosswalk_data(
    specification: &CrosswalkSpecification,
) -> Result<Frame, EvaluationError> {
    let backend = build_backend(specification.backend())?;
    let retriever = get_retriever(&specification.backend.format)?;

    let mut selector = specification.field.clone();
    if selector.origin.is_empty() {
        selector.origin = specification.origin.clone();
    }
    let selectors = [selector.clone()];
    let predicted_source = selector
        .associated_fields
        .first()
        .map(|field| field.name.clone())
        .ok_or_else(|| {
            EvaluationError::LocationError(
                "a crosswalk field requires an associated field carrying the predicted \
                 location identifier"
                    .to_string(),
            )
        })?;

    let mut combined = Frame::new();
    let sources: Vec<String> = backend.sources().to_vec();
    for (source_index, identifier) in sources.iter().enumerate() {
        let bytes = backend.read(identifier)?;
        let ctx = SourceContext {
            x_axis: "value_date",
            value_field: "value",
            locations: None,
            unit: None,
            source_index,
            identifier,
        };
        let mut frame = retriever(&bytes, &selectors, &ctx)?;
        for row in frame.rows_mut() {
            row.remove("location");
            row.rename(&selector.name, &specification.observation_field_name);
            row.rename(&predicted_source, &specification.prediction_field_name);
        }
        combined.extend(frame);
    }

    // Pairs missing either side cannot anchor a join.
    let mut mapping = Frame::new();
    for row in combined.rows() {
        let complete = row
            .get(&specification.observation_field_name)
            .is_some_and(|value| !value.is_null())
            && row
                .get(&specification.prediction_field_name)
                .is_some_and(|value| !value.is_null());
        if complete {
            mapping.push(row.clone());
        }
    }

    Ok(mapping)
}

// ----------------------------------------------------------------------------
// Threshold data
// ----------------------------------------------------------------------------

/// One threshold extracted for one location, still in its native unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedThreshold {
    pub location: String,
    pub name: String,
    pub weight: f64,
    pub unit: Option<String>,
    pub value: ThresholdValue,
}

/// Extract every configured threshold definition for every location a
/// threshold source covers.
pub fn get_threshold_data(
    specification: &ThresholdSpecification,
) -> Result<Vec<RetrievedThreshold>, EvaluationError> {
    let backend = build_backend(specification.backend())?;
    let format = specification.backend.format.to_lowercase();
    if format != "json" {
        return Err(EvaluationError::UnsupportedFormat(format));
    }

    let mut extracted = Vec::new();
    let sources: Vec<String> = backend.sources().to_vec();
    for (source_index, identifier) in sources.iter().enumerate() {
        let bytes = backend.read(identifier)?;
        let document: Value = serde_json::from_slice(&bytes).map_err(|error| {
            EvaluationError::ParseError(format!("invalid JSON from '{}': {}", identifier, error))
        })?;
        let ctx = SourceContext {
            x_axis: "value_date",
            value_field: "value",
            locations: specification.locations.as_ref(),
            unit: None,
            source_index,
            identifier,
        };

        for container in json::expand(&document, &specification.origin) {
            let location = match threshold_location(&ctx, &container) {
                Some(location) => location,
                None => continue,
            };
            for definition in &specification.definitions {
                if let Some(threshold) =
                    extract_definition(specification, definition, &container, &document, &location)?
                {
                    extracted.push(threshold);
                }
            }
        }
    }

    logging::info(
        Component::Retrieval,
        None,
        &format!("extracted {} threshold value(s)", extracted.len()),
    );
    Ok(extracted)
}

fn threshold_location(ctx: &SourceContext, container: &json::Expansion<'_>) -> Option<String> {
    if let Some(assigned) = ctx.assigned_location() {
        return Some(assigned);
    }
    if let Some(locations) = ctx.locations {
        if locations.identify {
            let raw = match locations.from_field.as_deref() {
                Some(WHERE_FILENAME) => Some(ctx.file_stem()),
                Some(WHERE_KEY) | None => container.keys.last().cloned(),
                Some(field) => {
                    json::resolve_text(container.node, container.node, &[field.to_string()])
                }
            }?;
            return ctx.apply_pattern(&raw);
        }
    }
    container.keys.last().cloned().or_else(|| Some(ctx.file_stem()))
}

fn extract_definition(
    specification: &ThresholdSpecification,
    definition: &crate::specification::ThresholdDefinition,
    container: &json::Expansion<'_>,
    document: &Value,
    location: &str,
) -> Result<Option<RetrievedThreshold>, EvaluationError> {
    let expansions = json::expand(container.node, &definition.field);
    if expansions.is_empty() {
        return Ok(None);
    }

    let unit = resolve_threshold_unit(&definition.unit, container.node, document);

    let series_shaped =
        expansions.len() > 1 || definition.field.iter().any(|segment| segment == "*");
    let value = if series_shaped {
        let rules = specification.application_rules.as_ref().ok_or_else(|| {
            EvaluationError::ParseError(format!(
                "threshold '{}' resolves to a value series but no application rules \
                 are configured",
                definition.name
            ))
        })?;
        let mut series = std::collections::BTreeMap::new();
        for expansion in &expansions {
            let value = match frames::FieldValue::from(expansion.node).as_number() {
                Some(value) => value,
                None => continue,
            };
            let mut key_values: Vec<frames::FieldValue> =
                json::expand(expansion.record, &rules.threshold_field.path)
                    .into_iter()
                    .map(|sub| frames::FieldValue::from(sub.node))
                    .collect();
            if key_values.is_empty() && rules.threshold_field.path.len() > 1 {
                // A multi-segment path can also mean sibling fields that
                // combine into one key (month and day columns).
                key_values = rules
                    .threshold_field
                    .path
                    .iter()
                    .filter_map(|segment| {
                        json::expand(expansion.record, std::slice::from_ref(segment))
                            .into_iter()
                            .next()
                            .map(|sub| frames::FieldValue::from(sub.node))
                    })
                    .collect();
            }
            if key_values.is_empty() {
                continue;
            }
            let datatype = rules.threshold_field.datatype.as_deref().unwrap_or("day");
            let key = frames::combine_to_datatype(&key_values, datatype)
                .map_err(EvaluationError::ParseError)?
                .key_string();
            series.insert(key, value);
        }
        if series.is_empty() {
            return Ok(None);
        }
        ThresholdValue::Series(series)
    } else {
        match frames::FieldValue::from(expansions[0].node).as_number() {
            Some(value) => ThresholdValue::Scalar(value),
            None => return Ok(None),
        }
    };

    Ok(Some(RetrievedThreshold {
        location: location.to_string(),
        name: definition.name.clone(),
        weight: definition.weight,
        unit,
        value,
    }))
}

fn resolve_threshold_unit(
    unit: &UnitDefinition,
    container: &Value,
    document: &Value,
) -> Option<String> {
    if let Some(literal) = &unit.value {
        return Some(literal.clone());
    }
    if let Some(field) = &unit.field {
        return json::resolve_text(container, document, &[field.clone()]);
    }
    if !unit.path.is_empty() {
        return json::resolve_text(document, document, &unit.path);
    }
    None
}
