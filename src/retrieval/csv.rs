/// CSV retrieval.
///
/// Comma-separated tables with a header row. Selector and associated-field
/// paths name columns; a multi-segment associated path pulls several columns
/// and combines them through the field's datatype (month and day columns
/// into a day key). Rows shorter than the header are skipped.

use std::collections::BTreeMap;

use crate::errors::EvaluationError;
use crate::frames::{self, FieldValue, Frame, Row};
use crate::logging::{self, Component};
use crate::specification::fields::{WHERE_FILENAME, WHERE_KEY};
use crate::specification::{UnitDefinition, ValueSelector};

use super::SourceContext;

pub fn retrieve(
    bytes: &[u8],
    selectors: &[ValueSelector],
    ctx: &SourceContext,
) -> Result<Frame, EvaluationError> {
    let text = std::str::from_utf8(bytes).map_err(|_| {
        EvaluationError::ParseError(format!("'{}' is not UTF-8 text", ctx.identifier))
    })?;

    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let header: Vec<String> = match lines.next() {
        Some(line) => line.split(',').map(|cell| cell.trim().to_string()).collect(),
        None => {
            return Err(EvaluationError::ParseError(format!(
                "'{}' has no header row",
                ctx.identifier
            )));
        }
    };

    let mut frame = Frame::new();
    for line in lines {
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        if cells.len() < header.len() {
            continue;
        }
        let record: BTreeMap<&str, &str> = header
            .iter()
            .map(String::as_str)
            .zip(cells.iter().copied())
            .collect();

        for selector in selectors {
            if let Some(row) = build_row(selector, &record, ctx)? {
                frame.push(row);
            }
        }
    }

    logging::debug(
        Component::Retrieval,
        Some(ctx.identifier),
        &format!("retrieved {} row(s)", frame.len()),
    );
    Ok(frame)
}

fn build_row(
    selector: &ValueSelector,
    record: &BTreeMap<&str, &str>,
    ctx: &SourceContext,
) -> Result<Option<Row>, EvaluationError> {
    let mut row = Row::new();

    let raw = match selector.where_.as_str() {
        WHERE_FILENAME => Some(ctx.file_stem()),
        _ => value_column(selector, record, ctx)
            .and_then(|column| record.get(column.as_str()))
            .map(|cell| cell.to_string()),
    };
    let raw = match raw {
        Some(text) if !text.is_empty() && text != "null" => cell_value(&text),
        _ => return Ok(None),
    };
    let value = match &selector.datatype {
        Some(datatype) => frames::coerce(raw, datatype).map_err(EvaluationError::ParseError)?,
        None => raw,
    };
    row.set(selector.name.clone(), value);

    for field in &selector.associated_fields {
        let values: Vec<FieldValue> = field
            .path
            .iter()
            .filter_map(|column| record.get(column.as_str()))
            .map(|cell| cell_value(cell))
            .collect();
        if values.is_empty() {
            continue;
        }
        let combined = match &field.datatype {
            Some(datatype) => frames::combine_to_datatype(&values, datatype)
                .map_err(EvaluationError::ParseError)?,
            None => values.into_iter().next().unwrap(),
        };
        row.set(field.name.clone(), combined);
    }

    if let Some(unit) = ctx.unit {
        if let Some(text) = resolve_unit(unit, record) {
            row.set("unit", FieldValue::Text(text));
        }
    }

    match locate(ctx, record) {
        Some(location) => row.set("location", FieldValue::Text(location)),
        None if ctx.wants_location() => return Ok(None),
        None => {}
    }

    Ok(Some(row))
}

/// The column holding the selector's value: the terminal path segment, the
/// selector's own name, or the source-wide value field, whichever appears in
/// the table first.
fn value_column(
    selector: &ValueSelector,
    record: &BTreeMap<&str, &str>,
    ctx: &SourceContext,
) -> Option<String> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(terminal) = selector.path.last() {
        candidates.push(terminal);
    }
    candidates.push(&selector.name);
    candidates.push(ctx.value_field);

    candidates
        .into_iter()
        .find(|candidate| record.contains_key(candidate))
        .map(String::from)
}

fn cell_value(cell: &str) -> FieldValue {
    match cell.parse::<f64>() {
        Ok(number) => FieldValue::Number(number),
        Err(_) => FieldValue::Text(cell.to_string()),
    }
}

fn resolve_unit(unit: &UnitDefinition, record: &BTreeMap<&str, &str>) -> Option<String> {
    if let Some(literal) = &unit.value {
        return Some(literal.clone());
    }
    let column = unit.field.as_deref().or_else(|| {
        unit.path.last().map(String::as_str)
    })?;
    record.get(column).map(|cell| cell.to_string())
}

fn locate(ctx: &SourceContext, record: &BTreeMap<&str, &str>) -> Option<String> {
    if let Some(assigned) = ctx.assigned_location() {
        return Some(assigned);
    }

    if let Some(locations) = ctx.locations {
        if locations.identify {
            let raw = match locations.from_field.as_deref() {
                Some(WHERE_FILENAME) | None => Some(ctx.file_stem()),
                Some(WHERE_KEY) => Some(ctx.file_stem()),
                Some(column) => record.get(column).map(|cell| cell.to_string()),
            }?;
            return ctx.apply_pattern(&raw);
        }
    }

    if let Some(cell) = record.get("location") {
        return Some(cell.to_string());
    }
    Some(ctx.file_stem())
}
