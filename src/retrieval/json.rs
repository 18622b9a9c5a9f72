/// JSON retrieval.
///
/// Documents are walked with path segments where `*` fans out across every
/// key of an object or element of an array. Each wildcard step remembers the
/// key it took and the node it branched into; that node is the "record" that
/// associated fields resolve against, so a selector path like
/// `values/*/flow` yields one row per element of `values` with flow as the
/// value and the element itself as the record.

use serde_json::Value;

use crate::errors::EvaluationError;
use crate::frames::{self, FieldValue, Frame, Row};
use crate::logging::{self, Component};
use crate::specification::ValueSelector;
use crate::specification::fields::{WHERE_FILENAME, WHERE_KEY};

use super::SourceContext;

// ----------------------------------------------------------------------------
// Document expansion
// ----------------------------------------------------------------------------

/// One result of walking a path: the keys consumed at wildcard steps, the
/// node the last wildcard branched into, and the final node.
pub struct Expansion<'a> {
    pub keys: Vec<String>,
    pub record: &'a Value,
    pub node: &'a Value,
}

/// Walk `segments` from `root`, fanning out at `*` and at numeric indexes
/// into arrays. Paths that dead-end simply produce no expansions.
pub fn expand<'a>(root: &'a Value, segments: &[String]) -> Vec<Expansion<'a>> {
    let mut frontier = vec![Expansion {
        keys: Vec::new(),
        record: root,
        node: root,
    }];

    for segment in segments {
        let mut next = Vec::new();
        for current in frontier {
            if segment == "*" {
                match current.node {
                    Value::Object(entries) => {
                        for (key, child) in entries {
                            let mut keys = current.keys.clone();
                            keys.push(key.clone());
                            next.push(Expansion {
                                keys,
                                record: child,
                                node: child,
                            });
                        }
                    }
                    Value::Array(elements) => {
                        for (index, child) in elements.iter().enumerate() {
                            let mut keys = current.keys.clone();
                            keys.push(index.to_string());
                            next.push(Expansion {
                                keys,
                                record: child,
                                node: child,
                            });
                        }
                    }
                    _ => {}
                }
            } else {
                let child = match current.node {
                    Value::Object(entries) => entries.get(segment.as_str()),
                    Value::Array(elements) => segment
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| elements.get(index)),
                    _ => None,
                };
                if let Some(child) = child {
                    next.push(Expansion {
                        keys: current.keys,
                        record: current.record,
                        node: child,
                    });
                }
            }
        }
        frontier = next;
    }

    frontier
}

/// First scalar text reached by a path, searched relative to the record and
/// falling back to the container.
pub(crate) fn resolve_text(record: &Value, container: &Value, path: &[String]) -> Option<String> {
    for scope in [record, container] {
        if let Some(expansion) = expand(scope, path).into_iter().next() {
            let value = FieldValue::from(expansion.node);
            if let Some(text) = value.as_text() {
                return Some(text.to_string());
            }
            if !value.is_null() {
                return Some(value.key_string());
            }
        }
    }
    None
}

// ----------------------------------------------------------------------------
// Retrieval
// ----------------------------------------------------------------------------

pub fn retrieve(
    bytes: &[u8],
    selectors: &[ValueSelector],
    ctx: &SourceContext,
) -> Result<Frame, EvaluationError> {
    let document: Value = serde_json::from_slice(bytes).map_err(|error| {
        EvaluationError::ParseError(format!("invalid JSON from '{}': {}", ctx.identifier, error))
    })?;

    let mut frame = Frame::new();
    for selector in selectors {
        retrieve_selector(&document, selector, ctx, &mut frame)?;
    }

    logging::debug(
        Component::Retrieval,
        Some(ctx.identifier),
        &format!("retrieved {} row(s)", frame.len()),
    );
    Ok(frame)
}

fn retrieve_selector(
    document: &Value,
    selector: &ValueSelector,
    ctx: &SourceContext,
    frame: &mut Frame,
) -> Result<(), EvaluationError> {
    for container in expand(document, &selector.origin) {
        for expansion in expand(container.node, &selector.path) {
            let mut row = Row::new();

            // The selector's own value.
            let raw = match selector.where_.as_str() {
                WHERE_KEY => match expansion.keys.last().or(container.keys.last()) {
                    Some(key) => FieldValue::Text(key.clone()),
                    None => continue,
                },
                WHERE_FILENAME => FieldValue::Text(ctx.file_stem()),
                _ => FieldValue::from(expansion.node),
            };
            if raw.is_null() {
                continue;
            }
            let value = match &selector.datatype {
                Some(datatype) => frames::coerce(raw, datatype)
                    .map_err(EvaluationError::ParseError)?,
                None => raw,
            };
            row.set(selector.name.clone(), value);

            // Associated fields resolve against the record, with the
            // container as a fallback for series-level fields.
            for field in &selector.associated_fields {
                let mut values: Vec<FieldValue> = expand(expansion.record, &field.path)
                    .into_iter()
                    .map(|sub| FieldValue::from(sub.node))
                    .collect();
                if values.is_empty() {
                    values = expand(container.node, &field.path)
                        .into_iter()
                        .map(|sub| FieldValue::from(sub.node))
                        .collect();
                }
                if values.is_empty() {
                    continue;
                }
                let combined = match &field.datatype {
                    Some(datatype) => frames::combine_to_datatype(&values, datatype)
                        .map_err(EvaluationError::ParseError)?,
                    None => values.remove(0),
                };
                row.set(field.name.clone(), combined);
            }

            if let Some(unit) = ctx.unit {
                if let Some(text) = resolve_unit(unit, expansion.record, container.node, document)
                {
                    row.set("unit", FieldValue::Text(text));
                }
            }

            // For locations the container (series) key is the meaningful
            // one; path wildcard keys are usually array indexes.
            let location_key = container.keys.last().or(expansion.keys.last());
            match locate(ctx, location_key, expansion.record, container.node) {
                Some(location) => row.set("location", FieldValue::Text(location)),
                None if ctx.wants_location() => continue,
                None => {}
            }

            frame.push(row);
        }
    }

    Ok(())
}

fn resolve_unit(
    unit: &crate::specification::UnitDefinition,
    record: &Value,
    container: &Value,
    document: &Value,
) -> Option<String> {
    if let Some(literal) = &unit.value {
        return Some(literal.clone());
    }
    if let Some(field) = &unit.field {
        return resolve_text(record, container, &[field.clone()]);
    }
    if !unit.path.is_empty() {
        return resolve_text(document, document, &unit.path);
    }
    None
}

/// Work out the location identifier for one row. Explicit ids win, then the
/// identification rules, then the surrounding key context, then the source
/// file's stem.
fn locate(
    ctx: &SourceContext,
    key_context: Option<&String>,
    record: &Value,
    container: &Value,
) -> Option<String> {
    if let Some(assigned) = ctx.assigned_location() {
        return Some(assigned);
    }

    if let Some(locations) = ctx.locations {
        if locations.identify {
            let raw = match locations.from_field.as_deref() {
                Some(WHERE_FILENAME) => Some(ctx.file_stem()),
                Some(WHERE_KEY) => key_context.cloned(),
                Some(field) => resolve_text(record, container, &[field.to_string()]),
                None => key_context.cloned(),
            }?;
            return ctx.apply_pattern(&raw);
        }
    }

    key_context.cloned().or_else(|| Some(ctx.file_stem()))
}
