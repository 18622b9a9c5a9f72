/// Error types for specification construction and evaluation.
///
/// Two taxonomies live here, mirroring the two halves of the crate:
///
/// - `SpecificationError` — anything that goes wrong while turning raw
///   configuration input into typed specification objects. Construction
///   collects every problem it finds before failing, so the `Invalid`
///   variant carries the full list of messages and renders them as a
///   single newline-joined block suitable for direct display.
/// - `EvaluationError` — anything that goes wrong while actually running
///   an evaluation: field reconciliation, data retrieval, joining,
///   unit conversion, and scoring. These fail the whole evaluation; there
///   is no retry layer.

use std::fmt;

// ---------------------------------------------------------------------------
// Specification errors
// ---------------------------------------------------------------------------

/// Errors raised while building or validating specification objects.
#[derive(Debug)]
pub enum SpecificationError {
    /// Construction or validation failed. Carries every collected message so
    /// a caller sees all problems in one pass rather than the first one.
    Invalid {
        specification_type: &'static str,
        messages: Vec<String>,
    },
    /// A stream passed as construction input could not be read.
    Io(std::io::Error),
}

impl SpecificationError {
    pub fn invalid(specification_type: &'static str, messages: Vec<String>) -> Self {
        SpecificationError::Invalid {
            specification_type,
            messages,
        }
    }

    /// All collected messages, or the I/O description for stream failures.
    pub fn messages(&self) -> Vec<String> {
        match self {
            SpecificationError::Invalid { messages, .. } => messages.clone(),
            SpecificationError::Io(error) => vec![error.to_string()],
        }
    }
}

impl fmt::Display for SpecificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecificationError::Invalid {
                specification_type,
                messages,
            } => {
                writeln!(f, "Could not build a valid {}:", specification_type)?;
                write!(f, "{}", messages.join("\n"))
            }
            SpecificationError::Io(error) => write!(f, "Could not read input: {}", error),
        }
    }
}

impl std::error::Error for SpecificationError {}

impl From<std::io::Error> for SpecificationError {
    fn from(error: std::io::Error) -> Self {
        SpecificationError::Io(error)
    }
}

// ---------------------------------------------------------------------------
// Evaluation errors
// ---------------------------------------------------------------------------

/// Errors that can arise while running an evaluation.
#[derive(Debug)]
pub enum EvaluationError {
    /// Observation/prediction/crosswalk field names disagree across the
    /// entries of the same list. Raised before any data is loaded.
    FieldMismatch(String),
    /// Every configured crosswalk source came back empty.
    NoCrosswalkData,
    /// A retrieved table lacks a column the evaluation needs.
    MissingColumn { column: String, context: String },
    /// `backend_type` has no registered backend.
    UnsupportedBackend(String),
    /// `format` has no registered retriever.
    UnsupportedFormat(String),
    /// A metric name did not match any registered metric.
    UnknownMetric(String),
    /// A measurement unit was not recognized by the conversion table.
    UnknownUnit(String),
    /// A backend was asked to read an identifier it never resolved.
    SourceNotFound { identifier: String, backend: String },
    /// Non-2xx HTTP response or transport failure from a REST backend.
    HttpError { status: String, address: String },
    /// A retrieved document or table could not be parsed.
    ParseError(String),
    /// Location identifiers could not be assigned to retrieved rows.
    LocationError(String),
    /// A specification failed validation on the way into the evaluator.
    Specification(SpecificationError),
    Io(std::io::Error),
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationError::FieldMismatch(message) => write!(f, "{}", message),
            EvaluationError::NoCrosswalkData => write!(f, "No crosswalk data could be found"),
            EvaluationError::MissingColumn { column, context } => {
                write!(f, "Missing column '{}' in {}", column, context)
            }
            EvaluationError::UnsupportedBackend(backend_type) => {
                write!(f, "'{}' is not a supported backend type", backend_type)
            }
            EvaluationError::UnsupportedFormat(format) => {
                write!(f, "'{}' is not a supported data format", format)
            }
            EvaluationError::UnknownMetric(name) => {
                write!(f, "'{}' is not a recognized metric", name)
            }
            EvaluationError::UnknownUnit(unit) => {
                write!(f, "'{}' is not a recognized measurement unit", unit)
            }
            EvaluationError::SourceNotFound {
                identifier,
                backend,
            } => {
                write!(
                    f,
                    "'{}' is not among the sources of the {} backend",
                    identifier, backend
                )
            }
            EvaluationError::HttpError { status, address } => {
                write!(f, "HTTP error {} from {}", status, address)
            }
            EvaluationError::ParseError(message) => write!(f, "Parse error: {}", message),
            EvaluationError::LocationError(message) => write!(f, "{}", message),
            EvaluationError::Specification(error) => write!(f, "{}", error),
            EvaluationError::Io(error) => write!(f, "I/O error: {}", error),
        }
    }
}

impl std::error::Error for EvaluationError {}

impl From<std::io::Error> for EvaluationError {
    fn from(error: std::io::Error) -> Self {
        EvaluationError::Io(error)
    }
}

impl From<SpecificationError> for EvaluationError {
    fn from(error: SpecificationError) -> Self {
        EvaluationError::Specification(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_message_block_joins_all_messages() {
        let error = SpecificationError::invalid(
            "ThresholdSpecification",
            vec![
                "missing required fields: backend, definitions".to_string(),
                "'bogus' is not a recognized metric".to_string(),
            ],
        );
        let rendered = error.to_string();
        assert!(rendered.contains("ThresholdSpecification"));
        assert!(rendered.contains("missing required fields: backend, definitions"));
        assert!(rendered.contains("'bogus' is not a recognized metric"));
    }

    #[test]
    fn test_no_crosswalk_message_is_exact() {
        assert_eq!(
            EvaluationError::NoCrosswalkData.to_string(),
            "No crosswalk data could be found"
        );
    }
}
