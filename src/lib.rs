/// Hydrologic model evaluation.
///
/// Builds typed evaluation specifications out of loosely structured
/// configuration documents, loads observed and predicted time series through
/// pluggable backends and formats, cross-walks their location identifiers,
/// and scores the predictions against weighted thresholds and metrics.
///
/// The short path from a configuration document to a graded result:
///
/// ```no_run
/// use hydroeval::specification::{EvaluationSpecification, TemplatedSpecification};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let document = std::fs::read_to_string("evaluation.json")?;
/// let specification = EvaluationSpecification::create(document.as_str(), None)?
///     .into_one()?;
/// let results = hydroeval::evaluate(specification)?;
/// println!("{}", results.to_value());
/// # Ok(())
/// # }
/// ```

pub mod backends;
pub mod errors;
pub mod evaluate;
pub mod frames;
pub mod logging;
pub mod metrics;
pub mod retrieval;
pub mod specification;
pub mod units;

pub use errors::{EvaluationError, SpecificationError};
pub use evaluate::{EvaluationResults, Evaluator, evaluate};
