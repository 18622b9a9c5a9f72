/// Declarative evaluation configuration.
///
/// Every configurable part of an evaluation is a specification type built
/// through the shared machinery in [`base`]: schema-driven construction from
/// JSON text, bytes, readers, or in-memory values, with template expansion
/// and aggregate validation. [`evaluation::EvaluationSpecification`] is the
/// root document the rest hang from.

pub mod backend;
pub mod base;
pub mod crosswalk;
pub mod data_source;
pub mod evaluation;
pub mod fields;
pub mod locations;
pub mod scoring;
pub mod template;
pub mod threshold;
pub mod unit;

pub use backend::{BackendSpecification, LoaderSpecification};
pub use base::{
    BuildContext, Constructed, SpecSource, Specification, TemplatedSpecification,
};
pub use crosswalk::CrosswalkSpecification;
pub use data_source::DataSourceSpecification;
pub use evaluation::EvaluationSpecification;
pub use fields::{AssociatedField, FieldMappingSpecification, ValueSelector};
pub use locations::LocationSpecification;
pub use scoring::{MetricSpecification, SchemeSpecification};
pub use template::{TemplateDetails, TemplateManager};
pub use threshold::{ThresholdApplicationRules, ThresholdDefinition, ThresholdSpecification};
pub use unit::UnitDefinition;
