/// Data backends.
///
/// A backend turns a `BackendSpecification` into raw bytes, one payload per
/// declared source, without caring what format those bytes are in. Parsing
/// into frames is the retrieval layer's job.

pub mod file;
pub mod rest;

use std::io::Read;

use crate::errors::EvaluationError;
use crate::specification::BackendSpecification;

// ----------------------------------------------------------------------------
// Backend trait
// ----------------------------------------------------------------------------

pub trait Backend: std::fmt::Debug {
    /// The identifiers this backend can read, in declaration order.
    fn sources(&self) -> &[String];

    /// Read the full payload for one source identifier.
    fn read(&self, identifier: &str) -> Result<Vec<u8>, EvaluationError>;

    /// Read a source as a stream. The default buffers through `read`.
    fn read_stream(&self, identifier: &str) -> Result<Box<dyn Read>, EvaluationError> {
        let data = self.read(identifier)?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

type BackendConstructor = fn(&BackendSpecification) -> Result<Box<dyn Backend>, EvaluationError>;

const BACKENDS: &[(&str, BackendConstructor)] = &[
    ("file", file::FileBackend::from_specification),
    ("rest", rest::RestBackend::from_specification),
];

/// Construct the backend a specification names.
pub fn build_backend(
    specification: &BackendSpecification,
) -> Result<Box<dyn Backend>, EvaluationError> {
    let backend_type = specification.backend_type.to_lowercase();
    for (name, constructor) in BACKENDS {
        if *name == backend_type {
            return constructor(specification);
        }
    }
    Err(EvaluationError::UnsupportedBackend(backend_type))
}
