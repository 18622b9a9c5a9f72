/// Local file backend.
///
/// The specification's address is a comma-separated list of paths; each path
/// is one source identifier.

use std::fs;
use std::io::Read;
use std::path::Path;

use crate::errors::EvaluationError;
use crate::logging::{self, Component};
use crate::specification::BackendSpecification;

use super::Backend;

#[derive(Debug)]
pub struct FileBackend {
    sources: Vec<String>,
}

impl FileBackend {
    pub fn from_specification(
        specification: &BackendSpecification,
    ) -> Result<Box<dyn Backend>, EvaluationError> {
        let address = specification.address.as_deref().unwrap_or_default();
        let sources: Vec<String> = address
            .split(',')
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(String::from)
            .collect();

        if sources.is_empty() {
            return Err(EvaluationError::SourceNotFound {
                identifier: "<empty address>".to_string(),
                backend: "file".to_string(),
            });
        }

        logging::debug(
            Component::Backend,
            None,
            &format!("file backend serving {} path(s)", sources.len()),
        );
        Ok(Box::new(FileBackend { sources }))
    }
}

impl Backend for FileBackend {
    fn sources(&self) -> &[String] {
        &self.sources
    }

    fn read(&self, identifier: &str) -> Result<Vec<u8>, EvaluationError> {
        if !self.sources.iter().any(|source| source == identifier) {
            return Err(EvaluationError::SourceNotFound {
                identifier: identifier.to_string(),
                backend: "file".to_string(),
            });
        }
        if !Path::new(identifier).is_file() {
            return Err(EvaluationError::SourceNotFound {
                identifier: identifier.to_string(),
                backend: "file".to_string(),
            });
        }
        Ok(fs::read(identifier)?)
    }

    fn read_stream(&self, identifier: &str) -> Result<Box<dyn Read>, EvaluationError> {
        if !self.sources.iter().any(|source| source == identifier) {
            return Err(EvaluationError::SourceNotFound {
                identifier: identifier.to_string(),
                backend: "file".to_string(),
            });
        }
        let file = fs::File::open(identifier).map_err(|_| EvaluationError::SourceNotFound {
            identifier: identifier.to_string(),
            backend: "file".to_string(),
        })?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::specification::TemplatedSpecification;

    fn write_fixture(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, contents).expect("fixture should be writable");
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_reads_each_path_in_a_comma_separated_address() {
        let first = write_fixture("file_backend_first.json", "{\"a\": 1}");
        let second = write_fixture("file_backend_second.json", "{\"b\": 2}");

        let spec = BackendSpecification::create(
            json!({
                "backend_type": "file",
                "address": format!("{}, {}", first, second),
                "format": "json"
            }),
            None,
        )
        .expect("valid backend spec")
        .into_one()
        .expect("single instance");

        let backend = FileBackend::from_specification(&spec).expect("file backend should build");
        assert_eq!(backend.sources().len(), 2);
        assert_eq!(backend.read(&first).expect("first path exists"), b"{\"a\": 1}");
        assert_eq!(backend.read(&second).expect("second path exists"), b"{\"b\": 2}");
    }

    #[test]
    fn test_missing_file_is_source_not_found() {
        let spec = BackendSpecification::create(
            json!({
                "backend_type": "file",
                "address": "/definitely/not/here.json",
                "format": "json"
            }),
            None,
        )
        .expect("valid backend spec")
        .into_one()
        .expect("single instance");

        let backend = FileBackend::from_specification(&spec).expect("file backend should build");
        let error = backend
            .read("/definitely/not/here.json")
            .expect_err("path does not exist");
        assert!(matches!(error, EvaluationError::SourceNotFound { .. }));
    }
}
