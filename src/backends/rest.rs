/// REST backend.
///
/// Performs blocking GET requests against the specification's address. The
/// address is the single source identifier; query parameters belong in the
/// address itself or in the specification's properties under "params".

use serde_json::Value;

use crate::errors::EvaluationError;
use crate::logging::{self, Component};
use crate::specification::BackendSpecification;

use super::Backend;

#[derive(Debug)]
pub struct RestBackend {
    sources: Vec<String>,
    params: Vec<(String, String)>,
    client: reqwest::blocking::Client,
}

impl RestBackend {
    pub fn from_specification(
        specification: &BackendSpecification,
    ) -> Result<Box<dyn Backend>, EvaluationError> {
        let address = specification
            .address
            .clone()
            .filter(|address| !address.trim().is_empty())
            .ok_or_else(|| EvaluationError::SourceNotFound {
                identifier: "<empty address>".to_string(),
                backend: "rest".to_string(),
            })?;

        // Optional query parameters from the catch-all properties.
        let mut params = Vec::new();
        if let Some(Value::Object(raw)) = specification.properties.get("params") {
            for (key, value) in raw {
                let rendered = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                params.push((key.clone(), rendered));
            }
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|error| EvaluationError::HttpError {
                status: error.to_string(),
                address: address.clone(),
            })?;

        Ok(Box::new(RestBackend {
            sources: vec![address],
            params,
            client,
        }))
    }
}

impl Backend for RestBackend {
    fn sources(&self) -> &[String] {
        &self.sources
    }

    fn read(&self, identifier: &str) -> Result<Vec<u8>, EvaluationError> {
        if !self.sources.iter().any(|source| source == identifier) {
            return Err(EvaluationError::SourceNotFound {
                identifier: identifier.to_string(),
                backend: "rest".to_string(),
            });
        }
        logging::debug(
            Component::Backend,
            None,
            &format!("GET {}", identifier),
        );

        let mut request = self.client.get(identifier);
        if !self.params.is_empty() {
            request = request.query(&self.params);
        }

        let response = request.send().map_err(|error| EvaluationError::HttpError {
            status: error.to_string(),
            address: identifier.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(EvaluationError::HttpError {
                status: response.status().to_string(),
                address: identifier.to_string(),
            });
        }

        let body = response.bytes().map_err(|error| EvaluationError::HttpError {
            status: error.to_string(),
            address: identifier.to_string(),
        })?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::specification::TemplatedSpecification;

    #[test]
    fn test_address_is_required() {
        let spec = BackendSpecification::create(
            json!({"backend_type": "rest", "format": "json"}),
            None,
        )
        .expect("structurally valid backend spec")
        .into_one()
        .expect("single instance");

        let error =
            RestBackend::from_specification(&spec).expect_err("rest backend needs an address");
        assert!(matches!(error, EvaluationError::SourceNotFound { .. }));
    }

    #[test]
    fn test_unknown_identifier_is_source_not_found() {
        let spec = BackendSpecification::create(
            json!({
                "backend_type": "rest",
                "address": "https://example.invalid/streamflow",
                "format": "json"
            }),
            None,
        )
        .expect("valid backend spec")
        .into_one()
        .expect("single instance");

        // Fails the source lookup before any request goes out.
        let backend = RestBackend::from_specification(&spec).expect("rest backend should build");
        let error = backend
            .read("https://other.invalid/streamflow")
            .expect_err("identifier is not among the sources");
        assert!(matches!(error, EvaluationError::SourceNotFound { .. }));
    }

    #[test]
    fn test_params_come_from_properties() {
        let spec = BackendSpecification::create(
            json!({
                "backend_type": "rest",
                "address": "https://example.invalid/streamflow",
                "format": "json",
                "properties": {"params": {"sites": "05568500", "period": "P7D"}}
            }),
            None,
        )
        .expect("valid backend spec")
        .into_one()
        .expect("single instance");

        let backend = RestBackend::from_specification(&spec).expect("rest backend should build");
        assert_eq!(
            backend.sources(),
            &["https://example.invalid/streamflow".to_string()]
        );
    }
}
