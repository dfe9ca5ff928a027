//! Request executor.
//!
//! [`Request`] collects the coordinates of one exchange (operation,
//! container, object, headers, query, body, accepted codes), validates
//! them locally, hands the result to the [`Transport`] and classifies
//! the response.  Nothing here retries.

use std::time::Instant;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::metrics;
use crate::status::{check_status, Operation};
use crate::transport::{ByteStream, Endpoint, Transport, TransportRequest, TransportResponse};

/// Characters escaped in a container name.
const CONTAINER_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Characters escaped in an object name.  `/` stays literal so pseudo
/// directories map onto URL path segments.
const OBJECT_ENCODE_SET: &AsciiSet = &CONTAINER_ENCODE_SET.remove(b'/');

/// Cluster-relative path of the capabilities document.
const CAPABILITIES_PATH: &str = "/info";

/// Per-call overrides accepted by every entity operation.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers, added after (and overriding) the ones the
    /// operation sets itself.
    pub headers: HeaderMap,
    /// Extra query parameters.
    pub query: Vec<(String, String)>,
    /// Accepted status codes.  `None` uses the operation default.
    pub expected: Option<Vec<StatusCode>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn expect(mut self, codes: &[StatusCode]) -> Self {
        self.expected = Some(codes.to_vec());
        self
    }
}

/// One exchange with the service, built up before execution.
pub struct Request {
    operation: Operation,
    container: Option<String>,
    object: Option<String>,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<ByteStream>,
    expected: Option<Vec<StatusCode>>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("operation", &self.operation)
            .field("container", &self.container)
            .field("object", &self.object)
            .field("query", &self.query)
            .field("expected", &self.expected)
            .finish_non_exhaustive()
    }
}

impl Request {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            container: None,
            object: None,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            expected: None,
        }
    }

    pub fn container(mut self, name: impl Into<String>) -> Self {
        self.container = Some(name.into());
        self
    }

    pub fn object(mut self, name: impl Into<String>) -> Self {
        self.object = Some(name.into());
        self
    }

    /// Merge `headers` into the request, replacing same-named entries.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        let mut last = None;
        for (name, value) in headers {
            let name = match name {
                Some(name) => {
                    self.headers.remove(&name);
                    last = Some(name.clone());
                    name
                }
                None => match &last {
                    Some(name) => name.clone(),
                    None => continue,
                },
            };
            self.headers.append(name, value);
        }
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: ByteStream) -> Self {
        self.body = Some(body);
        self
    }

    /// Override the accepted status codes.
    pub fn expect(mut self, codes: &[StatusCode]) -> Self {
        self.expected = Some(codes.to_vec());
        self
    }

    /// Apply caller overrides on top of what the operation set.
    pub fn options(mut self, opts: Option<&RequestOptions>) -> Self {
        let Some(opts) = opts else {
            return self;
        };
        self = self.headers(opts.headers.clone());
        self.query.extend(opts.query.iter().cloned());
        if let Some(expected) = &opts.expected {
            self.expected = Some(expected.clone());
        }
        self
    }

    /// Validate the coordinates and build the percent-encoded,
    /// account-relative path.
    pub fn path(&self) -> Result<String> {
        if self.operation.endpoint() == Endpoint::Cluster {
            return Ok(CAPABILITIES_PATH.to_string());
        }
        let container = match self.container.as_deref() {
            Some("") => return Err(Error::NoContainerName),
            None if self.object.is_some() => return Err(Error::NoContainerName),
            None => return Ok(String::new()),
            Some(c) => c,
        };
        if container.contains('/') {
            return Err(Error::MalformedContainerName);
        }
        let mut path = format!("/{}", utf8_percent_encode(container, CONTAINER_ENCODE_SET));
        if let Some(object) = self.object.as_deref() {
            if object.is_empty() {
                return Err(Error::NoObjectName);
            }
            path.push('/');
            path.extend(utf8_percent_encode(object, OBJECT_ENCODE_SET));
        }
        Ok(path)
    }

    /// Send the request and classify the response.
    pub async fn execute(self, transport: &dyn Transport) -> Result<TransportResponse> {
        let path = self.path()?;
        let operation = self.operation;
        let expected = self
            .expected
            .unwrap_or_else(|| operation.expected_statuses().to_vec());

        let request = TransportRequest {
            method: operation.method(),
            endpoint: operation.endpoint(),
            path,
            query: self.query,
            headers: self.headers,
            body: self.body,
        };
        debug!(
            "Swift request {} {} {:?}",
            operation.label(),
            request.path,
            request.query
        );

        let started = Instant::now();
        let response = match transport.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_request(operation, None, started.elapsed());
                debug!("Swift request {} failed: {}", operation.label(), e);
                return Err(e);
            }
        };
        let elapsed = started.elapsed();
        metrics::record_request(operation, Some(response.status), elapsed);
        debug!(
            "Swift response {} -> {} in {:?}",
            operation.label(),
            response.status.as_u16(),
            elapsed
        );

        check_status(response, &expected).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;

    #[test]
    fn test_path_account() {
        assert_eq!(Request::new(Operation::AccountHead).path().unwrap(), "");
    }

    #[test]
    fn test_path_encodes_names() {
        let path = Request::new(Operation::ObjectGet)
            .container("my photos")
            .object("2024/cat pic+1.jpg")
            .path()
            .unwrap();
        assert_eq!(path, "/my%20photos/2024/cat%20pic%2B1.jpg");
    }

    #[test]
    fn test_path_object_without_container() {
        let err = Request::new(Operation::ObjectHead)
            .object("o")
            .path()
            .unwrap_err();
        assert!(matches!(err, Error::NoContainerName));

        let err = Request::new(Operation::ObjectHead)
            .container("")
            .object("o")
            .path()
            .unwrap_err();
        assert!(matches!(err, Error::NoContainerName));
    }

    #[test]
    fn test_path_empty_container_without_object() {
        for operation in [
            Operation::ContainerHead,
            Operation::ContainerGet,
            Operation::ContainerPut,
            Operation::ContainerPost,
            Operation::ContainerDelete,
        ] {
            let err = Request::new(operation).container("").path().unwrap_err();
            assert!(matches!(err, Error::NoContainerName), "{operation:?}");
        }
        assert_eq!(Request::new(Operation::BulkDelete).path().unwrap(), "");
    }

    #[test]
    fn test_path_capabilities_ignores_coordinates() {
        assert_eq!(Request::new(Operation::Capabilities).path().unwrap(), "/info");
    }

    #[test]
    fn test_path_malformed_container() {
        let err = Request::new(Operation::ContainerHead)
            .container("a/b")
            .path()
            .unwrap_err();
        assert!(matches!(err, Error::MalformedContainerName));
        assert_eq!(err.to_string(), "container name may not contain slashes");
    }

    #[test]
    fn test_path_empty_object() {
        let err = Request::new(Operation::ObjectHead)
            .container("c")
            .object("")
            .path()
            .unwrap_err();
        assert!(matches!(err, Error::NoObjectName));
    }

    #[test]
    fn test_options_override_headers_and_codes() {
        let opts = RequestOptions::new()
            .header(
                HeaderName::from_static("content-type"),
                HeaderValue::from_static("text/plain"),
            )
            .query("format", "json")
            .expect(&[StatusCode::OK]);
        let req = Request::new(Operation::ObjectPut)
            .header(
                HeaderName::from_static("content-type"),
                HeaderValue::from_static("application/octet-stream"),
            )
            .options(Some(&opts));
        assert_eq!(req.headers.get("content-type").unwrap(), "text/plain");
        assert_eq!(req.headers.get_all("content-type").iter().count(), 1);
        assert_eq!(req.query, vec![("format".to_string(), "json".to_string())]);
        assert_eq!(req.expected, Some(vec![StatusCode::OK]));
    }

    #[tokio::test]
    async fn test_validation_happens_before_io() {
        let transport = MemoryTransport::new();
        let err = Request::new(Operation::ObjectPut)
            .container("a/b")
            .object("o")
            .execute(&transport)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedContainerName));
        assert!(transport.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_execute_classifies_with_default_codes() {
        let transport = MemoryTransport::new();
        let err = Request::new(Operation::ContainerHead)
            .container("missing")
            .execute(&transport)
            .await
            .unwrap_err();
        assert!(err.is_status(StatusCode::NOT_FOUND));
        assert_eq!(err.to_string(), "expected 200/204 response, got 404 instead");

        let resp = Request::new(Operation::ContainerHead)
            .container("missing")
            .expect(&[StatusCode::NOT_FOUND])
            .execute(&transport)
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(transport.requests().await.len(), 2);
    }
}
