//! Status classification.
//!
//! Swift is inconsistent about which success code an operation returns
//! (HEAD on an object is 200, on a container 204, PUT on a container is
//! 201 or 202 ...).  The accepted codes for every operation live in one
//! table, [`Operation::expected_statuses`], and [`check_status`] turns a
//! response outside that set into [`Error::UnexpectedStatus`].

use std::sync::LazyLock;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{Method, StatusCode};

use crate::errors::{Error, Result, UnexpectedStatusError};
use crate::transport::{Endpoint, TransportResponse};

/// Upper bound on the response body captured into an error.
pub const MAX_ERROR_BODY: usize = 64 * 1024;

/// Every request kind the client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    AccountHead,
    AccountGet,
    AccountPost,
    BulkDelete,
    BulkUpload,
    ContainerHead,
    ContainerGet,
    ContainerPut,
    ContainerPost,
    ContainerDelete,
    ObjectHead,
    ObjectGet,
    ObjectPut,
    ObjectPost,
    ObjectDelete,
    ObjectCopy,
    /// DELETE of a static large object together with its segments.
    ManifestDelete,
    /// GET of the cluster's `/info` document.
    Capabilities,
}

impl Operation {
    /// HTTP method used for this operation.
    pub fn method(self) -> Method {
        match self {
            Operation::AccountHead | Operation::ContainerHead | Operation::ObjectHead => {
                Method::HEAD
            }
            Operation::AccountGet
            | Operation::ContainerGet
            | Operation::ObjectGet
            | Operation::Capabilities => Method::GET,
            Operation::AccountPost
            | Operation::BulkDelete
            | Operation::ContainerPost
            | Operation::ObjectPost => Method::POST,
            Operation::BulkUpload | Operation::ContainerPut | Operation::ObjectPut => Method::PUT,
            Operation::ContainerDelete | Operation::ObjectDelete | Operation::ManifestDelete => {
                Method::DELETE
            }
            Operation::ObjectCopy => copy_method(),
        }
    }

    /// What the request path is relative to.
    pub fn endpoint(self) -> Endpoint {
        match self {
            Operation::Capabilities => Endpoint::Cluster,
            _ => Endpoint::Account,
        }
    }

    /// Status codes accepted as success unless the caller overrides them.
    pub fn expected_statuses(self) -> &'static [StatusCode] {
        const OK: StatusCode = StatusCode::OK;
        const CREATED: StatusCode = StatusCode::CREATED;
        const ACCEPTED: StatusCode = StatusCode::ACCEPTED;
        const NO_CONTENT: StatusCode = StatusCode::NO_CONTENT;
        const PARTIAL: StatusCode = StatusCode::PARTIAL_CONTENT;

        match self {
            Operation::AccountHead => &[OK, NO_CONTENT],
            Operation::AccountGet => &[OK, NO_CONTENT],
            Operation::AccountPost => &[NO_CONTENT],
            Operation::BulkDelete => &[OK],
            Operation::BulkUpload => &[OK, CREATED],
            Operation::ContainerHead => &[OK, NO_CONTENT],
            Operation::ContainerGet => &[OK, NO_CONTENT],
            Operation::ContainerPut => &[CREATED, ACCEPTED],
            Operation::ContainerPost => &[NO_CONTENT],
            Operation::ContainerDelete => &[NO_CONTENT],
            Operation::ObjectHead => &[OK],
            Operation::ObjectGet => &[OK, PARTIAL],
            Operation::ObjectPut => &[CREATED],
            Operation::ObjectPost => &[ACCEPTED],
            Operation::ObjectDelete => &[NO_CONTENT],
            Operation::ObjectCopy => &[CREATED],
            Operation::ManifestDelete => &[OK],
            Operation::Capabilities => &[OK],
        }
    }

    /// Stable name for logs and metric labels.
    pub fn label(self) -> &'static str {
        match self {
            Operation::AccountHead => "account_head",
            Operation::AccountGet => "account_get",
            Operation::AccountPost => "account_post",
            Operation::BulkDelete => "bulk_delete",
            Operation::BulkUpload => "bulk_upload",
            Operation::ContainerHead => "container_head",
            Operation::ContainerGet => "container_get",
            Operation::ContainerPut => "container_put",
            Operation::ContainerPost => "container_post",
            Operation::ContainerDelete => "container_delete",
            Operation::ObjectHead => "object_head",
            Operation::ObjectGet => "object_get",
            Operation::ObjectPut => "object_put",
            Operation::ObjectPost => "object_post",
            Operation::ObjectDelete => "object_delete",
            Operation::ObjectCopy => "object_copy",
            Operation::ManifestDelete => "manifest_delete",
            Operation::Capabilities => "capabilities",
        }
    }
}

static COPY: LazyLock<Method> =
    LazyLock::new(|| Method::from_bytes(b"COPY").expect("COPY is a valid method token"));

/// The non-standard `COPY` method.
pub fn copy_method() -> Method {
    COPY.clone()
}

/// Pass `response` through if its status is in `expected`, otherwise
/// consume up to [`MAX_ERROR_BODY`] bytes of its body into an
/// [`Error::UnexpectedStatus`].
pub async fn check_status(
    response: TransportResponse,
    expected: &[StatusCode],
) -> Result<TransportResponse> {
    if expected.contains(&response.status) {
        return Ok(response);
    }
    let TransportResponse {
        status,
        headers,
        body,
    } = response;
    let body = read_bounded(body, MAX_ERROR_BODY).await;
    Err(Error::from(UnexpectedStatusError {
        expected: expected.to_vec(),
        status,
        headers,
        body,
    }))
}

/// Read at most `limit` bytes.  A read failure ends the capture; the body
/// is diagnostic only.
async fn read_bounded(mut body: crate::transport::ByteStream, limit: usize) -> Bytes {
    let mut buf = BytesMut::new();
    while buf.len() < limit {
        match body.next().await {
            Some(Ok(chunk)) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Some(Err(_)) | None => break,
        }
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{empty_stream, once_stream};
    use http::HeaderMap;

    fn response(status: StatusCode, body: &'static [u8]) -> TransportResponse {
        TransportResponse {
            status,
            headers: HeaderMap::new(),
            body: if body.is_empty() {
                empty_stream()
            } else {
                once_stream(Bytes::from_static(body))
            },
        }
    }

    #[tokio::test]
    async fn test_check_status_accepts_listed_code() {
        let resp = check_status(response(StatusCode::NO_CONTENT, b""), &[StatusCode::NO_CONTENT])
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_check_status_captures_body() {
        let err = check_status(response(StatusCode::NOT_FOUND, b"<h1>Not Found</h1>"), &[StatusCode::OK])
            .await
            .unwrap_err();
        assert!(err.is_status(StatusCode::NOT_FOUND));
        assert_eq!(
            err.to_string(),
            "expected 200 response, got 404 instead: <h1>Not Found</h1>"
        );
    }

    #[tokio::test]
    async fn test_check_status_bounds_body() {
        let big: &'static [u8] = Box::leak(vec![b'x'; MAX_ERROR_BODY * 2].into_boxed_slice());
        let err = check_status(response(StatusCode::INTERNAL_SERVER_ERROR, big), &[StatusCode::OK])
            .await
            .unwrap_err();
        match err {
            Error::UnexpectedStatus(e) => assert_eq!(e.body.len(), MAX_ERROR_BODY),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_operation_table() {
        assert_eq!(Operation::ObjectHead.expected_statuses(), &[StatusCode::OK]);
        assert_eq!(
            Operation::ContainerPut.expected_statuses(),
            &[StatusCode::CREATED, StatusCode::ACCEPTED]
        );
        assert_eq!(Operation::ObjectPost.method(), Method::POST);
        assert_eq!(Operation::ObjectCopy.method().as_str(), "COPY");
        assert_eq!(Operation::ManifestDelete.method(), Method::DELETE);
        assert_eq!(Operation::BulkUpload.label(), "bulk_upload");
        assert_eq!(Operation::Capabilities.method(), Method::GET);
        assert_eq!(Operation::Capabilities.endpoint(), Endpoint::Cluster);
        assert_eq!(Operation::ObjectGet.endpoint(), Endpoint::Account);
    }

    #[test]
    fn test_copy_method_is_distinct_from_put() {
        let copy = copy_method();
        assert_eq!(copy.as_str(), "COPY");
        assert_ne!(copy, Method::PUT);
        assert_eq!(copy, Operation::ObjectCopy.method());
    }
}
