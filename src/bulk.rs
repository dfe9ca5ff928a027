//! Bulk delete and archive upload.
//!
//! Both operations answer with a JSON report instead of a meaningful
//! status code: the HTTP status is 200 even when some or all entries
//! failed, and the real outcome sits in `Response Status` and `Errors`.
//! [`BulkResponse::into_result`] turns such a report into a
//! [`BulkError`] when anything went wrong.

use bytes::Bytes;
use http::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use http::StatusCode;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::account::Account;
use crate::container::Container;
use crate::errors::{BulkError, BulkObjectError, Error, Result};
use crate::object::Object;
use crate::request::{Request, RequestOptions};
use crate::status::Operation;
use crate::transport::{collect_stream, once_stream, TransportResponse};
use crate::upload::UploadContent;

/// Most paths the service accepts in one bulk-delete request.
pub const BULK_DELETE_BATCH: usize = 10_000;

/// Report returned by `?bulk-delete`, `?extract-archive` and
/// `?multipart-manifest=delete`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(rename = "Response Status", default)]
    pub response_status: String,
    #[serde(rename = "Response Body", default)]
    pub response_body: String,
    /// `[path, "NNN Reason"]` pairs.
    #[serde(rename = "Errors", default)]
    pub errors: Vec<(String, String)>,
    #[serde(rename = "Number Deleted", default)]
    pub number_deleted: u64,
    #[serde(rename = "Number Not Found", default)]
    pub number_not_found: u64,
    #[serde(rename = "Number Files Created", default)]
    pub number_files_created: u64,
}

impl BulkResponse {
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Read and parse a response body.  A body that is neither JSON
    /// nor labelled as JSON means no middleware handled the request.
    pub(crate) async fn from_response(response: TransportResponse) -> Result<Self> {
        let is_json = response
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        let body = collect_stream(response.body).await?;
        match Self::parse(&body) {
            Err(Error::MalformedBody(e)) if !is_json => {
                debug!("Expected a bulk report, got a non-JSON body: {}", e);
                Err(Error::NotSupported)
            }
            other => other,
        }
    }

    /// Overall status.  Text that does not start with a status code is
    /// treated as a server error.
    pub fn status(&self) -> StatusCode {
        self.response_status
            .split_whitespace()
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// `Ok(self)` when the operation succeeded for every entry.
    pub fn into_result(self) -> Result<Self> {
        let status = self.status();
        if status.is_success() && self.errors.is_empty() {
            return Ok(self);
        }
        let object_errors = self
            .errors
            .iter()
            .map(|(path, status)| object_error(path, status))
            .collect();
        Err(BulkError {
            status,
            archive_error: self.response_body.trim().to_string(),
            object_errors,
        }
        .into())
    }
}

fn object_error(path: &str, status: &str) -> BulkObjectError {
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = percent_decode_str(path).decode_utf8_lossy();
    let (container_name, object_name) = match path.split_once('/') {
        Some((c, o)) => (c.to_string(), o.to_string()),
        None => (path.to_string(), String::new()),
    };
    let status = status
        .split_whitespace()
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    BulkObjectError {
        container_name,
        object_name,
        status,
    }
}

/// Outcome of a successful bulk delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkDeleteSummary {
    pub deleted: u64,
    pub not_found: u64,
}

/// Archive formats accepted by `?extract-archive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
}

impl ArchiveFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarBz2 => "tar.bz2",
        }
    }
}

impl Account {
    /// Delete `objects`, then `containers`, in as few requests as the
    /// batch limit allows (the smaller of [`BULK_DELETE_BATCH`] and the
    /// cluster's `max_deletes_per_request`).  Fails with
    /// [`Error::NotSupported`] if the cluster has no bulk middleware.  Containers must be empty by the time their
    /// batch runs.  Stops at the first batch that reports a failure.
    pub async fn bulk_delete(
        &mut self,
        objects: &[Object],
        containers: &[Container],
        opts: Option<&RequestOptions>,
    ) -> Result<BulkDeleteSummary> {
        let mut paths = Vec::with_capacity(objects.len() + containers.len());
        for object in objects {
            paths.push(object.request(Operation::ObjectDelete).path()?);
        }
        for container in containers {
            paths.push(
                Request::new(Operation::ContainerDelete)
                    .container(container.name())
                    .path()?,
            );
        }
        if paths.is_empty() {
            return Ok(BulkDeleteSummary::default());
        }
        let batch = self
            .capabilities()
            .await?
            .require_bulk_delete()?
            .max_deletes_per_request
            .filter(|&n| n > 0)
            .map_or(BULK_DELETE_BATCH, |n| n.min(BULK_DELETE_BATCH));
        let result = self.delete_paths(&paths, batch, opts).await;
        self.invalidate();
        result
    }

    async fn delete_paths(
        &self,
        paths: &[String],
        batch: usize,
        opts: Option<&RequestOptions>,
    ) -> Result<BulkDeleteSummary> {
        let mut summary = BulkDeleteSummary::default();
        for chunk in paths.chunks(batch.max(1)) {
            let body = Bytes::from(chunk.join("\n") + "\n");
            let response = Request::new(Operation::BulkDelete)
                .query("bulk-delete", "true")
                .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
                .header(ACCEPT, HeaderValue::from_static("application/json"))
                .body(once_stream(body))
                .options(opts)
                .execute(self.transport())
                .await?;
            let report = BulkResponse::from_response(response).await?;
            let report = report.into_result().inspect_err(|e| {
                warn!("Bulk delete of {} paths failed: {}", chunk.len(), e);
            })?;
            summary.deleted += report.number_deleted;
            summary.not_found += report.number_not_found;
        }
        debug!(
            "Bulk delete removed {} entries, {} not found",
            summary.deleted, summary.not_found
        );
        Ok(summary)
    }

    /// Upload an archive and let the service unpack it below
    /// `upload_path` (empty for the account, `container` or
    /// `container/prefix`).  Returns the number of files created.  Fails
    /// with [`Error::NotSupported`] if the cluster cannot extract archives.
    pub async fn bulk_upload(
        &mut self,
        upload_path: &str,
        format: ArchiveFormat,
        content: impl Into<UploadContent>,
        opts: Option<&RequestOptions>,
    ) -> Result<u64> {
        self.capabilities().await?.require_bulk_upload()?;
        let upload_path = upload_path.trim_start_matches('/');
        let mut request = Request::new(Operation::BulkUpload);
        match upload_path.split_once('/') {
            Some((container, prefix)) if !prefix.is_empty() => {
                request = request.container(container).object(prefix);
            }
            Some((container, _)) => request = request.container(container),
            None if !upload_path.is_empty() => request = request.container(upload_path),
            None => {}
        }

        let result = async {
            let response = request
                .query("extract-archive", format.as_str())
                .header(ACCEPT, HeaderValue::from_static("application/json"))
                .body(content.into().into_stream())
                .options(opts)
                .execute(self.transport())
                .await?;
            let report = BulkResponse::from_response(response).await?.into_result()?;
            Ok(report.number_files_created)
        }
        .await;
        self.invalidate();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::{Endpoint, Transport, TransportRequest};
    use http::{HeaderMap, Method};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    #[test]
    fn test_parse_report_with_errors() {
        let body = br#"{
            "Number Files Created": 0,
            "Response Status": "400 Bad Request",
            "Response Body": "Invalid Tar File: truncated header",
            "Errors": [["/photos/cat%20pic.jpg", "413 Request Entity Too Large"], ["/empty", "409 Conflict"]]
        }"#;
        let err = BulkResponse::parse(body).unwrap().into_result().unwrap_err();
        let Error::Bulk(bulk) = err else {
            panic!("expected a bulk error");
        };
        assert_eq!(bulk.status, StatusCode::BAD_REQUEST);
        assert_eq!(bulk.archive_error, "Invalid Tar File: truncated header");
        assert_eq!(
            bulk.object_errors,
            vec![
                BulkObjectError {
                    container_name: "photos".into(),
                    object_name: "cat pic.jpg".into(),
                    status: StatusCode::PAYLOAD_TOO_LARGE,
                },
                BulkObjectError {
                    container_name: "empty".into(),
                    object_name: String::new(),
                    status: StatusCode::CONFLICT,
                },
            ]
        );
        assert_eq!(
            bulk.to_string(),
            "400 Bad Request: Invalid Tar File: truncated header (+2 object errors)"
        );
    }

    #[test]
    fn test_errors_fail_even_with_success_status() {
        let body = br#"{"Response Status": "200 OK", "Errors": [["/c/o", "503 Service Unavailable"]]}"#;
        assert!(BulkResponse::parse(body).unwrap().into_result().is_err());
    }

    #[test]
    fn test_unparseable_status_is_server_error() {
        let report = BulkResponse::parse(br#"{"Response Status": "weird"}"#).unwrap();
        assert_eq!(report.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_malformed_report() {
        assert!(matches!(
            BulkResponse::parse(b"<html>nope</html>"),
            Err(Error::MalformedBody(_))
        ));
    }

    async fn populated() -> (Arc<MemoryTransport>, Account, Container) {
        let transport = Arc::new(MemoryTransport::new());
        let account = Account::new(transport.clone());
        let mut container = account.container("bulk");
        container.create(None, None).await.unwrap();
        for name in ["a", "b", "dir/c d"] {
            container.object(name).upload("x", None, None).await.unwrap();
        }
        (transport, account, container)
    }

    #[tokio::test]
    async fn test_bulk_delete_objects_and_container() {
        let (transport, mut account, mut container) = populated().await;
        let objects: Vec<Object> = ["a", "b", "dir/c d", "missing"]
            .into_iter()
            .map(|name| container.object(name))
            .collect();

        let summary = account
            .bulk_delete(&objects, &[container.clone()], None)
            .await
            .unwrap();
        assert_eq!(summary, BulkDeleteSummary { deleted: 4, not_found: 1 });
        assert!(!container.exists().await.unwrap());

        let requests = transport.requests().await;
        let post = requests.iter().find(|r| r.method == Method::POST).unwrap();
        assert_eq!(post.path, "");
        assert_eq!(post.query_value("bulk-delete"), Some("true"));
        assert_eq!(post.headers.get("accept").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_bulk_delete_non_empty_container_fails() {
        let (_, mut account, container) = populated().await;
        let err = account
            .bulk_delete(&[container.object("a")], &[container.clone()], None)
            .await
            .unwrap_err();
        let Error::Bulk(bulk) = err else {
            panic!("expected a bulk error");
        };
        assert_eq!(bulk.status, StatusCode::BAD_REQUEST);
        assert_eq!(bulk.object_errors.len(), 1);
        assert_eq!(bulk.object_errors[0].container_name, "bulk");
        assert_eq!(bulk.object_errors[0].object_name, "");
        assert_eq!(bulk.object_errors[0].status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_bulk_delete_validates_names_first() {
        let (transport, mut account, container) = populated().await;
        transport.clear_requests().await;
        let err = account
            .bulk_delete(&[container.object("")], &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoObjectName));
        let malformed = account.container("x/y");
        let err = account
            .bulk_delete(&[], &[malformed], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedContainerName));
        let unnamed = account.container("");
        let err = account
            .bulk_delete(&[], &[unnamed], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoContainerName));
        assert!(transport.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_delete_batches() {
        let (transport, account, container) = populated().await;
        let paths: Vec<String> = ["a", "b", "dir/c d"]
            .into_iter()
            .map(|name| container.object(name).request(Operation::ObjectDelete).path().unwrap())
            .collect();
        transport.clear_requests().await;

        let summary = account.delete_paths(&paths, 2, None).await.unwrap();
        assert_eq!(summary.deleted, 3);
        assert_eq!(transport.request_count(&Method::POST).await, 2);
    }

    #[tokio::test]
    async fn test_bulk_upload_reports_archive_error() {
        let (transport, mut account, _) = populated().await;
        let err = account
            .bulk_upload("bulk/unpacked", ArchiveFormat::TarGz, vec![0u8; 512], None)
            .await
            .unwrap_err();
        let Error::Bulk(bulk) = err else {
            panic!("expected a bulk error");
        };
        assert_eq!(bulk.status, StatusCode::BAD_REQUEST);
        assert!(bulk.archive_error.starts_with("Invalid Tar File"));

        let requests = transport.requests().await;
        let put = requests.last().unwrap();
        assert_eq!(put.path, "/bulk/unpacked");
        assert_eq!(put.query_value("extract-archive"), Some("tar.gz"));
    }

    /// Answers every account request with one fixed JSON report, and
    /// `/info` with a cluster that only extracts archives.
    struct CannedTransport {
        report: &'static str,
    }

    impl Transport for CannedTransport {
        fn execute(
            &self,
            request: TransportRequest,
        ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + '_>> {
            Box::pin(async move {
                let body = match request.endpoint {
                    Endpoint::Cluster => r#"{"bulk_upload": {}}"#,
                    Endpoint::Account => self.report,
                };
                Ok(TransportResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: once_stream(Bytes::from_static(body.as_bytes())),
                })
            })
        }

        fn account_url(&self) -> &str {
            "http://canned.invalid/v1/AUTH_test"
        }
    }

    #[tokio::test]
    async fn test_bulk_upload_counts_created_files() {
        let transport = Arc::new(CannedTransport {
            report: r#"{"Number Files Created": 3, "Response Status": "201 Created", "Response Body": "", "Errors": []}"#,
        });
        let mut account = Account::new(transport);
        let created = account
            .bulk_upload("", ArchiveFormat::Tar, Bytes::from_static(b"archive"), None)
            .await
            .unwrap();
        assert_eq!(created, 3);
    }

    #[tokio::test]
    async fn test_bulk_delete_without_middleware() {
        let (transport, mut account, container) = populated().await;
        transport.disable_capability("bulk_delete").await;
        transport.clear_requests().await;

        let err = account
            .bulk_delete(&[container.object("a")], &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported));
        assert_eq!(err.to_string(), "operation not supported by this Swift server");
        assert_eq!(transport.request_count(&Method::POST).await, 0);
        assert!(transport.object_data("bulk", "a").await.is_some());
    }

    #[tokio::test]
    async fn test_bulk_upload_without_middleware() {
        let (transport, mut account, _) = populated().await;
        transport.disable_capability("bulk_upload").await;
        let err = account
            .bulk_upload("bulk/unpacked", ArchiveFormat::Tar, vec![0u8; 512], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported));
        assert_eq!(transport.request_count(&Method::PUT).await, 4);
        assert!(transport.object_data("bulk", "unpacked").await.is_none());
    }

    #[tokio::test]
    async fn test_bulk_delete_batch_follows_cluster_limit() {
        let (transport, mut account, container) = populated().await;
        transport
            .set_capability("bulk_delete", serde_json::json!({"max_deletes_per_request": 2}))
            .await;
        transport.clear_requests().await;

        let objects: Vec<Object> = ["a", "b", "dir/c d"]
            .into_iter()
            .map(|name| container.object(name))
            .collect();
        let summary = account.bulk_delete(&objects, &[], None).await.unwrap();
        assert_eq!(summary.deleted, 3);
        assert_eq!(transport.request_count(&Method::POST).await, 2);
    }

    #[tokio::test]
    async fn test_bulk_delete_nothing_sends_nothing() {
        let (transport, mut account, _) = populated().await;
        transport.clear_requests().await;
        let summary = account.bulk_delete(&[], &[], None).await.unwrap();
        assert_eq!(summary, BulkDeleteSummary::default());
        assert!(transport.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_json_reply_means_not_supported() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=UTF-8"));
        let response = TransportResponse {
            status: StatusCode::OK,
            headers,
            body: once_stream(Bytes::from_static(b"<html><h1>OK</h1></html>")),
        };
        let err = BulkResponse::from_response(response).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let response = TransportResponse {
            status: StatusCode::OK,
            headers,
            body: once_stream(Bytes::from_static(b"{truncated")),
        };
        let err = BulkResponse::from_response(response).await.unwrap_err();
        assert!(matches!(err, Error::MalformedBody(_)));
    }

    #[test]
    fn test_archive_format_names() {
        assert_eq!(ArchiveFormat::Tar.as_str(), "tar");
        assert_eq!(ArchiveFormat::TarBz2.as_str(), "tar.bz2");
    }
}
