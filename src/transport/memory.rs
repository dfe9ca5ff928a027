//! In-process emulation of one Swift account.
//!
//! Implements enough of the dialect for the client to be exercised end
//! to end without a cluster: container and object CRUD, metadata
//! merge/replace rules, JSON and plain listings, ranges and `If-Match`,
//! `COPY`, dynamic and static large objects, bulk delete, and the
//! cluster's `/info` document.  Every request is recorded, and faults can
//! be queued (status overrides) or switched on (ETag corruption, missing
//! middleware).
//!
//! State lives behind a `tokio::sync::Mutex`; it is never held across a
//! body read.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use md5::{Digest, Md5};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use super::{
    collect_stream, ByteStream, Endpoint, Transport, TransportRequest, TransportResponse,
};
use crate::errors::Result;
use crate::large_object::etag_of_etags;
use crate::status::copy_method;

/// Account URL reported unless another one is configured.
pub const DEFAULT_ACCOUNT_URL: &str = "http://swift.invalid/v1/AUTH_test";

/// Body of every 404 with a body, as sent by a Swift proxy.
pub const NOT_FOUND_BODY: &str =
    "<html><h1>Not Found</h1><p>The resource could not be found.</p></html>";

const ACCEPTED_BODY: &str =
    "<html><h1>Accepted</h1><p>The request is accepted for processing.</p></html>";

const UNPROCESSABLE_BODY: &str =
    "<html><h1>Unprocessable Entity</h1><p>Unable to process the contained instructions</p></html>";

/// Response bodies are handed out in chunks of this size.
const RESPONSE_CHUNK_SIZE: usize = 1000;

const DEFAULT_LISTING_LIMIT: usize = 10_000;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const LISTING_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

// -- Public surface -----------------------------------------------------------

/// A request as seen by the emulated service.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub endpoint: Endpoint,
    /// Encoded path, relative to `endpoint`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
}

impl RecordedRequest {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        query_value(&self.query, key)
    }
}

/// Swift account held entirely in memory.
pub struct MemoryTransport {
    account_url: String,
    state: Mutex<State>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_account_url(DEFAULT_ACCOUNT_URL)
    }

    pub fn with_account_url(url: impl Into<String>) -> Self {
        Self {
            account_url: url.into().trim_end_matches('/').to_string(),
            state: Mutex::new(State::new()),
        }
    }

    /// Every request received so far, oldest first.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.log.clone()
    }

    /// Number of requests received with `method`.
    pub async fn request_count(&self, method: &Method) -> usize {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter(|r| &r.method == method)
            .count()
    }

    pub async fn clear_requests(&self) {
        self.state.lock().await.log.clear();
    }

    /// Answer the next request with `status` and an empty body instead of
    /// processing it.  Calls queue up.
    pub async fn fail_next(&self, status: StatusCode) {
        self.state.lock().await.faults.push_back(status);
    }

    /// While enabled, object PUT responses carry an ETag that does not
    /// match the stored data.
    pub async fn corrupt_etags(&self, enabled: bool) {
        self.state.lock().await.corrupt_etags = enabled;
    }

    /// Remove a middleware from the cluster, e.g. `"bulk_delete"`,
    /// `"bulk_upload"` or `"slo"`.  It disappears from `/info` and the
    /// requests it would handle fall through to plain account, container
    /// and object handling, as on a proxy without that middleware.
    pub async fn disable_capability(&self, name: &str) {
        if let Some(map) = self.state.lock().await.capabilities.as_object_mut() {
            map.remove(name);
        }
    }

    /// Replace one section of the `/info` document.
    pub async fn set_capability(&self, name: &str, value: serde_json::Value) {
        if let Some(map) = self.state.lock().await.capabilities.as_object_mut() {
            map.insert(name.to_string(), value);
        }
    }

    /// Bytes stored for an object, without resolving manifests.
    pub async fn object_data(&self, container: &str, object: &str) -> Option<Bytes> {
        self.state
            .lock()
            .await
            .containers
            .get(container)?
            .objects
            .get(object)
            .map(|o| o.data.clone())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("account_url", &self.account_url)
            .finish_non_exhaustive()
    }
}

impl Transport for MemoryTransport {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + '_>> {
        Box::pin(async move {
            let TransportRequest {
                method,
                endpoint,
                path,
                query,
                headers,
                body,
            } = request;

            let fault = {
                let mut state = self.state.lock().await;
                state.log.push(RecordedRequest {
                    method: method.clone(),
                    endpoint,
                    path: path.clone(),
                    query: query.clone(),
                    headers: headers.clone(),
                });
                state.faults.pop_front()
            };

            // A faulted request is answered without reading its body.
            let body = match (fault, body) {
                (None, Some(stream)) => collect_stream(stream).await?,
                _ => Bytes::new(),
            };

            let reply = match fault {
                Some(status) => Reply::new(status),
                None if endpoint == Endpoint::Cluster => {
                    self.state.lock().await.cluster(&method, &path)
                }
                None => {
                    let call = Call::new(method.clone(), &path, query, headers, body);
                    self.state.lock().await.handle(&call)
                }
            };
            Ok(reply.into_response(&method))
        })
    }

    fn account_url(&self) -> &str {
        &self.account_url
    }
}

// -- Stored state -------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SloSegment {
    path: String,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    size_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
enum Manifest {
    /// `<container>/<prefix>`.
    Dynamic(String),
    Static(Vec<SloSegment>),
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    content_type: String,
    /// Writable headers kept verbatim (metadata, encoding, expiry ...).
    headers: HeaderMap,
    last_modified: SystemTime,
    manifest: Option<Manifest>,
}

#[derive(Debug)]
struct StoredContainer {
    headers: HeaderMap,
    objects: BTreeMap<String, StoredObject>,
    created: SystemTime,
}

impl StoredContainer {
    fn bytes_used(&self) -> u64 {
        self.objects.values().map(|o| o.data.len() as u64).sum()
    }
}

#[derive(Debug)]
struct State {
    account_headers: HeaderMap,
    created: SystemTime,
    containers: BTreeMap<String, StoredContainer>,
    log: Vec<RecordedRequest>,
    faults: VecDeque<StatusCode>,
    corrupt_etags: bool,
    capabilities: serde_json::Value,
}

/// A decoded incoming request.
struct Call {
    method: Method,
    container: Option<String>,
    object: Option<String>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
}

impl Call {
    fn new(
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        let trimmed = path.trim_start_matches('/');
        let (container, object) = match trimmed.split_once('/') {
            _ if trimmed.is_empty() => (None, None),
            Some((c, o)) => (Some(decode(c)), Some(decode(o))),
            None => (Some(decode(trimmed)), None),
        };
        Self {
            method,
            container,
            object,
            query,
            headers,
            body,
        }
    }

    fn query(&self, key: &str) -> Option<&str> {
        query_value(&self.query, key)
    }

    fn has_query(&self, key: &str) -> bool {
        self.query.iter().any(|(k, _)| k == key)
    }

    fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }
}

/// Response under construction.
struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
            .header("content-type", "text/html; charset=UTF-8")
            .body(NOT_FOUND_BODY)
    }

    fn json(status: StatusCode, value: serde_json::Value) -> Self {
        Self::new(status)
            .header("content-type", JSON_CONTENT_TYPE)
            .body(value.to_string())
    }

    fn header(mut self, key: &'static str, value: impl AsRef<str>) -> Self {
        if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
            self.headers.insert(HeaderName::from_static(key), value);
        }
        self
    }

    fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    fn into_response(mut self, method: &Method) -> TransportResponse {
        if !self.headers.contains_key("content-length") {
            self.headers
                .insert("content-length", HeaderValue::from(self.body.len()));
        }
        if let Ok(value) = HeaderValue::from_str(&format!("tx{}", uuid::Uuid::new_v4().simple())) {
            self.headers.insert("x-trans-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now())) {
            self.headers.insert("date", value);
        }
        let body = if method == Method::HEAD {
            Bytes::new()
        } else {
            self.body
        };
        TransportResponse {
            status: self.status,
            headers: self.headers,
            body: chunked(body),
        }
    }
}

// -- Request handling ---------------------------------------------------------

impl State {
    fn new() -> Self {
        Self {
            account_headers: HeaderMap::new(),
            created: SystemTime::now(),
            containers: BTreeMap::new(),
            log: Vec::new(),
            faults: VecDeque::new(),
            corrupt_etags: false,
            capabilities: default_capabilities(),
        }
    }

    fn supports(&self, middleware: &str) -> bool {
        self.capabilities.get(middleware).is_some()
    }

    fn cluster(&self, method: &Method, path: &str) -> Reply {
        match (method, path) {
            (&Method::GET, "/info") => Reply::json(StatusCode::OK, self.capabilities.clone()),
            _ => Reply::not_found(),
        }
    }

    fn handle(&mut self, call: &Call) -> Reply {
        if call.method == Method::PUT
            && call.has_query("extract-archive")
            && self.supports("bulk_upload")
        {
            return self.extract_archive();
        }
        match (call.container.as_deref(), call.object.as_deref()) {
            (None, _) => self.account(call),
            (Some(c), None) => self.container(c, call),
            (Some(c), Some(o)) => self.object(c, o, call),
        }
    }

    // -- Account ------------------------------------------------------------

    fn account(&mut self, call: &Call) -> Reply {
        match call.method {
            Method::HEAD | Method::GET => {
                let objects: usize = self.containers.values().map(|c| c.objects.len()).sum();
                let bytes: u64 = self.containers.values().map(|c| c.bytes_used()).sum();
                let mut reply = Reply::new(StatusCode::NO_CONTENT)
                    .header("content-type", LISTING_CONTENT_TYPE)
                    .header("x-account-container-count", self.containers.len().to_string())
                    .header("x-account-object-count", objects.to_string())
                    .header("x-account-bytes-used", bytes.to_string())
                    .header("x-timestamp", swift_timestamp(self.created));
                extend_headers(&mut reply.headers, &self.account_headers);
                if call.method == Method::GET {
                    reply = self.list_containers(call, reply);
                }
                reply
            }
            Method::POST if call.has_query("bulk-delete") && self.supports("bulk_delete") => {
                self.bulk_delete(call)
            }
            Method::POST => {
                apply_headers(&mut self.account_headers, &call.headers, |k| {
                    k.starts_with("x-account-meta-")
                });
                Reply::new(StatusCode::NO_CONTENT)
            }
            _ => Reply::new(StatusCode::METHOD_NOT_ALLOWED),
        }
    }

    /// Archives are accepted at any level but never unpacked.
    fn extract_archive(&self) -> Reply {
        Reply::json(
            StatusCode::OK,
            json!({
                "Number Files Created": 0,
                "Response Status": "400 Bad Request",
                "Response Body": "Invalid Tar File: archive extraction is not emulated",
                "Errors": [],
            }),
        )
    }

    fn list_containers(&self, call: &Call, reply: Reply) -> Reply {
        let names = self.containers.keys().map(String::as_str);
        let entries = listing_window(names, call, None);
        let json = call.query("format") == Some("json");
        if json {
            let items: Vec<_> = entries
                .iter()
                .filter_map(|entry| match entry {
                    ListingEntry::Name(name) => self.containers.get(*name).map(|c| {
                        json!({
                            "name": name,
                            "count": c.objects.len(),
                            "bytes": c.bytes_used(),
                            "last_modified": listing_time(c.created),
                        })
                    }),
                    ListingEntry::Subdir(_) => None,
                })
                .collect();
            let mut reply = reply.body(serde_json::Value::Array(items).to_string());
            reply.status = StatusCode::OK;
            reply.header("content-type", JSON_CONTENT_TYPE)
        } else {
            plain_listing(reply, &entries)
        }
    }

    fn bulk_delete(&mut self, call: &Call) -> Reply {
        let mut deleted = 0u64;
        let mut not_found = 0u64;
        let mut errors: Vec<(String, String)> = Vec::new();

        let text = String::from_utf8_lossy(&call.body);
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let path = decode(line);
            let path = path.trim_start_matches('/');
            match path.split_once('/') {
                Some((c, o)) => {
                    let removed = self
                        .containers
                        .get_mut(c)
                        .and_then(|container| container.objects.remove(o));
                    match removed {
                        Some(_) => deleted += 1,
                        None => not_found += 1,
                    }
                }
                None => match self.containers.get(path) {
                    None => not_found += 1,
                    Some(container) if !container.objects.is_empty() => {
                        errors.push((line.to_string(), "409 Conflict".to_string()));
                    }
                    Some(_) => {
                        self.containers.remove(path);
                        deleted += 1;
                    }
                },
            }
        }

        let status = if errors.is_empty() {
            "200 OK"
        } else {
            "400 Bad Request"
        };
        Reply::json(
            StatusCode::OK,
            json!({
                "Number Deleted": deleted,
                "Number Not Found": not_found,
                "Response Status": status,
                "Response Body": "",
                "Errors": errors,
            }),
        )
    }

    // -- Container ----------------------------------------------------------

    fn container(&mut self, name: &str, call: &Call) -> Reply {
        match call.method {
            Method::PUT => {
                let status = if self.containers.contains_key(name) {
                    StatusCode::ACCEPTED
                } else {
                    // Storage policy is fixed at creation.
                    let mut headers = HeaderMap::new();
                    headers.insert("x-storage-policy", HeaderValue::from_static("Policy-0"));
                    apply_headers(&mut headers, &call.headers, |k| k == "x-storage-policy");
                    self.containers.insert(
                        name.to_string(),
                        StoredContainer {
                            headers,
                            objects: BTreeMap::new(),
                            created: SystemTime::now(),
                        },
                    );
                    StatusCode::CREATED
                };
                if let Some(container) = self.containers.get_mut(name) {
                    apply_headers(&mut container.headers, &call.headers, container_writable);
                }
                Reply::new(status)
            }
            Method::POST => match self.containers.get_mut(name) {
                None => Reply::not_found(),
                Some(container) => {
                    apply_headers(&mut container.headers, &call.headers, container_writable);
                    Reply::new(StatusCode::NO_CONTENT)
                }
            },
            Method::DELETE => match self.containers.get(name) {
                None => Reply::not_found(),
                Some(container) if !container.objects.is_empty() => {
                    Reply::new(StatusCode::CONFLICT).body(
                        "<html><h1>Conflict</h1><p>There was a conflict when trying to complete your request.</p></html>",
                    )
                }
                Some(_) => {
                    self.containers.remove(name);
                    Reply::new(StatusCode::NO_CONTENT)
                }
            },
            Method::HEAD | Method::GET => match self.containers.get(name) {
                None => Reply::not_found(),
                Some(container) => {
                    let mut reply = Reply::new(StatusCode::NO_CONTENT)
                        .header("content-type", LISTING_CONTENT_TYPE)
                        .header("x-container-object-count", container.objects.len().to_string())
                        .header("x-container-bytes-used", container.bytes_used().to_string())
                        .header("x-timestamp", swift_timestamp(container.created));
                    extend_headers(&mut reply.headers, &container.headers);
                    if call.method == Method::GET {
                        reply = list_objects(container, call, reply);
                    }
                    reply
                }
            },
            _ => Reply::new(StatusCode::METHOD_NOT_ALLOWED),
        }
    }

    // -- Object -------------------------------------------------------------

    fn object(&mut self, container: &str, name: &str, call: &Call) -> Reply {
        match call.method {
            Method::PUT
                if call.query("multipart-manifest") == Some("put") && self.supports("slo") =>
            {
                self.put_static_manifest(container, name, call)
            }
            Method::PUT => self.put_object(container, name, call),
            Method::HEAD | Method::GET => self.get_object(container, name, call),
            Method::POST => self.post_object(container, name, call),
            Method::DELETE => self.delete_object(container, name, call),
            ref m if *m == copy_method() => self.copy_object(container, name, call),
            _ => Reply::new(StatusCode::METHOD_NOT_ALLOWED),
        }
    }

    fn put_object(&mut self, container: &str, name: &str, call: &Call) -> Reply {
        let corrupt = self.corrupt_etags;
        let Some(target) = self.containers.get_mut(container) else {
            return Reply::not_found();
        };
        let etag = md5_hex(&call.body);
        if let Some(expected) = call.header("etag") {
            if !expected.trim().trim_matches('"').eq_ignore_ascii_case(&etag) {
                return Reply::new(StatusCode::UNPROCESSABLE_ENTITY).body(UNPROCESSABLE_BODY);
            }
        }

        let mut headers = HeaderMap::new();
        apply_headers(&mut headers, &call.headers, object_writable);
        apply_delete_after(&mut headers, call);
        let manifest = call
            .header("x-object-manifest")
            .map(|m| Manifest::Dynamic(m.to_string()));
        let object = StoredObject {
            data: call.body.clone(),
            etag: etag.clone(),
            content_type: call
                .header("content-type")
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            headers,
            last_modified: SystemTime::now(),
            manifest,
        };
        let last_modified = object.last_modified;
        target.objects.insert(name.to_string(), object);

        Reply::new(StatusCode::CREATED)
            .header("etag", quoted(&response_etag(&etag, corrupt)))
            .header("last-modified", httpdate::fmt_http_date(last_modified))
            .header("content-type", "text/html; charset=UTF-8")
    }

    fn put_static_manifest(&mut self, container: &str, name: &str, call: &Call) -> Reply {
        if !self.containers.contains_key(container) {
            return Reply::not_found();
        }
        let segments: Vec<SloSegment> = match serde_json::from_slice(&call.body) {
            Ok(segments) => segments,
            Err(e) => {
                return Reply::new(StatusCode::BAD_REQUEST)
                    .body(format!("Manifest must be valid JSON.\n{e}"))
            }
        };
        if segments.is_empty() {
            return Reply::new(StatusCode::BAD_REQUEST).body("Manifest must have at least one segment.");
        }

        let mut resolved = Vec::with_capacity(segments.len());
        let mut problems = Vec::new();
        for segment in &segments {
            match self.lookup(&segment.path) {
                None => problems.push(format!("{}, 404 Not Found", segment.path)),
                Some(stored) => {
                    let etag_ok = segment
                        .etag
                        .as_deref()
                        .map(|e| e.eq_ignore_ascii_case(&stored.etag))
                        .unwrap_or(true);
                    let size_ok = segment
                        .size_bytes
                        .map(|s| s == stored.data.len() as u64)
                        .unwrap_or(true);
                    if !etag_ok {
                        problems.push(format!("{}, Etag Mismatch", segment.path));
                    } else if !size_ok {
                        problems.push(format!("{}, Size Mismatch", segment.path));
                    } else {
                        resolved.push(SloSegment {
                            path: segment.path.clone(),
                            etag: Some(stored.etag.clone()),
                            size_bytes: Some(stored.data.len() as u64),
                        });
                    }
                }
            }
        }
        if !problems.is_empty() {
            return Reply::new(StatusCode::BAD_REQUEST)
                .body(format!("Errors:\n{}", problems.join("\n")));
        }

        let etag = etag_of_etags(resolved.iter().filter_map(|s| s.etag.as_deref()));
        let data = match serde_json::to_vec(&resolved) {
            Ok(data) => Bytes::from(data),
            Err(_) => return Reply::new(StatusCode::INTERNAL_SERVER_ERROR),
        };
        let mut headers = HeaderMap::new();
        apply_headers(&mut headers, &call.headers, object_writable);
        let object = StoredObject {
            data,
            etag: etag.clone(),
            content_type: call
                .header("content-type")
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            headers,
            last_modified: SystemTime::now(),
            manifest: Some(Manifest::Static(resolved)),
        };
        let corrupt = self.corrupt_etags;
        if let Some(target) = self.containers.get_mut(container) {
            target.objects.insert(name.to_string(), object);
        }
        Reply::new(StatusCode::CREATED).header("etag", quoted(&response_etag(&etag, corrupt)))
    }

    fn get_object(&self, container: &str, name: &str, call: &Call) -> Reply {
        let Some(object) = self
            .containers
            .get(container)
            .and_then(|c| c.objects.get(name))
        else {
            return Reply::not_found();
        };

        if call.query("multipart-manifest") == Some("get") {
            if let Some(Manifest::Static(_)) = &object.manifest {
                return Reply::new(StatusCode::OK)
                    .header("content-type", JSON_CONTENT_TYPE)
                    .header("etag", quoted(&md5_hex(&object.data)))
                    .header("x-static-large-object", "True")
                    .body(object.data.clone());
            }
        }

        let (data, etag) = self.content_of(object);
        if let Some(expected) = call.header("if-match") {
            if expected.trim() != "*" && expected.trim().trim_matches('"') != etag {
                return Reply::new(StatusCode::PRECONDITION_FAILED);
            }
        }
        if let Some(unwanted) = call.header("if-none-match") {
            if unwanted.trim() == "*" || unwanted.trim().trim_matches('"') == etag {
                return Reply::new(StatusCode::NOT_MODIFIED).header("etag", quoted(&etag));
            }
        }

        let mut reply = Reply::new(StatusCode::OK)
            .header("content-type", &object.content_type)
            .header("etag", quoted(&etag))
            .header("last-modified", httpdate::fmt_http_date(object.last_modified))
            .header("x-timestamp", swift_timestamp(object.last_modified))
            .header("accept-ranges", "bytes");
        extend_headers(&mut reply.headers, &object.headers);
        match &object.manifest {
            Some(Manifest::Dynamic(prefix)) => reply = reply.header("x-object-manifest", prefix),
            Some(Manifest::Static(_)) => reply = reply.header("x-static-large-object", "True"),
            None => {}
        }

        let total = data.len() as u64;
        let range = call.header("range").and_then(parse_range_header);
        match range {
            None => reply.body(data),
            Some(range) => match resolve_range(&range, total) {
                None => Reply::new(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header("content-range", format!("bytes */{total}")),
                Some((start, end)) => {
                    reply.status = StatusCode::PARTIAL_CONTENT;
                    reply
                        .header("content-range", format!("bytes {start}-{end}/{total}"))
                        .body(data.slice(start as usize..=end as usize))
                }
            },
        }
    }

    fn post_object(&mut self, container: &str, name: &str, call: &Call) -> Reply {
        let Some(object) = self
            .containers
            .get_mut(container)
            .and_then(|c| c.objects.get_mut(name))
        else {
            return Reply::not_found();
        };
        // Metadata is replaced, not merged.
        let mut headers = HeaderMap::new();
        for (key, value) in &object.headers {
            if !key.as_str().starts_with("x-object-meta-") {
                headers.append(key.clone(), value.clone());
            }
        }
        apply_headers(&mut headers, &call.headers, object_writable);
        apply_delete_after(&mut headers, call);
        object.headers = headers;
        if let Some(content_type) = call.header("content-type") {
            object.content_type = content_type.to_string();
        }
        Reply::new(StatusCode::ACCEPTED).body(ACCEPTED_BODY)
    }

    fn delete_object(&mut self, container: &str, name: &str, call: &Call) -> Reply {
        let Some(target) = self.containers.get_mut(container) else {
            return Reply::not_found();
        };
        let Some(object) = target.objects.remove(name) else {
            return Reply::not_found();
        };
        if call.query("multipart-manifest") != Some("delete") {
            return Reply::new(StatusCode::NO_CONTENT);
        }

        let mut deleted = 1u64;
        let mut not_found = 0u64;
        if let Some(Manifest::Static(segments)) = &object.manifest {
            for segment in segments {
                let path = segment.path.trim_start_matches('/');
                let removed = path.split_once('/').and_then(|(c, o)| {
                    self.containers
                        .get_mut(c)
                        .and_then(|container| container.objects.remove(o))
                });
                match removed {
                    Some(_) => deleted += 1,
                    None => not_found += 1,
                }
            }
        }
        Reply::json(
            StatusCode::OK,
            json!({
                "Number Deleted": deleted,
                "Number Not Found": not_found,
                "Response Status": "200 OK",
                "Response Body": "",
                "Errors": [],
            }),
        )
    }

    fn copy_object(&mut self, container: &str, name: &str, call: &Call) -> Reply {
        let Some(destination) = call.header("destination") else {
            return Reply::new(StatusCode::PRECONDITION_FAILED)
                .body("Destination header required");
        };
        let destination = decode(destination);
        let Some((dest_container, dest_name)) =
            destination.trim_start_matches('/').split_once('/')
        else {
            return Reply::new(StatusCode::PRECONDITION_FAILED)
                .body("Destination header must be of the form <container name>/<object name>");
        };
        let Some(source) = self
            .containers
            .get(container)
            .and_then(|c| c.objects.get(name))
        else {
            return Reply::not_found();
        };
        if !self.containers.contains_key(dest_container) {
            return Reply::not_found();
        }

        let (data, _) = self.content_of(source);
        let mut headers = source.headers.clone();
        apply_headers(&mut headers, &call.headers, object_writable);
        let etag = md5_hex(&data);
        let copy = StoredObject {
            data,
            etag: etag.clone(),
            content_type: call
                .header("content-type")
                .unwrap_or(&source.content_type)
                .to_string(),
            headers,
            last_modified: SystemTime::now(),
            manifest: None,
        };
        let copied_from = format!("{container}/{name}");
        if let Some(target) = self.containers.get_mut(dest_container) {
            target.objects.insert(dest_name.to_string(), copy);
        }
        Reply::new(StatusCode::CREATED)
            .header("etag", quoted(&etag))
            .header("x-copied-from", copied_from)
    }

    // -- Helpers ------------------------------------------------------------

    /// Resolve `/container/object` (leading slash optional).
    fn lookup(&self, path: &str) -> Option<&StoredObject> {
        let (c, o) = path.trim_start_matches('/').split_once('/')?;
        self.containers.get(c)?.objects.get(o)
    }

    /// Body and ETag as served on GET, with manifests expanded.
    fn content_of(&self, object: &StoredObject) -> (Bytes, String) {
        match &object.manifest {
            None => (object.data.clone(), object.etag.clone()),
            Some(Manifest::Static(segments)) => {
                let mut buf = BytesMut::new();
                for segment in segments {
                    if let Some(stored) = self.lookup(&segment.path) {
                        buf.extend_from_slice(&stored.data);
                    }
                }
                (buf.freeze(), object.etag.clone())
            }
            Some(Manifest::Dynamic(manifest)) => {
                let (c, prefix) = manifest.split_once('/').unwrap_or((manifest.as_str(), ""));
                let mut buf = BytesMut::new();
                let mut etags = Vec::new();
                if let Some(container) = self.containers.get(c) {
                    for (_, stored) in container
                        .objects
                        .iter()
                        .filter(|(n, _)| n.starts_with(prefix))
                    {
                        buf.extend_from_slice(&stored.data);
                        etags.push(stored.etag.clone());
                    }
                }
                (buf.freeze(), etag_of_etags(etags.iter().map(String::as_str)))
            }
        }
    }
}

// -- Listings -----------------------------------------------------------------

enum ListingEntry<'a> {
    Name(&'a str),
    Subdir(String),
}

/// Apply prefix, delimiter, marker, end_marker and limit to sorted names.
fn listing_window<'a>(
    names: impl Iterator<Item = &'a str>,
    call: &Call,
    delimiter: Option<&str>,
) -> Vec<ListingEntry<'a>> {
    let prefix = call.query("prefix").unwrap_or("");
    let marker = call.query("marker").unwrap_or("");
    let end_marker = call.query("end_marker");
    let limit = call
        .query("limit")
        .and_then(|l| l.parse::<usize>().ok())
        .map_or(DEFAULT_LISTING_LIMIT, |l| l.min(DEFAULT_LISTING_LIMIT));

    let mut out = Vec::new();
    for name in names {
        if out.len() >= limit {
            break;
        }
        if name <= marker || !name.starts_with(prefix) {
            continue;
        }
        if end_marker.is_some_and(|end| name >= end) {
            break;
        }
        if let Some(delim) = delimiter.filter(|d| !d.is_empty()) {
            if let Some(pos) = name[prefix.len()..].find(delim) {
                let subdir = &name[..prefix.len() + pos + delim.len()];
                let repeated = matches!(out.last(), Some(ListingEntry::Subdir(s)) if s == subdir);
                if !repeated && subdir > marker {
                    out.push(ListingEntry::Subdir(subdir.to_string()));
                }
                continue;
            }
        }
        out.push(ListingEntry::Name(name));
    }
    out
}

fn list_objects(container: &StoredContainer, call: &Call, reply: Reply) -> Reply {
    let names = container.objects.keys().map(String::as_str);
    let entries = listing_window(names, call, call.query("delimiter"));
    if call.query("format") != Some("json") {
        return plain_listing(reply, &entries);
    }
    let items: Vec<_> = entries
        .iter()
        .filter_map(|entry| match entry {
            ListingEntry::Subdir(subdir) => Some(json!({ "subdir": subdir })),
            ListingEntry::Name(name) => container.objects.get(*name).map(|o| {
                json!({
                    "name": name,
                    "bytes": o.data.len(),
                    "hash": o.etag,
                    "content_type": o.content_type,
                    "last_modified": listing_time(o.last_modified),
                })
            }),
        })
        .collect();
    let mut reply = reply.body(serde_json::Value::Array(items).to_string());
    reply.status = StatusCode::OK;
    reply.header("content-type", JSON_CONTENT_TYPE)
}

fn plain_listing(mut reply: Reply, entries: &[ListingEntry<'_>]) -> Reply {
    if entries.is_empty() {
        reply.status = StatusCode::NO_CONTENT;
        return reply;
    }
    let mut text = String::new();
    for entry in entries {
        match entry {
            ListingEntry::Name(name) => text.push_str(name),
            ListingEntry::Subdir(subdir) => text.push_str(subdir),
        }
        text.push('\n');
    }
    reply.status = StatusCode::OK;
    reply.body(text)
}

// -- Range parsing ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum ByteRange {
    /// bytes=start-end (inclusive)
    StartEnd(u64, u64),
    /// bytes=start-
    StartOpen(u64),
    /// bytes=-N
    Suffix(u64),
}

/// Parse a single `bytes=` range.  Anything else is ignored, as Swift
/// does, and the full body is served.
fn parse_range_header(value: &str) -> Option<ByteRange> {
    let range = value.trim().strip_prefix("bytes=")?;
    if range.contains(',') {
        return None;
    }
    if let Some(suffix) = range.strip_prefix('-') {
        let n: u64 = suffix.parse().ok()?;
        return (n > 0).then_some(ByteRange::Suffix(n));
    }
    if let Some(start) = range.strip_suffix('-') {
        return start.parse().ok().map(ByteRange::StartOpen);
    }
    let (start, end) = range.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    (start <= end).then_some(ByteRange::StartEnd(start, end))
}

/// Inclusive `(start, end)` within `total`, or `None` when unsatisfiable.
fn resolve_range(range: &ByteRange, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    match *range {
        ByteRange::StartEnd(start, _) | ByteRange::StartOpen(start) if start >= total => None,
        ByteRange::StartEnd(start, end) => Some((start, end.min(total - 1))),
        ByteRange::StartOpen(start) => Some((start, total - 1)),
        ByteRange::Suffix(n) => Some((total.saturating_sub(n), total - 1)),
    }
}

// -- Small helpers ------------------------------------------------------------

fn query_value<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

fn response_etag(etag: &str, corrupt: bool) -> String {
    if corrupt {
        md5_hex(format!("corrupted:{etag}").as_bytes())
    } else {
        etag.to_string()
    }
}

fn quoted(etag: &str) -> String {
    format!("\"{etag}\"")
}

fn swift_timestamp(time: SystemTime) -> String {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64();
    format!("{secs:.5}")
}

fn listing_time(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time)
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

fn container_writable(key: &str) -> bool {
    key.starts_with("x-container-meta-")
        || matches!(
            key,
            "x-container-read" | "x-container-write" | "x-versions-location"
        )
}

fn object_writable(key: &str) -> bool {
    key.starts_with("x-object-meta-")
        || matches!(
            key,
            "content-encoding" | "content-disposition" | "x-delete-at"
        )
}

/// Copy accepted headers; an empty value removes the key.
fn apply_headers(target: &mut HeaderMap, incoming: &HeaderMap, accept: impl Fn(&str) -> bool) {
    for (name, value) in incoming {
        if !accept(name.as_str()) {
            continue;
        }
        if value.is_empty() {
            target.remove(name);
        } else {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn apply_delete_after(headers: &mut HeaderMap, call: &Call) {
    let Some(after) = call.header("x-delete-after").and_then(|v| v.trim().parse::<u64>().ok())
    else {
        return;
    };
    let at = SystemTime::now() + Duration::from_secs(after);
    let secs = at.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs();
    headers.insert("x-delete-at", HeaderValue::from(secs));
}

fn extend_headers(target: &mut HeaderMap, source: &HeaderMap) {
    for (name, value) in source {
        target.insert(name.clone(), value.clone());
    }
}

fn chunked(body: Bytes) -> ByteStream {
    let chunks: Vec<io::Result<Bytes>> = (0..body.len())
        .step_by(RESPONSE_CHUNK_SIZE)
        .map(|start| Ok(body.slice(start..(start + RESPONSE_CHUNK_SIZE).min(body.len()))))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

/// `/info` of a proxy with the usual middleware installed.
fn default_capabilities() -> serde_json::Value {
    json!({
        "swift": {
            "version": "2.31.1",
            "max_file_size": 5_368_709_122u64,
            "max_object_name_length": 1024,
            "container_listing_limit": DEFAULT_LISTING_LIMIT,
            "account_listing_limit": DEFAULT_LISTING_LIMIT,
        },
        "bulk_delete": {
            "max_deletes_per_request": 10_000,
            "max_failed_deletes": 1000,
        },
        "bulk_upload": {
            "max_containers_per_extraction": 10_000,
            "max_failed_extractions": 1000,
        },
        "slo": {
            "max_manifest_segments": 1000,
            "max_manifest_size": 8_388_608,
            "min_segment_size": 1,
        },
        "tempurl": {
            "methods": ["GET", "HEAD", "PUT", "POST", "DELETE"],
        },
    })
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::once_stream;

    fn request(method: Method, path: &str) -> TransportRequest {
        TransportRequest {
            method,
            endpoint: Endpoint::Account,
            path: path.to_string(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    async fn send(t: &MemoryTransport, req: TransportRequest) -> (StatusCode, HeaderMap, Bytes) {
        let resp = t.execute(req).await.unwrap();
        let body = collect_stream(resp.body).await.unwrap();
        (resp.status, resp.headers, body)
    }

    async fn put(t: &MemoryTransport, path: &str, data: &'static [u8]) -> StatusCode {
        let mut req = request(Method::PUT, path);
        req.body = Some(once_stream(Bytes::from_static(data)));
        send(t, req).await.0
    }

    #[test]
    fn test_parse_range_header() {
        assert_eq!(parse_range_header("bytes=0-4"), Some(ByteRange::StartEnd(0, 4)));
        assert_eq!(parse_range_header("bytes=5-"), Some(ByteRange::StartOpen(5)));
        assert_eq!(parse_range_header("bytes=-3"), Some(ByteRange::Suffix(3)));
        assert_eq!(parse_range_header("bytes=4-2"), None);
        assert_eq!(parse_range_header("bytes=0-1,3-4"), None);
        assert_eq!(parse_range_header("items=0-1"), None);
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(&ByteRange::StartEnd(0, 99), 10), Some((0, 9)));
        assert_eq!(resolve_range(&ByteRange::StartOpen(10), 10), None);
        assert_eq!(resolve_range(&ByteRange::Suffix(20), 10), Some((0, 9)));
        assert_eq!(resolve_range(&ByteRange::Suffix(3), 10), Some((7, 9)));
        assert_eq!(resolve_range(&ByteRange::StartOpen(0), 0), None);
    }

    #[tokio::test]
    async fn test_container_lifecycle() {
        let t = MemoryTransport::new();
        assert_eq!(put(&t, "/c", b"").await, StatusCode::CREATED);
        assert_eq!(put(&t, "/c", b"").await, StatusCode::ACCEPTED);
        assert_eq!(put(&t, "/c/o", b"hello").await, StatusCode::CREATED);

        let (status, _, _) = send(&t, request(Method::DELETE, "/c")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, headers, body) = send(&t, request(Method::HEAD, "/c")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(headers.get("x-container-object-count").unwrap(), "1");
        assert_eq!(headers.get("x-container-bytes-used").unwrap(), "5");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_object_not_found_body() {
        let t = MemoryTransport::new();
        put(&t, "/c", b"").await;
        let (status, _, body) = send(&t, request(Method::DELETE, "/c/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, NOT_FOUND_BODY.as_bytes());

        let (status, _, body) = send(&t, request(Method::HEAD, "/c/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_put_rejects_wrong_etag() {
        let t = MemoryTransport::new();
        put(&t, "/c", b"").await;
        let mut req = request(Method::PUT, "/c/o");
        req.headers
            .insert("etag", HeaderValue::from_static("00000000000000000000000000000000"));
        req.body = Some(once_stream(Bytes::from_static(b"data")));
        let (status, _, _) = send(&t, req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(t.object_data("c", "o").await.is_none());
    }

    #[tokio::test]
    async fn test_range_requests() {
        let t = MemoryTransport::new();
        put(&t, "/c", b"").await;
        put(&t, "/c/o", b"0123456789").await;

        let mut req = request(Method::GET, "/c/o");
        req.headers.insert("range", HeaderValue::from_static("bytes=2-4"));
        let (status, headers, body) = send(&t, req).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(body, Bytes::from_static(b"234"));
        assert_eq!(headers.get("content-range").unwrap(), "bytes 2-4/10");

        let mut req = request(Method::GET, "/c/o");
        req.headers.insert("range", HeaderValue::from_static("bytes=50-"));
        let (status, _, _) = send(&t, req).await;
        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn test_listing_with_delimiter() {
        let t = MemoryTransport::new();
        put(&t, "/c", b"").await;
        for name in ["a/1", "a/2", "b", "c/x/y"] {
            let mut req = request(Method::PUT, &format!("/c/{name}"));
            req.body = Some(once_stream(Bytes::from_static(b"x")));
            send(&t, req).await;
        }
        let mut req = request(Method::GET, "/c");
        req.query = vec![("delimiter".into(), "/".into())];
        let (status, _, body) = send(&t, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"a/\nb\nc/\n"));

        let mut req = request(Method::GET, "/c");
        req.query = vec![
            ("delimiter".into(), "/".into()),
            ("marker".into(), "a/".into()),
        ];
        let (_, _, body) = send(&t, req).await;
        assert_eq!(body, Bytes::from_static(b"b\nc/\n"));
    }

    #[tokio::test]
    async fn test_fault_injection_and_log() {
        let t = MemoryTransport::new();
        t.fail_next(StatusCode::SERVICE_UNAVAILABLE).await;
        let (status, _, _) = send(&t, request(Method::HEAD, "")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, headers, _) = send(&t, request(Method::HEAD, "")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(headers.get("content-type").unwrap(), LISTING_CONTENT_TYPE);
        assert_eq!(t.request_count(&Method::HEAD).await, 2);
        t.clear_requests().await;
        assert!(t.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_response_body_is_chunked() {
        let t = MemoryTransport::new();
        put(&t, "/c", b"").await;
        let data: &'static [u8] = Box::leak(vec![7u8; 2500].into_boxed_slice());
        put(&t, "/c/big", data).await;

        let resp = t.execute(request(Method::GET, "/c/big")).await.unwrap();
        let chunks: Vec<_> = futures::StreamExt::collect::<Vec<_>>(resp.body).await;
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_info_document() {
        let t = MemoryTransport::new();
        let mut req = request(Method::GET, "/info");
        req.endpoint = Endpoint::Cluster;
        let (status, _, body) = send(&t, req).await;
        assert_eq!(status, StatusCode::OK);
        let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(info["bulk_delete"]["max_deletes_per_request"], 10_000);
        assert!(info.get("slo").is_some());

        // Same path on the account endpoint is a container.
        let (status, _, _) = send(&t, request(Method::GET, "/info")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_disabled_middleware_falls_through() {
        let t = MemoryTransport::new();
        t.disable_capability("bulk_delete").await;
        t.disable_capability("slo").await;

        let mut req = request(Method::GET, "/info");
        req.endpoint = Endpoint::Cluster;
        let (_, _, body) = send(&t, req).await;
        let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(info.get("bulk_delete").is_none());
        assert!(info.get("slo").is_none());
        assert!(info.get("bulk_upload").is_some());

        let mut req = request(Method::POST, "");
        req.query.push(("bulk-delete".into(), "true".into()));
        let (status, _, body) = send(&t, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        put(&t, "/c", b"").await;
        let mut req = request(Method::PUT, "/c/manifest");
        req.query.push(("multipart-manifest".into(), "put".into()));
        req.body = Some(once_stream(Bytes::from_static(b"[]")));
        let (status, _, _) = send(&t, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(t.object_data("c", "manifest").await.unwrap(), Bytes::from_static(b"[]"));
    }
}
