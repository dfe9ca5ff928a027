//! Wire transport abstraction.
//!
//! The [`Transport`] trait is the only place where bytes leave the
//! process.  It receives a fully built request (method, account-relative
//! path, query, headers, optional streaming body) and returns the raw
//! response.  Authentication and base URL resolution happen inside the
//! transport; status classification does not.
//!
//! Implementations: [`remote::HttpTransport`] talks to a real Swift
//! endpoint via `reqwest`, [`memory::MemoryTransport`] emulates one
//! in-process.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{HeaderMap, Method, StatusCode};

use crate::errors::Result;

pub mod memory;
pub mod remote;

/// A body travelling to or from the service.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// A body that ends immediately.
pub fn empty_stream() -> ByteStream {
    Box::pin(futures::stream::empty())
}

/// A body consisting of a single chunk.
pub fn once_stream(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Read a whole body into memory.
pub async fn collect_stream(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut buf = bytes::BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Base a request path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endpoint {
    /// The account URL, e.g. `https://host/v1/AUTH_abc`.
    #[default]
    Account,
    /// The cluster root, i.e. the account URL without its last two
    /// segments (`/v1/AUTH_abc`).  Only `/info` lives here.
    Cluster,
}

/// Cluster root for an account URL such as `https://host/v1/AUTH_abc`.
pub fn cluster_root(account_url: &str) -> &str {
    let trimmed = account_url.trim_end_matches('/');
    match trimmed.rsplitn(3, '/').nth(2) {
        Some(root) if !root.ends_with(':') && !root.ends_with('/') => root,
        _ => trimmed,
    }
}

/// A request as handed to the transport.
pub struct TransportRequest {
    pub method: Method,
    pub endpoint: Endpoint,
    /// Percent-encoded path relative to the endpoint.  For the account
    /// endpoint: empty for the account itself, `/container` or
    /// `/container/object` otherwise.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<ByteStream>,
}

impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRequest")
            .field("method", &self.method)
            .field("endpoint", &self.endpoint)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

/// A response as returned by the transport.  The body has not been read.
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Async request/response exchange with a Swift account endpoint.
pub trait Transport: Send + Sync + 'static {
    /// Perform one exchange.  Must not retry and must not interpret the
    /// status code.
    fn execute(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + '_>>;

    /// Public URL of the account, e.g. `https://swift.example.com/v1/AUTH_abc`.
    fn account_url(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_root() {
        assert_eq!(cluster_root("https://swift.example.com/v1/AUTH_abc"), "https://swift.example.com");
        assert_eq!(cluster_root("https://swift.example.com/v1/AUTH_abc/"), "https://swift.example.com");
        assert_eq!(cluster_root("http://host:8080/swift/v1/AUTH_abc"), "http://host:8080/swift");
        assert_eq!(cluster_root("http://host/v1"), "http://host/v1");
    }
}
