use std::time::{Duration, SystemTime};

use http::HeaderMap;

use super::{get_bool, get_http_date, get_u64, get_unix_time, put, put_unix_time, raw_str, Headers};
use crate::errors::Result;

/// Headers of an object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHeaders {
    raw: HeaderMap,
}

impl ObjectHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(&self) -> Option<&str> {
        raw_str(&self.raw, "content-type")
    }

    pub fn set_content_type(&mut self, value: &str) -> Result<()> {
        put(&mut self.raw, "content-type", value)
    }

    /// Size in bytes as reported by the service.
    pub fn content_length(&self) -> Result<Option<u64>> {
        get_u64(&self.raw, "content-length")
    }

    pub fn content_encoding(&self) -> Option<&str> {
        raw_str(&self.raw, "content-encoding")
    }

    pub fn set_content_encoding(&mut self, value: &str) -> Result<()> {
        put(&mut self.raw, "content-encoding", value)
    }

    pub fn content_disposition(&self) -> Option<&str> {
        raw_str(&self.raw, "content-disposition")
    }

    pub fn set_content_disposition(&mut self, value: &str) -> Result<()> {
        put(&mut self.raw, "content-disposition", value)
    }

    /// ETag with surrounding quotes removed.  For plain objects this is
    /// the hex MD5 of the content; for large objects it is derived from
    /// the segments.
    pub fn etag(&self) -> Option<&str> {
        raw_str(&self.raw, "etag").map(|v| v.trim().trim_matches('"'))
    }

    /// Expected MD5 of an upload; the service rejects mismatching bodies
    /// with 422.
    pub fn set_etag(&mut self, value: &str) -> Result<()> {
        put(&mut self.raw, "etag", value)
    }

    pub fn last_modified(&self) -> Result<Option<SystemTime>> {
        get_http_date(&self.raw, "last-modified")
    }

    /// `X-Timestamp`, with sub-second precision.
    pub fn timestamp(&self) -> Result<Option<SystemTime>> {
        get_unix_time(&self.raw, "x-timestamp")
    }

    /// Scheduled expiry (`X-Delete-At`).
    pub fn delete_at(&self) -> Result<Option<SystemTime>> {
        get_unix_time(&self.raw, "x-delete-at")
    }

    pub fn set_delete_at(&mut self, at: SystemTime) -> Result<()> {
        self.raw.remove("x-delete-after");
        put_unix_time(&mut self.raw, "x-delete-at", at)
    }

    /// Relative expiry.  The service converts it into `X-Delete-At`.
    pub fn set_delete_after(&mut self, after: Duration) -> Result<()> {
        self.raw.remove("x-delete-at");
        put(&mut self.raw, "x-delete-after", &after.as_secs().to_string())
    }

    /// `X-Object-Manifest` of a dynamic large object:
    /// `<container>/<prefix>`.
    pub fn object_manifest(&self) -> Option<&str> {
        raw_str(&self.raw, "x-object-manifest")
    }

    pub fn set_object_manifest(&mut self, value: &str) -> Result<()> {
        put(&mut self.raw, "x-object-manifest", value)
    }

    /// Whether the object is a static large object manifest.
    pub fn is_static_large_object(&self) -> Result<bool> {
        get_bool(&self.raw, "x-static-large-object")
    }
}

impl Headers for ObjectHeaders {
    const METADATA_PREFIX: &'static str = "x-object-meta-";
    const READ_ONLY: &'static [&'static str] = &["x-static-large-object"];

    fn from_raw(raw: HeaderMap) -> Self {
        Self { raw }
    }

    fn raw(&self) -> &HeaderMap {
        &self.raw
    }

    fn raw_mut(&mut self) -> &mut HeaderMap {
        &mut self.raw
    }

    fn validate(&self) -> Result<()> {
        self.content_length()?;
        self.last_modified()?;
        self.timestamp()?;
        self.delete_at()?;
        self.is_static_large_object()?;
        Ok(())
    }
}
