use std::time::SystemTime;

use http::HeaderMap;

use super::{get_u64, get_unix_time, put, raw_str, Headers};
use crate::errors::Result;

/// Headers of a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerHeaders {
    raw: HeaderMap,
}

impl ContainerHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// `X-Container-Object-Count`.
    pub fn object_count(&self) -> Result<Option<u64>> {
        get_u64(&self.raw, "x-container-object-count")
    }

    /// `X-Container-Bytes-Used`.
    pub fn bytes_used(&self) -> Result<Option<u64>> {
        get_u64(&self.raw, "x-container-bytes-used")
    }

    /// `X-Container-Meta-Quota-Bytes`.
    pub fn quota_bytes(&self) -> Result<Option<u64>> {
        get_u64(&self.raw, "x-container-meta-quota-bytes")
    }

    pub fn set_quota_bytes(&mut self, bytes: u64) -> Result<()> {
        put(&mut self.raw, "x-container-meta-quota-bytes", &bytes.to_string())
    }

    /// `X-Container-Meta-Quota-Count`.
    pub fn quota_count(&self) -> Result<Option<u64>> {
        get_u64(&self.raw, "x-container-meta-quota-count")
    }

    pub fn set_quota_count(&mut self, count: u64) -> Result<()> {
        put(&mut self.raw, "x-container-meta-quota-count", &count.to_string())
    }

    /// Read ACL (`X-Container-Read`), e.g. `.r:*,.rlistings`.
    pub fn read_acl(&self) -> Option<&str> {
        raw_str(&self.raw, "x-container-read")
    }

    pub fn set_read_acl(&mut self, acl: &str) -> Result<()> {
        put(&mut self.raw, "x-container-read", acl)
    }

    /// Write ACL (`X-Container-Write`).
    pub fn write_acl(&self) -> Option<&str> {
        raw_str(&self.raw, "x-container-write")
    }

    pub fn set_write_acl(&mut self, acl: &str) -> Result<()> {
        put(&mut self.raw, "x-container-write", acl)
    }

    /// `X-Storage-Policy`.  Only honoured when creating the container.
    pub fn storage_policy(&self) -> Option<&str> {
        raw_str(&self.raw, "x-storage-policy")
    }

    pub fn set_storage_policy(&mut self, policy: &str) -> Result<()> {
        put(&mut self.raw, "x-storage-policy", policy)
    }

    /// `X-Versions-Location`.
    pub fn versions_location(&self) -> Option<&str> {
        raw_str(&self.raw, "x-versions-location")
    }

    pub fn set_versions_location(&mut self, container: &str) -> Result<()> {
        put(&mut self.raw, "x-versions-location", container)
    }

    /// `X-Container-Meta-Temp-URL-Key`.
    pub fn temp_url_key(&self) -> Option<&str> {
        raw_str(&self.raw, "x-container-meta-temp-url-key")
    }

    pub fn set_temp_url_key(&mut self, key: &str) -> Result<()> {
        put(&mut self.raw, "x-container-meta-temp-url-key", key)
    }

    /// `X-Container-Meta-Temp-URL-Key-2`.
    pub fn temp_url_key_2(&self) -> Option<&str> {
        raw_str(&self.raw, "x-container-meta-temp-url-key-2")
    }

    pub fn set_temp_url_key_2(&mut self, key: &str) -> Result<()> {
        put(&mut self.raw, "x-container-meta-temp-url-key-2", key)
    }

    /// Creation time (`X-Timestamp`).
    pub fn timestamp(&self) -> Result<Option<SystemTime>> {
        get_unix_time(&self.raw, "x-timestamp")
    }
}

impl Headers for ContainerHeaders {
    const METADATA_PREFIX: &'static str = "x-container-meta-";
    const READ_ONLY: &'static [&'static str] = &[
        "content-type",
        "x-container-bytes-used",
        "x-container-object-count",
    ];

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
        self.object_count()?;
        self.bytes_used()?;
        self.quota_bytes()?;
        self.quota_count()?;
        self.timestamp()?;
        Ok(())
    }
}
