use std::time::SystemTime;

use http::HeaderMap;

use super::{get_u64, get_unix_time, put, raw_str, Headers};
use crate::errors::Result;

/// Headers of an account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountHeaders {
    raw: HeaderMap,
}

impl AccountHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// `X-Account-Container-Count`.
    pub fn container_count(&self) -> Result<Option<u64>> {
        get_u64(&self.raw, "x-account-container-count")
    }

    /// `X-Account-Object-Count`.
    pub fn object_count(&self) -> Result<Option<u64>> {
        get_u64(&self.raw, "x-account-object-count")
    }

    /// `X-Account-Bytes-Used`.
    pub fn bytes_used(&self) -> Result<Option<u64>> {
        get_u64(&self.raw, "x-account-bytes-used")
    }

    /// Quota set by a reseller admin (`X-Account-Meta-Quota-Bytes`).
    pub fn quota_bytes(&self) -> Result<Option<u64>> {
        get_u64(&self.raw, "x-account-meta-quota-bytes")
    }

    pub fn set_quota_bytes(&mut self, bytes: u64) -> Result<()> {
        put(&mut self.raw, "x-account-meta-quota-bytes", &bytes.to_string())
    }

    /// `X-Account-Meta-Temp-URL-Key`.
    pub fn temp_url_key(&self) -> Option<&str> {
        raw_str(&self.raw, "x-account-meta-temp-url-key")
    }

    pub fn set_temp_url_key(&mut self, key: &str) -> Result<()> {
        put(&mut self.raw, "x-account-meta-temp-url-key", key)
    }

    /// `X-Account-Meta-Temp-URL-Key-2`, used while rotating keys.
    pub fn temp_url_key_2(&self) -> Option<&str> {
        raw_str(&self.raw, "x-account-meta-temp-url-key-2")
    }

    pub fn set_temp_url_key_2(&mut self, key: &str) -> Result<()> {
        put(&mut self.raw, "x-account-meta-temp-url-key-2", key)
    }

    /// Creation time (`X-Timestamp`).
    pub fn timestamp(&self) -> Result<Option<SystemTime>> {
        get_unix_time(&self.raw, "x-timestamp")
    }
}

impl Headers for AccountHeaders {
    const METADATA_PREFIX: &'static str = "x-account-meta-";
    const READ_ONLY: &'static [&'static str] = &[
        "content-type",
        "x-account-bytes-used",
        "x-account-container-count",
        "x-account-object-count",
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
        self.container_count()?;
        self.object_count()?;
        self.bytes_used()?;
        self.quota_bytes()?;
        self.timestamp()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_account_counters() {
        let mut raw = HeaderMap::new();
        raw.insert("x-account-container-count", HeaderValue::from_static("2"));
        raw.insert("x-account-object-count", HeaderValue::from_static("7"));
        raw.insert("x-account-bytes-used", HeaderValue::from_static("1024"));
        let hdr = AccountHeaders::from_raw(raw);

        assert_eq!(hdr.container_count().unwrap(), Some(2));
        assert_eq!(hdr.object_count().unwrap(), Some(7));
        assert_eq!(hdr.bytes_used().unwrap(), Some(1024));
        assert_eq!(hdr.quota_bytes().unwrap(), None);
        assert!(hdr.validate().is_ok());
    }

    #[test]
    fn test_account_validate_reports_bad_counter() {
        let mut raw = HeaderMap::new();
        raw.insert("x-account-object-count", HeaderValue::from_static("-1"));
        let err = AccountHeaders::from_raw(raw).validate().unwrap_err();
        assert!(err.to_string().contains("x-account-object-count"));
    }

    #[test]
    fn test_temp_url_key_is_metadata() {
        let mut hdr = AccountHeaders::new();
        hdr.set_temp_url_key("secret").unwrap();
        assert_eq!(hdr.temp_url_key(), Some("secret"));
        assert_eq!(hdr.metadata().get("temp-url-key"), Some("secret"));
    }
}
