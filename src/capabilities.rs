//! Cluster capabilities.
//!
//! A Swift proxy publishes the middleware it runs, with their limits, as
//! a JSON document at `/info` on the cluster root.  Operations that rely
//! on optional middleware (bulk delete, archive extraction, static large
//! objects) consult it first and fail with [`Error::NotSupported`]
//! instead of sending a request the proxy would misinterpret.
//!
//! The document is fetched once per account and shared by every handle
//! derived from it.

use serde::Deserialize;
use tracing::debug;

use crate::account::Account;
use crate::errors::{Error, Result};
use crate::request::Request;
use crate::status::Operation;
use crate::transport::collect_stream;

/// Parsed `/info` document.  Sections for middleware that is not
/// installed are `None`; unknown sections are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub swift: SwiftInfo,
    pub bulk_delete: Option<BulkDeleteInfo>,
    pub bulk_upload: Option<BulkUploadInfo>,
    pub slo: Option<SloInfo>,
    pub tempurl: Option<TempUrlInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwiftInfo {
    pub version: Option<String>,
    pub max_file_size: Option<u64>,
    pub max_object_name_length: Option<u64>,
    pub container_listing_limit: Option<usize>,
    pub account_listing_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkDeleteInfo {
    pub max_deletes_per_request: Option<usize>,
    pub max_failed_deletes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkUploadInfo {
    pub max_containers_per_extraction: Option<usize>,
    pub max_failed_extractions: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SloInfo {
    pub max_manifest_segments: Option<usize>,
    pub max_manifest_size: Option<u64>,
    pub min_segment_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TempUrlInfo {
    #[serde(default)]
    pub methods: Vec<String>,
}

impl Capabilities {
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub(crate) fn require_bulk_delete(&self) -> Result<&BulkDeleteInfo> {
        self.bulk_delete.as_ref().ok_or(Error::NotSupported)
    }

    pub(crate) fn require_bulk_upload(&self) -> Result<&BulkUploadInfo> {
        self.bulk_upload.as_ref().ok_or(Error::NotSupported)
    }

    pub(crate) fn require_slo(&self) -> Result<&SloInfo> {
        self.slo.as_ref().ok_or(Error::NotSupported)
    }
}

impl Account {
    /// The cluster's capabilities, from the shared cache or a GET of
    /// `/info`.  A failed fetch is not cached.
    pub async fn capabilities(&self) -> Result<&Capabilities> {
        self.capabilities_cell()
            .get_or_try_init(|| async move {
                let response = Request::new(Operation::Capabilities)
                    .execute(self.transport())
                    .await?;
                let body = collect_stream(response.body).await?;
                let capabilities = Capabilities::parse(&body)?;
                debug!(
                    "Swift capabilities: version={:?} bulk_delete={} bulk_upload={} slo={}",
                    capabilities.swift.version,
                    capabilities.bulk_delete.is_some(),
                    capabilities.bulk_upload.is_some(),
                    capabilities.slo.is_some()
                );
                Ok::<_, Error>(capabilities)
            })
            .await
    }
}
