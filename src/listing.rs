//! Container and object listings.
//!
//! Listings are fetched with `format=json` one page at a time; the name
//! of the last entry becomes the `marker` of the next request, and a
//! page shorter than the page size ends the walk.

use chrono::NaiveDateTime;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::errors::Result;
use crate::request::{Request, RequestOptions};
use crate::transport::{collect_stream, Transport};

/// Page size used when [`ListOptions::limit`] is not set.  This is the
/// service's own maximum.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Filters for a listing.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Only names starting with this prefix.
    pub prefix: Option<String>,
    /// Roll names up to the first delimiter after the prefix into
    /// [`ObjectListEntry::Subdir`] entries.
    pub delimiter: Option<String>,
    /// Only names sorting after this one.
    pub marker: Option<String>,
    /// Only names sorting before this one.
    pub end_marker: Option<String>,
    /// Entries per page, at most [`DEFAULT_PAGE_SIZE`].  The walk still
    /// continues until exhausted.
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }
}

/// One object in a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    pub bytes: u64,
    /// MD5 of the content (or the large-object ETag).
    pub hash: String,
    pub content_type: String,
    #[serde(default)]
    pub last_modified: Option<NaiveDateTime>,
}

/// Entry of an object listing: either an object or, with a delimiter,
/// a pseudo directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ObjectListEntry {
    Subdir { subdir: String },
    Object(ObjectInfo),
}

impl ObjectListEntry {
    /// Object name or pseudo-directory path.
    pub fn name(&self) -> &str {
        match self {
            ObjectListEntry::Subdir { subdir } => subdir,
            ObjectListEntry::Object(info) => &info.name,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectInfo> {
        match self {
            ObjectListEntry::Object(info) => Some(info),
            ObjectListEntry::Subdir { .. } => None,
        }
    }
}

/// One container in an account listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    /// Number of objects.
    pub count: u64,
    pub bytes: u64,
    #[serde(default)]
    pub last_modified: Option<NaiveDateTime>,
}

pub(crate) trait Named {
    fn listing_name(&self) -> &str;
}

impl Named for ObjectListEntry {
    fn listing_name(&self) -> &str {
        self.name()
    }
}

impl Named for ContainerInfo {
    fn listing_name(&self) -> &str {
        &self.name
    }
}

/// Walk every page of a listing.  `base` builds the GET request for one
/// page; paging parameters are added here.
pub(crate) async fn list_all<T, F>(
    transport: &dyn Transport,
    base: F,
    opts: Option<&ListOptions>,
    req_opts: Option<&RequestOptions>,
) -> Result<Vec<T>>
where
    T: DeserializeOwned + Named,
    F: Fn() -> Request,
{
    let defaults = ListOptions::default();
    let opts = opts.unwrap_or(&defaults);
    // A page shorter than requested ends the walk, so never ask for more
    // than the service will return.
    let page_size = opts.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, DEFAULT_PAGE_SIZE);
    let mut marker = opts.marker.clone();
    let mut entries = Vec::new();

    loop {
        let mut request = base()
            .query("format", "json")
            .query("limit", page_size.to_string());
        for (key, value) in [
            ("prefix", &opts.prefix),
            ("delimiter", &opts.delimiter),
            ("end_marker", &opts.end_marker),
            ("marker", &marker),
        ] {
            if let Some(value) = value {
                request = request.query(key, value.clone());
            }
        }

        let response = request.options(req_opts).execute(transport).await?;
        if response.status == StatusCode::NO_CONTENT {
            break;
        }
        let body = collect_stream(response.body).await?;
        let page: Vec<T> = serde_json::from_slice(&body)?;
        let count = page.len();
        if let Some(last) = page.last() {
            marker = Some(last.listing_name().to_string());
        }
        entries.extend(page);
        if count < page_size {
            break;
        }
    }
    Ok(entries)
}
