//! swiftkit: client library for OpenStack Swift object storage.
//!
//! The API mirrors Swift's hierarchy: an [`Account`] hands out
//! [`Container`] handles, which hand out [`Object`] handles.  Handles
//! are cheap values that do no I/O until an operation is called; each
//! keeps its own snapshot of the entity's headers, filled lazily by a
//! HEAD request and dropped whenever the client itself modifies the
//! entity.
//!
//! All network traffic goes through a [`Transport`]:
//! [`HttpTransport`] for a real endpoint, [`MemoryTransport`] for an
//! in-process emulation used by the tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use swiftkit::{Account, HttpTransport};
//!
//! # async fn demo() -> swiftkit::Result<()> {
//! let transport = HttpTransport::new("https://swift.example.com/v1/AUTH_demo", Some("token".into()))?;
//! let account = Account::new(Arc::new(transport));
//! let mut object = account.container("photos").object("2024/cat.jpg");
//! object.upload(std::fs::read("cat.jpg")?, None, None).await?;
//! let bytes = object.download(None).await?.into_bytes().await?;
//! # drop(bytes);
//! # Ok(())
//! # }
//! ```

mod cache;

pub mod account;
pub mod bulk;
pub mod capabilities;
pub mod config;
pub mod container;
pub mod download;
pub mod errors;
pub mod headers;
pub mod large_object;
pub mod listing;
pub mod metrics;
pub mod object;
pub mod request;
pub mod status;
pub mod tempurl;
pub mod transport;
pub mod upload;

pub use account::Account;
pub use bulk::{ArchiveFormat, BulkDeleteSummary, BulkResponse};
pub use capabilities::Capabilities;
pub use container::Container;
pub use download::{DownloadReader, DownloadedObject};
pub use errors::{is, BulkError, BulkObjectError, Error, Result, UnexpectedStatusError};
pub use headers::{AccountHeaders, ContainerHeaders, Headers, Metadata, MetadataMut, ObjectHeaders};
pub use large_object::{DeleteOptions, LargeObjectKind, LargeObjectOptions, SegmentInfo};
pub use listing::{ContainerInfo, ListOptions, ObjectInfo, ObjectListEntry};
pub use object::Object;
pub use request::RequestOptions;
pub use transport::memory::MemoryTransport;
pub use transport::remote::HttpTransport;
pub use transport::Transport;
pub use upload::UploadContent;

/// Traits needed to use the header types.
pub mod prelude {
    pub use crate::headers::Headers;
}
