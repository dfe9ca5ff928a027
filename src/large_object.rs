//! Segmented (large) objects.
//!
//! Content is cut into fixed-size segments, each uploaded as an ordinary
//! object named `<prefix>/<index:08>`, and then tied together by a
//! manifest object:
//!
//! - **Dynamic** (`X-Object-Manifest: <container>/<prefix>/`): the
//!   service concatenates whatever objects match the prefix at read
//!   time.
//! - **Static** (`PUT ?multipart-manifest=put`): the manifest lists each
//!   segment with its ETag and size, and the service checks them when
//!   the manifest is written.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::header::{HeaderValue, ACCEPT};
use http::StatusCode;
use md5::{Digest, Md5};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bulk::BulkResponse;
use crate::container::Container;
use crate::errors::{is, Result};
use crate::headers::{Headers, ObjectHeaders};
use crate::listing::ListOptions;
use crate::object::Object;
use crate::request::RequestOptions;
use crate::status::Operation;
use crate::transport::collect_stream;
use crate::upload::{Checksum, UploadContent, UPLOAD_CHUNK_SIZE};

/// Segment size used when none is configured.
pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LargeObjectKind {
    Dynamic,
    Static,
}

/// How [`Object::upload_large`] lays out segments.
#[derive(Debug, Clone)]
pub struct LargeObjectOptions {
    pub kind: LargeObjectKind,
    /// Container holding the segments.  Defaults to the object's own.
    pub segment_container: Option<String>,
    /// Segment name prefix.  Defaults to `<object name>/<random id>`.
    pub segment_prefix: Option<String>,
    pub segment_size: usize,
    /// Headers (content type, metadata) of the manifest object.
    pub headers: Option<ObjectHeaders>,
}

impl Default for LargeObjectOptions {
    fn default() -> Self {
        Self {
            kind: LargeObjectKind::Static,
            segment_container: None,
            segment_prefix: None,
            segment_size: DEFAULT_SEGMENT_SIZE,
            headers: None,
        }
    }
}

/// Options for [`Object::delete`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Also delete the segments of a large object.
    pub delete_segments: bool,
}

/// One segment of a large object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub container: String,
    pub object: String,
    pub etag: String,
    pub size_bytes: u64,
}

/// Segment entry of a static manifest, as written and as returned by
/// `?multipart-manifest=get&format=raw`.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    path: String,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    size_bytes: Option<u64>,
}

/// ETag of a static large object: MD5 over the concatenated hex ETags of
/// its segments.
pub(crate) fn etag_of_etags<'a>(etags: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Md5::new();
    for etag in etags {
        hasher.update(etag.as_bytes());
    }
    hex::encode(hasher.finalize())
}

impl Object {
    /// Large-object type according to the object's headers, or `None`
    /// for a plain object.
    pub async fn large_object_kind(&mut self) -> Result<Option<LargeObjectKind>> {
        let headers = self.headers().await?;
        if headers.is_static_large_object()? {
            Ok(Some(LargeObjectKind::Static))
        } else if headers.object_manifest().is_some() {
            Ok(Some(LargeObjectKind::Dynamic))
        } else {
            Ok(None)
        }
    }

    /// Upload `content` as segments plus a manifest.
    ///
    /// Every segment is checksum-verified on its own.  If a segment
    /// fails, the segments already written are left in place.  Empty
    /// content becomes an ordinary zero-length object.  `opts` applies
    /// to the manifest request only.  Without the SLO middleware a
    /// static upload fails with
    /// [`Error::NotSupported`](crate::errors::Error::NotSupported)
    /// before any segment is written.
    pub async fn upload_large(
        &mut self,
        content: impl Into<UploadContent>,
        large: &LargeObjectOptions,
        opts: Option<&RequestOptions>,
    ) -> Result<()> {
        if large.kind == LargeObjectKind::Static {
            self.container().account().capabilities().await?.require_slo()?;
        }
        let segment_container = match &large.segment_container {
            Some(name) => self.container().account().container(name.clone()),
            None => self.container().clone(),
        };
        let prefix = match &large.segment_prefix {
            Some(prefix) => prefix.trim_end_matches('/').to_string(),
            None => format!("{}/{}", self.name(), Uuid::new_v4().simple()),
        };
        let segment_size = large.segment_size.max(1);

        let mut stream = content.into().into_stream();
        let mut buf = BytesMut::with_capacity(segment_size.min(UPLOAD_CHUNK_SIZE));
        let mut segments = Vec::new();
        while let Some(mut chunk) = stream.next().await.transpose()? {
            while !chunk.is_empty() {
                let take = (segment_size - buf.len()).min(chunk.len());
                buf.extend_from_slice(&chunk.split_to(take));
                if buf.len() == segment_size {
                    let data = buf.split().freeze();
                    segments.push(put_segment(&segment_container, &prefix, segments.len(), data).await?);
                }
            }
        }
        if !buf.is_empty() {
            let data = buf.split().freeze();
            segments.push(put_segment(&segment_container, &prefix, segments.len(), data).await?);
        }

        if segments.is_empty() {
            return self
                .upload(UploadContent::empty(), large.headers.as_ref(), opts)
                .await;
        }
        debug!(
            "Uploaded {} segments for {} under {}/{}",
            segments.len(),
            self.full_name(),
            segment_container.name(),
            prefix
        );

        let mut manifest_headers = large.headers.clone().unwrap_or_default();
        let result = match large.kind {
            LargeObjectKind::Dynamic => {
                manifest_headers
                    .set_object_manifest(&format!("{}/{}/", segment_container.name(), prefix))?;
                self.put(
                    UploadContent::empty(),
                    manifest_headers.encode(None),
                    opts,
                    Checksum::SentBytes,
                )
                .await
            }
            LargeObjectKind::Static => {
                let entries: Vec<ManifestEntry> = segments
                    .iter()
                    .map(|s| ManifestEntry {
                        path: format!("/{}/{}", s.container, s.object),
                        etag: Some(s.etag.clone()),
                        size_bytes: Some(s.size_bytes),
                    })
                    .collect();
                let body = Bytes::from(serde_json::to_vec(&entries)?);
                let expected = etag_of_etags(segments.iter().map(|s| s.etag.as_str()));
                let mut manifest_opts = opts.cloned().unwrap_or_default();
                manifest_opts
                    .query
                    .push(("multipart-manifest".to_string(), "put".to_string()));
                self.put(
                    UploadContent::Bytes(body),
                    manifest_headers.encode(None),
                    Some(&manifest_opts),
                    Checksum::Expected(expected),
                )
                .await
            }
        };
        self.invalidate();
        if let Err(e) = &result {
            warn!(
                "Manifest upload for {} failed, {} segments left behind: {}",
                self.full_name(),
                segments.len(),
                e
            );
        }
        result.map(|_| ())
    }

    /// Segments of this large object, in order.  Empty for a plain
    /// object.
    pub async fn segments(&mut self, opts: Option<&RequestOptions>) -> Result<Vec<SegmentInfo>> {
        match self.large_object_kind().await? {
            None => Ok(Vec::new()),
            Some(LargeObjectKind::Static) => {
                let response = self
                    .request(Operation::ObjectGet)
                    .query("multipart-manifest", "get")
                    .query("format", "raw")
                    .options(opts)
                    .execute(self.transport())
                    .await?;
                let body = collect_stream(response.body).await?;
                let entries: Vec<ManifestEntry> = serde_json::from_slice(&body)?;
                Ok(entries.into_iter().map(SegmentInfo::from).collect())
            }
            Some(LargeObjectKind::Dynamic) => {
                let headers = self.headers().await?;
                let manifest = headers.object_manifest().unwrap_or_default();
                let manifest = percent_decode_str(manifest).decode_utf8_lossy();
                let (container, prefix) = manifest.split_once('/').unwrap_or((manifest.as_ref(), ""));
                let listing = self
                    .container()
                    .account()
                    .container(container)
                    .list_objects(Some(&ListOptions::with_prefix(prefix)), opts)
                    .await?;
                Ok(listing
                    .iter()
                    .filter_map(|entry| entry.as_object())
                    .map(|info| SegmentInfo {
                        container: container.to_string(),
                        object: info.name.clone(),
                        etag: info.hash.clone(),
                        size_bytes: info.bytes,
                    })
                    .collect())
            }
        }
    }
}

impl From<ManifestEntry> for SegmentInfo {
    fn from(entry: ManifestEntry) -> Self {
        let path = entry.path.trim_start_matches('/');
        let (container, object) = path.split_once('/').unwrap_or((path, ""));
        SegmentInfo {
            container: container.to_string(),
            object: object.to_string(),
            etag: entry.etag.unwrap_or_default(),
            size_bytes: entry.size_bytes.unwrap_or_default(),
        }
    }
}

async fn put_segment(
    container: &Container,
    prefix: &str,
    index: usize,
    data: Bytes,
) -> Result<SegmentInfo> {
    let segment = container.object(format!("{prefix}/{index:08}"));
    let etag = hex::encode(Md5::digest(&data));
    let size_bytes = data.len() as u64;
    segment
        .put(
            UploadContent::Bytes(data),
            http::HeaderMap::new(),
            None,
            Checksum::SentBytes,
        )
        .await?;
    Ok(SegmentInfo {
        container: container.name().to_string(),
        object: segment.name().to_string(),
        etag,
        size_bytes,
    })
}

/// Delete a large object together with its segments.  A plain object is
/// simply deleted.
pub(crate) async fn delete_with_segments(
    object: &mut Object,
    opts: Option<&RequestOptions>,
) -> Result<()> {
    match object.large_object_kind().await? {
        Some(LargeObjectKind::Static) => {
            let response = object
                .request(Operation::ManifestDelete)
                .query("multipart-manifest", "delete")
                .header(ACCEPT, HeaderValue::from_static("application/json"))
                .options(opts)
                .execute(object.transport())
                .await?;
            let report = BulkResponse::from_response(response).await?.into_result()?;
            debug!(
                "Deleted static large object {} ({} entries)",
                object.full_name(),
                report.number_deleted
            );
        }
        Some(LargeObjectKind::Dynamic) => {
            let segments = object.segments(None).await?;
            let account = object.container().account().clone();
            for info in &segments {
                let segment = account.container(info.container.clone()).object(info.object.clone());
                match segment
                    .request(Operation::ObjectDelete)
                    .options(opts)
                    .execute(object.transport())
                    .await
                {
                    Ok(_) => {}
                    Err(e) if is(&e, StatusCode::NOT_FOUND) => {}
                    Err(e) => return Err(e),
                }
            }
            object
                .request(Operation::ObjectDelete)
                .options(opts)
                .execute(object.transport())
                .await?;
            debug!(
                "Deleted dynamic large object {} and {} segments",
                object.full_name(),
                segments.len()
            );
        }
        None => {
            object
                .request(Operation::ObjectDelete)
                .options(opts)
                .execute(object.transport())
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::errors::Error;
    use crate::transport::memory::MemoryTransport;
    use rand::RngCore;
    use std::sync::Arc;

    async fn setup() -> (Arc<MemoryTransport>, Container) {
        let transport = Arc::new(MemoryTransport::new());
        let account = Account::new(transport.clone());
        let mut container = account.container("large");
        container.create(None, None).await.unwrap();
        (transport, container)
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        data
    }

    #[test]
    fn test_etag_of_etags() {
        let etag = etag_of_etags(["5d41402abc4b2a76b9719d911017c592"]);
        assert_eq!(etag, hex::encode(Md5::digest(b"5d41402abc4b2a76b9719d911017c592")));
    }

    #[tokio::test]
    async fn test_static_upload_roundtrip() {
        let (transport, container) = setup().await;
        let data = random_bytes(35);
        let mut object = container.object("slo");
        let large = LargeObjectOptions {
            segment_size: 10,
            segment_prefix: Some("slo-parts".into()),
            ..LargeObjectOptions::default()
        };
        object
            .upload_large(UploadContent::from_reader(std::io::Cursor::new(data.clone())), &large, None)
            .await
            .unwrap();

        let body = object.download(None).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(body, data);
        assert_eq!(object.large_object_kind().await.unwrap(), Some(LargeObjectKind::Static));

        let segments = object.segments(None).await.unwrap();
        let sizes: Vec<u64> = segments.iter().map(|s| s.size_bytes).collect();
        assert_eq!(sizes, vec![10, 10, 10, 5]);
        assert_eq!(segments[0].container, "large");
        assert_eq!(segments[0].object, "slo-parts/00000000");
        assert_eq!(segments[3].object, "slo-parts/00000003");

        let etag = etag_of_etags(segments.iter().map(|s| s.etag.as_str()));
        assert_eq!(object.headers().await.unwrap().etag(), Some(etag.as_str()));

        let requests = transport.requests().await;
        assert!(requests
            .iter()
            .any(|r| r.path == "/large/slo" && r.query_value("multipart-manifest") == Some("put")));
    }

    #[tokio::test]
    async fn test_static_upload_without_slo_middleware() {
        let (transport, container) = setup().await;
        transport.disable_capability("slo").await;
        let mut object = container.object("slo");
        let large = LargeObjectOptions {
            segment_size: 10,
            ..LargeObjectOptions::default()
        };
        let err = object
            .upload_large(random_bytes(25), &large, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported));
        assert!(container.list_objects(None, None).await.unwrap().is_empty());

        // Dynamic manifests need no middleware.
        let large = LargeObjectOptions {
            kind: LargeObjectKind::Dynamic,
            ..large
        };
        object.upload_large(random_bytes(25), &large, None).await.unwrap();
        assert_eq!(object.large_object_kind().await.unwrap(), Some(LargeObjectKind::Dynamic));
    }

    #[tokio::test]
    async fn test_dynamic_upload_roundtrip() {
        let (_, container) = setup().await;
        let mut segments_container = container.account().container("large_segments");
        segments_container.create(None, None).await.unwrap();

        let data = random_bytes(25);
        let mut manifest_headers = ObjectHeaders::new();
        manifest_headers.set_content_type("application/x-test").unwrap();
        let large = LargeObjectOptions {
            kind: LargeObjectKind::Dynamic,
            segment_container: Some("large_segments".into()),
            segment_prefix: Some("dlo/".into()),
            segment_size: 10,
            headers: Some(manifest_headers),
        };
        let mut object = container.object("dlo");
        object.upload_large(data.clone(), &large, None).await.unwrap();

        let hdr = object.headers().await.unwrap();
        assert_eq!(hdr.object_manifest(), Some("large_segments/dlo/"));
        assert_eq!(hdr.content_type(), Some("application/x-test"));
        assert_eq!(object.large_object_kind().await.unwrap(), Some(LargeObjectKind::Dynamic));

        let body = object.download(None).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(body, data);

        let segments = object.segments(None).await.unwrap();
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.container == "large_segments"));
        assert_eq!(segments[2].object, "dlo/00000002");
        assert_eq!(segments[2].size_bytes, 5);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_segment() {
        let (_, container) = setup().await;
        let mut object = container.object("even");
        let large = LargeObjectOptions {
            segment_size: 10,
            ..LargeObjectOptions::default()
        };
        object.upload_large(random_bytes(20), &large, None).await.unwrap();
        let segments = object.segments(None).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].object.starts_with("even/"));
    }

    #[tokio::test]
    async fn test_empty_content_is_plain_object() {
        let (transport, container) = setup().await;
        let mut object = container.object("nothing");
        let large = LargeObjectOptions {
            segment_size: 10,
            ..LargeObjectOptions::default()
        };
        object
            .upload_large(UploadContent::empty(), &large, None)
            .await
            .unwrap();

        assert_eq!(object.large_object_kind().await.unwrap(), None);
        assert!(object.segments(None).await.unwrap().is_empty());
        assert_eq!(object.headers().await.unwrap().content_length().unwrap(), Some(0));
        assert_eq!(container.list_objects(None, None).await.unwrap().len(), 1);
        assert!(transport
            .requests()
            .await
            .iter()
            .all(|r| r.query_value("multipart-manifest").is_none()));
    }

    #[tokio::test]
    async fn test_segment_checksum_mismatch() {
        let (transport, container) = setup().await;
        transport.corrupt_etags(true).await;
        let mut object = container.object("corrupt");
        let large = LargeObjectOptions {
            segment_size: 10,
            ..LargeObjectOptions::default()
        };
        let err = object
            .upload_large(random_bytes(30), &large, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_delete_static_with_segments() {
        let (transport, container) = setup().await;
        let mut object = container.object("slo");
        let large = LargeObjectOptions {
            segment_size: 4,
            ..LargeObjectOptions::default()
        };
        object.upload_large(random_bytes(10), &large, None).await.unwrap();
        assert_eq!(container.list_objects(None, None).await.unwrap().len(), 4);

        object
            .delete(Some(&DeleteOptions { delete_segments: true }), None)
            .await
            .unwrap();
        assert!(container.list_objects(None, None).await.unwrap().is_empty());
        assert!(!object.exists().await.unwrap());

        let requests = transport.requests().await;
        assert!(requests
            .iter()
            .any(|r| r.query_value("multipart-manifest") == Some("delete")));
    }

    #[tokio::test]
    async fn test_delete_dynamic_with_segments() {
        let (_, container) = setup().await;
        let mut object = container.object("dlo");
        let large = LargeObjectOptions {
            kind: LargeObjectKind::Dynamic,
            segment_size: 4,
            ..LargeObjectOptions::default()
        };
        object.upload_large(random_bytes(10), &large, None).await.unwrap();
        assert_eq!(container.list_objects(None, None).await.unwrap().len(), 4);

        object
            .delete(Some(&DeleteOptions { delete_segments: true }), None)
            .await
            .unwrap();
        assert!(container.list_objects(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_without_segments_keeps_them() {
        let (_, container) = setup().await;
        let mut object = container.object("slo");
        let large = LargeObjectOptions {
            segment_size: 4,
            ..LargeObjectOptions::default()
        };
        object.upload_large(random_bytes(10), &large, None).await.unwrap();
        object.delete(None, None).await.unwrap();

        let remaining = container.list_objects(None, None).await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().all(|e| e.name().starts_with("slo/")));
    }

    #[tokio::test]
    async fn test_delete_segments_of_plain_object() {
        let (_, container) = setup().await;
        let mut object = container.object("plain");
        object.upload("x", None, None).await.unwrap();
        object
            .delete(Some(&DeleteOptions { delete_segments: true }), None)
            .await
            .unwrap();
        assert!(!object.exists().await.unwrap());
    }
}
