//! Object upload.
//!
//! Every upload streams its body through [`HashingStream`], which
//! computes the MD5 of the bytes actually handed to the transport.
//! After a successful PUT that digest is compared with the ETag the
//! service returned; a mismatch is an error even though the status code
//! said success.
//!
//! [`Object::upload_with_writer`] lets the caller produce the body by
//! writing into one end of an in-memory pipe while a spawned task runs
//! the callback and the request reads the other end.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header::{HeaderValue, CONTENT_LENGTH, ETAG};
use http::HeaderMap;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, DuplexStream};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::headers::{Headers, ObjectHeaders};
use crate::metrics;
use crate::object::Object;
use crate::request::RequestOptions;
use crate::status::Operation;
use crate::transport::{empty_stream, once_stream, ByteStream};

/// Read size used when adapting an [`AsyncRead`] into a body.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Capacity of the pipe between a writer callback and the request.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Body of an upload.
pub enum UploadContent {
    /// Zero-length object.
    Empty,
    /// Fully buffered content.  Length and MD5 are sent up front.
    Bytes(Bytes),
    /// Content of unknown length, sent chunked.
    Stream(ByteStream),
}

impl UploadContent {
    pub fn empty() -> Self {
        UploadContent::Empty
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        UploadContent::Stream(Box::pin(ReaderStream::with_capacity(reader, UPLOAD_CHUNK_SIZE)))
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        UploadContent::Stream(Box::pin(stream))
    }

    pub(crate) fn known_bytes(&self) -> Option<Bytes> {
        match self {
            UploadContent::Empty => Some(Bytes::new()),
            UploadContent::Bytes(bytes) => Some(bytes.clone()),
            UploadContent::Stream(_) => None,
        }
    }

    pub(crate) fn into_stream(self) -> ByteStream {
        match self {
            UploadContent::Empty => empty_stream(),
            UploadContent::Bytes(bytes) if bytes.is_empty() => empty_stream(),
            UploadContent::Bytes(bytes) => once_stream(bytes),
            UploadContent::Stream(stream) => stream,
        }
    }
}

impl std::fmt::Debug for UploadContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadContent::Empty => f.write_str("Empty"),
            UploadContent::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            UploadContent::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for UploadContent {
    fn from(bytes: Bytes) -> Self {
        UploadContent::Bytes(bytes)
    }
}

impl From<Vec<u8>> for UploadContent {
    fn from(bytes: Vec<u8>) -> Self {
        UploadContent::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for UploadContent {
    fn from(bytes: &'static [u8]) -> Self {
        UploadContent::Bytes(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for UploadContent {
    fn from(text: &'static str) -> Self {
        UploadContent::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for UploadContent {
    fn from(text: String) -> Self {
        UploadContent::Bytes(Bytes::from(text))
    }
}

// -- Hashing ------------------------------------------------------------------

/// MD5 and length of a fully sent body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentDigest {
    pub md5: String,
    pub bytes: u64,
}

/// Passes a body through while hashing it.  The digest is delivered
/// when the inner stream ends; a body that was not read to the end
/// produces no digest.
struct HashingStream {
    inner: ByteStream,
    hasher: Option<Md5>,
    bytes: u64,
    done: Option<oneshot::Sender<SentDigest>>,
}

impl HashingStream {
    fn new(inner: ByteStream) -> (Self, oneshot::Receiver<SentDigest>) {
        let (tx, rx) = oneshot::channel();
        let stream = Self {
            inner,
            hasher: Some(Md5::new()),
            bytes: 0,
            done: Some(tx),
        };
        (stream, rx)
    }
}

impl Stream for HashingStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(hasher) = this.hasher.as_mut() {
                    hasher.update(&chunk);
                }
                this.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                if let (Some(hasher), Some(done)) = (this.hasher.take(), this.done.take()) {
                    let _ = done.send(SentDigest {
                        md5: hex::encode(hasher.finalize()),
                        bytes: this.bytes,
                    });
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Compare the ETag of a PUT response with the expected digest.  A
/// response without ETag is accepted.
pub(crate) fn verify_etag(expected: &str, response: &HeaderMap) -> Result<()> {
    let Some(actual) = response.get(ETAG).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    let actual = actual.trim().trim_matches('"');
    if actual.eq_ignore_ascii_case(expected) {
        return Ok(());
    }
    warn!(
        "Upload checksum mismatch: expected etag {} but service returned {}",
        expected, actual
    );
    metrics::record_checksum_mismatch();
    Err(Error::ChecksumMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

// -- PUT ----------------------------------------------------------------------

/// How the response ETag of a PUT is checked.
pub(crate) enum Checksum {
    /// MD5 of the bytes sent.
    SentBytes,
    /// A precomputed value, e.g. the ETag of a static manifest.
    Expected(String),
}

impl Object {
    /// Upload `content`, replacing the object.
    ///
    /// `headers` are sent in full (create semantics).  The cached
    /// snapshot is invalidated whatever the outcome, since the object
    /// may have been written even if verification failed.
    pub async fn upload(
        &mut self,
        content: impl Into<UploadContent>,
        headers: Option<&ObjectHeaders>,
        opts: Option<&RequestOptions>,
    ) -> Result<()> {
        let wire = headers.map(|h| h.encode(None)).unwrap_or_default();
        let result = self
            .put(content.into(), wire, opts, Checksum::SentBytes)
            .await;
        self.invalidate();
        result.map(|_| ())
    }

    /// Upload a body produced by `writer`.
    ///
    /// The callback receives the write end of an in-memory pipe and runs
    /// on its own task while the request streams the read end.  Dropping
    /// the pipe (returning) ends the body.  If the callback fails or
    /// panics the request body is aborted, so no truncated object is
    /// committed; the callback's error is returned (a panic is resumed).
    /// If the request fails first, further writes fail with
    /// [`io::ErrorKind::BrokenPipe`] and the request error is returned.
    pub async fn upload_with_writer<F, Fut>(
        &mut self,
        headers: Option<&ObjectHeaders>,
        opts: Option<&RequestOptions>,
        writer: F,
    ) -> Result<()>
    where
        F: FnOnce(DuplexStream) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (write_half, read_half) = tokio::io::duplex(PIPE_CAPACITY);
        let (outcome_tx, outcome_rx) = oneshot::channel::<bool>();

        let task = tokio::spawn(async move {
            let result = writer(write_half).await;
            let _ = outcome_tx.send(result.is_ok());
            result
        });

        // A clean EOF only ends the body once the callback has reported
        // success; otherwise the stream fails and the transport aborts.
        let gate = futures::stream::once(async move {
            match outcome_rx.await {
                Ok(true) => None,
                _ => Some(Err(io::Error::other("upload writer did not complete"))),
            }
        })
        .filter_map(futures::future::ready);
        let body = ReaderStream::with_capacity(read_half, UPLOAD_CHUNK_SIZE).chain(gate);

        let wire = headers.map(|h| h.encode(None)).unwrap_or_default();
        let sent = self
            .put(UploadContent::from_stream(body), wire, opts, Checksum::SentBytes)
            .await;
        self.invalidate();

        let written = match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(Error::Io(io::Error::other(e))),
        };
        match written {
            Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::BrokenPipe && sent.is_err() => {
                sent.map(|_| ())
            }
            Err(e) => Err(e),
            Ok(()) => sent.map(|_| ()),
        }
    }

    /// PUT a body and verify the returned ETag.  Returns the response
    /// headers.
    pub(crate) async fn put(
        &self,
        content: UploadContent,
        mut wire: HeaderMap,
        opts: Option<&RequestOptions>,
        checksum: Checksum,
    ) -> Result<HeaderMap> {
        let caller_etag = wire.contains_key(ETAG)
            || opts.is_some_and(|o| o.headers.contains_key(ETAG));
        // MD5 of buffered content, in case the transport does not read
        // the body to the end.
        let mut known_md5 = None;
        if let Some(bytes) = content.known_bytes() {
            wire.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            if matches!(checksum, Checksum::SentBytes) {
                known_md5 = Some(hex::encode(Md5::digest(&bytes)));
            }
            if !caller_etag {
                let etag = match (&checksum, &known_md5) {
                    (Checksum::Expected(etag), _) => Some(etag),
                    (Checksum::SentBytes, md5) => md5.as_ref(),
                };
                if let Some(value) = etag.and_then(|e| HeaderValue::from_str(e).ok()) {
                    wire.insert(ETAG, value);
                }
            }
        }

        let (body, digest) = HashingStream::new(content.into_stream());
        let response = self
            .request(Operation::ObjectPut)
            .headers(wire)
            .body(Box::pin(body))
            .options(opts)
            .execute(self.transport())
            .await?;

        let sent = digest.await.ok();
        if let Some(sent) = &sent {
            metrics::record_upload(sent.bytes);
        }
        match (&checksum, &sent) {
            (Checksum::Expected(etag), _) => verify_etag(etag, &response.headers)?,
            (Checksum::SentBytes, Some(sent)) => verify_etag(&sent.md5, &response.headers)?,
            (Checksum::SentBytes, None) => match &known_md5 {
                Some(md5) => verify_etag(md5, &response.headers)?,
                None => debug!(
                    "Checksum of {} not verified: body was not read to the end",
                    self.full_name()
                ),
            },
        }
        Ok(response.headers)
    }
}
