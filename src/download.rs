//! Object download.

use bytes::Bytes;
use http::StatusCode;
use tokio_util::io::StreamReader;

use crate::errors::Result;
use crate::headers::{Headers, ObjectHeaders};
use crate::object::Object;
use crate::request::RequestOptions;
use crate::status::Operation;
use crate::transport::{collect_stream, ByteStream};

/// Reader over a download body.  Reads return whatever the current
/// chunk holds, up to the buffer size.
pub type DownloadReader = StreamReader<ByteStream, Bytes>;

/// An open download.
///
/// The body can be taken exactly once, as a string, as bytes, as a
/// stream or as a reader.  Every projection consumes the value, so a
/// second one does not compile:
///
/// ```compile_fail
/// # async fn demo(mut object: swiftkit::Object) -> swiftkit::Result<()> {
/// let download = object.download(None).await?;
/// let text = download.into_string().await?;
/// let again = download.into_bytes().await?;
/// # Ok(())
/// # }
/// ```
///
/// Dropping it without reading releases the connection.
pub struct DownloadedObject {
    headers: ObjectHeaders,
    status: StatusCode,
    body: ByteStream,
}

impl DownloadedObject {
    pub fn headers(&self) -> &ObjectHeaders {
        &self.headers
    }

    /// 200, or 206 for a range request.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub async fn into_bytes(self) -> Result<Bytes> {
        Ok(collect_stream(self.body).await?)
    }

    pub async fn into_string(self) -> Result<String> {
        let bytes = self.into_bytes().await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn into_stream(self) -> ByteStream {
        self.body
    }

    pub fn into_reader(self) -> DownloadReader {
        StreamReader::new(self.body)
    }
}

impl std::fmt::Debug for DownloadedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadedObject")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl Object {
    /// GET the object.  Headers of a full (200) response are validated
    /// and replace the cached snapshot; partial responses are not
    /// cached.  Pass `Range` or `If-Match` through `opts`.
    pub async fn download(&mut self, opts: Option<&RequestOptions>) -> Result<DownloadedObject> {
        let response = self
            .request(Operation::ObjectGet)
            .options(opts)
            .execute(self.transport())
            .await?;
        let headers = if response.status == StatusCode::OK {
            self.cache.store_response(response.headers)?
        } else {
            let headers = ObjectHeaders::from_raw(response.headers);
            headers.validate()?;
            headers
        };
        Ok(DownloadedObject {
            headers,
            status: response.status,
            body: response.body,
        })
    }
}
