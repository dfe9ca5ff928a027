//! Object handle.
//!
//! Metadata operations live here; body transfer is in
//! [`crate::upload`] and [`crate::download`], segmented objects in
//! [`crate::large_object`].

use std::fmt;

use http::header::HeaderValue;

use crate::cache::HeaderCache;
use crate::container::Container;
use crate::errors::{Error, Result};
use crate::headers::{Headers, ObjectHeaders};
use crate::large_object::{self, DeleteOptions};
use crate::request::{Request, RequestOptions};
use crate::status::Operation;
use crate::transport::Transport;

/// An object within a container.  The name may contain `/` but must
/// not be empty.
#[derive(Clone)]
pub struct Object {
    container: Container,
    name: String,
    pub(crate) cache: HeaderCache<ObjectHeaders>,
}

impl Object {
    pub(crate) fn new(container: Container, name: String) -> Self {
        Self {
            container,
            name,
            cache: HeaderCache::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<container>/<object>`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.container.name(), self.name)
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.container.transport()
    }

    pub(crate) fn request(&self, operation: Operation) -> Request {
        Request::new(operation)
            .container(self.container.name())
            .object(self.name.clone())
    }

    /// Object headers, from the cache or a HEAD request.
    pub async fn headers(&mut self) -> Result<ObjectHeaders> {
        let head = self.request(Operation::ObjectHead);
        self.cache.get_or_fetch(self.container.transport(), head).await
    }

    /// Whether the object exists.  A 404 yields `false`; every other
    /// failure is returned.
    pub async fn exists(&mut self) -> Result<bool> {
        let head = self.request(Operation::ObjectHead);
        self.cache.exists(self.container.transport(), head).await
    }

    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// POST new metadata.  The service replaces all object metadata on
    /// POST, so every writable header in `headers` is sent, not a diff.
    pub async fn update(
        &mut self,
        headers: &ObjectHeaders,
        opts: Option<&RequestOptions>,
    ) -> Result<()> {
        self.request(Operation::ObjectPost)
            .headers(headers.encode(None))
            .options(opts)
            .execute(self.transport())
            .await?;
        self.invalidate();
        Ok(())
    }

    /// DELETE the object.  A missing object is reported as 404, not
    /// treated as success.  With [`DeleteOptions::delete_segments`] the
    /// segments of a large object are removed as well.
    pub async fn delete(
        &mut self,
        delete: Option<&DeleteOptions>,
        opts: Option<&RequestOptions>,
    ) -> Result<()> {
        if delete.is_some_and(|d| d.delete_segments) {
            large_object::delete_with_segments(self, opts).await?;
        } else {
            self.request(Operation::ObjectDelete)
                .options(opts)
                .execute(self.transport())
                .await?;
        }
        self.invalidate();
        Ok(())
    }

    /// Server-side COPY to `target`.  Large objects are copied as their
    /// assembled content.  Only `target`'s cache is invalidated.
    pub async fn copy_to(&self, target: &mut Object, opts: Option<&RequestOptions>) -> Result<()> {
        let destination = target.destination()?;
        let value = HeaderValue::from_str(&destination)
            .map_err(|e| Error::invalid_header("destination", e))?;
        self.request(Operation::ObjectCopy)
            .header(http::header::HeaderName::from_static("destination"), value)
            .options(opts)
            .execute(self.transport())
            .await?;
        target.invalidate();
        Ok(())
    }

    /// `Destination` header value addressing this object.
    fn destination(&self) -> Result<String> {
        // Reuse the request path validation and container encoding.
        let path = self.request(Operation::ObjectCopy).path()?;
        Ok(path.trim_start_matches('/').to_string())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("container", &self.container.name())
            .field("name", &self.name)
            .field("cached", &self.cache.get().is_some())
            .finish()
    }
}
