//! Per-handle header snapshot.
//!
//! Every entity handle owns one [`HeaderCache`].  It is filled by the
//! first successful metadata fetch and only ever cleared explicitly;
//! there is no expiry and no sharing between handles.

use http::{HeaderMap, StatusCode};

use crate::errors::Result;
use crate::headers::Headers;
use crate::request::Request;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub(crate) struct HeaderCache<H> {
    snapshot: Option<H>,
}

impl<H: Headers> HeaderCache<H> {
    pub(crate) fn new() -> Self {
        Self { snapshot: None }
    }

    pub(crate) fn get(&self) -> Option<&H> {
        self.snapshot.as_ref()
    }

    /// Decode and validate raw response headers, then keep them.  A
    /// snapshot that fails validation is not stored.
    pub(crate) fn store_response(&mut self, raw: HeaderMap) -> Result<H> {
        let headers = H::from_raw(raw);
        headers.validate()?;
        self.snapshot = Some(headers.clone());
        Ok(headers)
    }

    pub(crate) fn invalidate(&mut self) {
        self.snapshot = None;
    }

    /// Cached snapshot, or the result of `head` on a miss.
    pub(crate) async fn get_or_fetch(&mut self, transport: &dyn Transport, head: Request) -> Result<H> {
        if let Some(headers) = &self.snapshot {
            return Ok(headers.clone());
        }
        let response = head.execute(transport).await?;
        self.store_response(response.headers)
    }

    /// Like [`HeaderCache::get_or_fetch`], with 404 mapped to `false`.
    pub(crate) async fn exists(&mut self, transport: &dyn Transport, head: Request) -> Result<bool> {
        match self.get_or_fetch(transport, head).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_status(StatusCode::NOT_FOUND) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<H: Headers> Default for HeaderCache<H> {
    fn default() -> Self {
        Self::new()
    }
}
