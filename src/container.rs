//! Container handle.

use std::fmt;

use crate::account::Account;
use crate::cache::HeaderCache;
use crate::errors::Result;
use crate::headers::{ContainerHeaders, Headers};
use crate::listing::{list_all, ListOptions, ObjectListEntry};
use crate::object::Object;
use crate::request::{Request, RequestOptions};
use crate::status::Operation;
use crate::transport::Transport;

/// A container within an account.
///
/// The name must be non-empty and free of `/`; this is checked when a
/// request is built, so constructing a handle never fails.
#[derive(Clone)]
pub struct Container {
    account: Account,
    name: String,
    cache: HeaderCache<ContainerHeaders>,
}

impl Container {
    pub(crate) fn new(account: Account, name: String) -> Self {
        Self {
            account,
            name,
            cache: HeaderCache::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Handle for an object in this container.  No I/O.
    pub fn object(&self, name: impl Into<String>) -> Object {
        Object::new(self.detached(), name.into())
    }

    pub(crate) fn detached(&self) -> Self {
        Self::new(self.account.detached(), self.name.clone())
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.account.transport()
    }

    fn request(&self, operation: Operation) -> Request {
        Request::new(operation).container(self.name.clone())
    }

    /// Container headers, from the cache or a HEAD request.
    pub async fn headers(&mut self) -> Result<ContainerHeaders> {
        let head = self.request(Operation::ContainerHead);
        self.cache.get_or_fetch(self.account.transport(), head).await
    }

    /// Whether the container exists.  A 404 yields `false`; every other
    /// failure is returned.
    pub async fn exists(&mut self) -> Result<bool> {
        let head = self.request(Operation::ContainerHead);
        self.cache.exists(self.account.transport(), head).await
    }

    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// PUT the container.  Creating an existing container is not an
    /// error (202); its writable headers are merged.
    pub async fn create(
        &mut self,
        headers: Option<&ContainerHeaders>,
        opts: Option<&RequestOptions>,
    ) -> Result<()> {
        let wire = headers.map(|h| h.encode(None)).unwrap_or_default();
        self.request(Operation::ContainerPut)
            .headers(wire)
            .options(opts)
            .execute(self.transport())
            .await?;
        self.invalidate();
        Ok(())
    }

    /// POST the headers that differ from the cached snapshot.
    pub async fn update(
        &mut self,
        headers: &ContainerHeaders,
        opts: Option<&RequestOptions>,
    ) -> Result<()> {
        let wire = headers.encode(self.cache.get());
        self.request(Operation::ContainerPost)
            .headers(wire)
            .options(opts)
            .execute(self.transport())
            .await?;
        self.invalidate();
        Ok(())
    }

    /// DELETE the container.  Fails with 409 while it still holds
    /// objects and with 404 if it is already gone.
    pub async fn delete(&mut self, opts: Option<&RequestOptions>) -> Result<()> {
        self.request(Operation::ContainerDelete)
            .options(opts)
            .execute(self.transport())
            .await?;
        self.invalidate();
        Ok(())
    }

    /// Every object (and, with a delimiter, pseudo directory), walking
    /// all pages.
    pub async fn list_objects(
        &self,
        list: Option<&ListOptions>,
        opts: Option<&RequestOptions>,
    ) -> Result<Vec<ObjectListEntry>> {
        list_all(
            self.transport(),
            || self.request(Operation::ContainerGet),
            list,
            opts,
        )
        .await
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("cached", &self.cache.get().is_some())
            .finish()
    }
}
