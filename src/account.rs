//! Account handle.

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::cache::HeaderCache;
use crate::capabilities::Capabilities;
use crate::config::SwiftConfig;
use crate::container::Container;
use crate::errors::Result;
use crate::headers::{AccountHeaders, Headers};
use crate::listing::{list_all, ContainerInfo, ListOptions};
use crate::request::{Request, RequestOptions};
use crate::status::Operation;
use crate::transport::remote::HttpTransport;
use crate::transport::Transport;

/// Root of the hierarchy.  Holds the transport and a cached header
/// snapshot; cloning is cheap and the clone carries its own header
/// cache.  The cluster capabilities are shared by all clones.
#[derive(Clone)]
pub struct Account {
    transport: Arc<dyn Transport>,
    cache: HeaderCache<AccountHeaders>,
    capabilities: Arc<OnceCell<Capabilities>>,
}

impl Account {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: HeaderCache::new(),
            capabilities: Arc::new(OnceCell::new()),
        }
    }

    /// Connect over HTTP using the `swift` config section.
    pub fn from_config(config: &SwiftConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(Arc::new(transport)))
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Public URL of the account.
    pub fn url(&self) -> &str {
        self.transport.account_url()
    }

    /// Handle for a container.  No I/O; the name is checked when the
    /// first request is built.
    pub fn container(&self, name: impl Into<String>) -> Container {
        Container::new(self.detached(), name.into())
    }

    /// Same account without the cached snapshot.
    pub(crate) fn detached(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            cache: HeaderCache::new(),
            capabilities: Arc::clone(&self.capabilities),
        }
    }

    pub(crate) fn capabilities_cell(&self) -> &OnceCell<Capabilities> {
        &self.capabilities
    }

    pub(crate) fn invalidate_cache(&mut self) {
        self.cache.invalidate();
    }

    /// Account headers, from the cache or a HEAD request.
    pub async fn headers(&mut self) -> Result<AccountHeaders> {
        let head = Request::new(Operation::AccountHead);
        self.cache.get_or_fetch(self.transport.as_ref(), head).await
    }

    /// Whether the account is reachable.  A 404 yields `false`.
    pub async fn exists(&mut self) -> Result<bool> {
        let head = Request::new(Operation::AccountHead);
        self.cache.exists(self.transport.as_ref(), head).await
    }

    /// Drop the cached snapshot.  The next [`Account::headers`] refetches.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// POST the headers that differ from the cached snapshot (all of
    /// them when nothing is cached).
    pub async fn update(
        &mut self,
        headers: &AccountHeaders,
        opts: Option<&RequestOptions>,
    ) -> Result<()> {
        let wire = headers.encode(self.cache.get());
        Request::new(Operation::AccountPost)
            .headers(wire)
            .options(opts)
            .execute(self.transport.as_ref())
            .await?;
        self.invalidate();
        Ok(())
    }

    /// Every container, walking all pages.
    pub async fn list_containers(
        &self,
        list: Option<&ListOptions>,
        opts: Option<&RequestOptions>,
    ) -> Result<Vec<ContainerInfo>> {
        list_all(
            self.transport.as_ref(),
            || Request::new(Operation::AccountGet),
            list,
            opts,
        )
        .await
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("url", &self.url())
            .field("cached", &self.cache.get().is_some())
            .finish()
    }
}
