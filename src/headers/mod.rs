//! Typed views over raw Swift header maps.
//!
//! Each entity kind has its own header type ([`AccountHeaders`],
//! [`ContainerHeaders`], [`ObjectHeaders`]) wrapping a single
//! [`http::HeaderMap`].  Known fields get typed getters and setters;
//! everything else stays reachable through [`Headers::get`] /
//! [`Headers::set`].  User metadata lives under a per-kind prefix that
//! [`Metadata`] strips on read and [`MetadataMut`] adds on write.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

use crate::errors::{Error, Result};

mod account;
mod container;
mod object;

pub use account::AccountHeaders;
pub use container::ContainerHeaders;
pub use object::ObjectHeaders;

/// Headers computed by the service for every entity kind.  Never sent.
pub(crate) const COMMON_READ_ONLY: &[&str] = &[
    "accept-ranges",
    "connection",
    "content-length",
    "date",
    "last-modified",
    "transfer-encoding",
    "x-openstack-request-id",
    "x-timestamp",
    "x-trans-id",
];

/// Behaviour shared by the three header types.
pub trait Headers: Clone + Default + std::fmt::Debug + Send + Sync {
    /// Lowercase prefix of user metadata keys, e.g. `x-object-meta-`.
    const METADATA_PREFIX: &'static str;

    /// Kind-specific headers that the service computes.  Together with
    /// the common ones they are skipped by [`Headers::encode`].
    const READ_ONLY: &'static [&'static str];

    /// Wrap a raw header map without validation.
    fn from_raw(raw: HeaderMap) -> Self;

    /// The underlying raw map.
    fn raw(&self) -> &HeaderMap;

    /// Mutable access to the underlying raw map.
    fn raw_mut(&mut self) -> &mut HeaderMap;

    /// Parse every typed field, failing with
    /// [`Error::MalformedHeader`] on the first one that does not decode.
    fn validate(&self) -> Result<()>;

    /// Raw value of an arbitrary header.  `None` when absent or not UTF-8.
    fn get(&self, key: &str) -> Option<&str> {
        raw_str(self.raw(), key)
    }

    /// Set an arbitrary header, replacing any previous value.
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        put(self.raw_mut(), key, value)
    }

    /// Remove an arbitrary header from the local map.
    fn remove(&mut self, key: &str) {
        self.raw_mut().remove(key);
    }

    /// User metadata with the prefix stripped.
    fn metadata(&self) -> Metadata<'_> {
        Metadata {
            raw: self.raw(),
            prefix: Self::METADATA_PREFIX,
        }
    }

    /// Writable user metadata.
    fn metadata_mut(&mut self) -> MetadataMut<'_> {
        MetadataMut {
            raw: self.raw_mut(),
            prefix: Self::METADATA_PREFIX,
        }
    }

    /// Whether `key` is computed by the service and must not be sent.
    fn is_read_only(key: &str) -> bool {
        COMMON_READ_ONLY.contains(&key) || Self::READ_ONLY.contains(&key)
    }

    /// Headers to put on the wire.
    ///
    /// With `prior == None` this is every writable header (create
    /// semantics).  With a prior snapshot only entries that are new or
    /// whose value differs are included (update semantics).
    fn encode(&self, prior: Option<&Self>) -> HeaderMap {
        let mut out = HeaderMap::new();
        for (name, value) in self.raw() {
            if Self::is_read_only(name.as_str()) {
                continue;
            }
            let unchanged = prior
                .map(|p| p.raw().get_all(name).iter().any(|v| v == value))
                .unwrap_or(false);
            if !unchanged {
                out.append(name.clone(), value.clone());
            }
        }
        out
    }
}

// -- Metadata views -----------------------------------------------------------

/// Read-only view of user metadata.
#[derive(Debug, Clone, Copy)]
pub struct Metadata<'a> {
    raw: &'a HeaderMap,
    prefix: &'static str,
}

impl<'a> Metadata<'a> {
    /// Value for `key` (case-insensitive).  An empty string means the
    /// key is marked for deletion in an outgoing set.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        raw_str(self.raw, &format!("{}{}", self.prefix, key.to_ascii_lowercase()))
    }

    /// All entries as `(key, value)` with lowercase keys, prefix stripped.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let prefix = self.prefix;
        self.raw.iter().filter_map(move |(name, value)| {
            let key = name.as_str().strip_prefix(prefix)?;
            let value = std::str::from_utf8(value.as_bytes()).ok()?;
            Some((key, value))
        })
    }

    /// Number of metadata entries.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether there are no metadata entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writable view of user metadata.
#[derive(Debug)]
pub struct MetadataMut<'a> {
    raw: &'a mut HeaderMap,
    prefix: &'static str,
}

impl MetadataMut<'_> {
    /// Set `key` to `value`.  Setting the empty string asks the service to
    /// delete the key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = self.full_key(key);
        put(self.raw, &key, value)
    }

    /// Mark `key` for deletion on the next write.
    pub fn clear(&mut self, key: &str) -> Result<()> {
        self.set(key, "")
    }

    /// Forget `key` locally; nothing about it is sent.
    pub fn remove(&mut self, key: &str) {
        let key = self.full_key(key);
        self.raw.remove(key.as_str());
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_ascii_lowercase())
    }
}

// -- Field helpers ------------------------------------------------------------

/// Raw header value as UTF-8 text.
pub(crate) fn raw_str<'a>(raw: &'a HeaderMap, key: &str) -> Option<&'a str> {
    raw.get(key)
        .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
}

/// Insert `key: value`, replacing previous values.
pub(crate) fn put(raw: &mut HeaderMap, key: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| Error::invalid_header(key, e))?;
    let value = HeaderValue::from_str(value).map_err(|e| Error::invalid_header(key, e))?;
    raw.insert(name, value);
    Ok(())
}

/// Non-negative integer field such as a byte count.
pub(crate) fn get_u64(raw: &HeaderMap, key: &str) -> Result<Option<u64>> {
    match raw.get(key) {
        None => Ok(None),
        Some(v) => {
            let text = v.to_str().map_err(|e| Error::malformed_header(key, e))?;
            text.trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| Error::malformed_header(key, e))
        }
    }
}

/// Boolean field such as `X-Static-Large-Object: True`.
pub(crate) fn get_bool(raw: &HeaderMap, key: &str) -> Result<bool> {
    match raw_str(raw, key).map(str::trim) {
        None => Ok(false),
        Some(text) => match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            _ => Err(Error::malformed_header(
                key,
                format!("expected a boolean, got {text:?}"),
            )),
        },
    }
}

/// Unix timestamp with optional fraction, e.g. `X-Timestamp: 1528734539.60418`.
pub(crate) fn get_unix_time(raw: &HeaderMap, key: &str) -> Result<Option<SystemTime>> {
    let Some(text) = raw_str(raw, key) else {
        return Ok(None);
    };
    let seconds: f64 = text
        .trim()
        .parse()
        .map_err(|e| Error::malformed_header(key, e))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(Error::malformed_header(
            key,
            format!("timestamp out of range: {text}"),
        ));
    }
    Duration::try_from_secs_f64(seconds)
        .ok()
        .and_then(|offset| UNIX_EPOCH.checked_add(offset))
        .map(Some)
        .ok_or_else(|| Error::malformed_header(key, format!("timestamp out of range: {text}")))
}

/// RFC 7231 date such as `Last-Modified`.
pub(crate) fn get_http_date(raw: &HeaderMap, key: &str) -> Result<Option<SystemTime>> {
    match raw_str(raw, key) {
        None => Ok(None),
        Some(text) => httpdate::parse_http_date(text.trim())
            .map(Some)
            .map_err(|e| Error::malformed_header(key, e)),
    }
}

/// Write a unix timestamp in whole seconds.
pub(crate) fn put_unix_time(raw: &mut HeaderMap, key: &str, time: SystemTime) -> Result<()> {
    let seconds = time
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::invalid_header(key, e))?
        .as_secs();
    put(raw, key, &seconds.to_string())
}

// -- Tests --------------------------------------------------------------------
