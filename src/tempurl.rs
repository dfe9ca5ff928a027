//! Temporary URLs.
//!
//! A temp URL grants access to one object without a token until a
//! deadline.  The signature is an HMAC-SHA256 over the method, the
//! expiry and the object path, keyed with one of the account's or
//! container's temp-URL keys.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use http::Method;
use percent_encoding::percent_decode_str;
use reqwest::Url;
use sha2::Sha256;

use crate::errors::{Error, Result};
use crate::object::Object;
use crate::status::Operation;

type HmacSha256 = Hmac<Sha256>;

impl Object {
    /// Signed URL allowing `method` on this object until `expires`.
    ///
    /// `key` must match `X-Account-Meta-Temp-URL-Key` (or `-Key-2`) on
    /// the account, or the container equivalent.  No request is sent.
    pub fn temp_url(&self, key: &str, method: &Method, expires: SystemTime) -> Result<String> {
        let path = self.request(Operation::ObjectGet).path()?;
        let account_url = self.transport().account_url().trim_end_matches('/');
        let parsed = Url::parse(account_url).map_err(|e| Error::invalid_header("storage-url", e))?;
        let account_path = percent_decode_str(parsed.path()).decode_utf8_lossy();

        let signed_path = format!(
            "{}/{}/{}",
            account_path.trim_end_matches('/'),
            self.container().name(),
            self.name()
        );
        let expires = expires
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let signature = sign(key, &format!("{}\n{}\n{}", method.as_str(), expires, signed_path))?;

        Ok(format!(
            "{account_url}{path}?temp_url_sig={signature}&temp_url_expires={expires}"
        ))
    }
}

fn sign(key: &str, data: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| Error::invalid_header("temp-url-key", e))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
