//! Shared REST helpers used by every [`super::spec::VenueSpec`]
//! implementation, so each venue module stays focused on its own JSON
//! shapes rather than repeating `reqwest` boilerplate.

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use sha2::Sha256;

use crate::error::{EngineError, Result};

type HmacSha256 = Hmac<Sha256>;

pub async fn get_json<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> Result<T> {
    let resp = http.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(EngineError::Parse(format!("{url} returned HTTP {}", resp.status())));
    }
    resp.json::<T>().await.map_err(EngineError::from)
}

pub async fn get_json_with_headers<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
) -> Result<T> {
    let mut builder = http.get(url);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let resp = builder.send().await?;
    if !resp.status().is_success() {
        return Err(EngineError::Parse(format!("{url} returned HTTP {}", resp.status())));
    }
    resp.json::<T>().await.map_err(EngineError::from)
}

pub fn parse_f64(s: &str) -> f64 {
    s.parse().unwrap_or(0.0)
}

/// HMAC-SHA256 over `message`, hex-encoded (§4.2 "Signing discipline per
/// venue: typically HMAC-SHA256 over a canonical query-string with a
/// timestamp/nonce and an API-key header"). Shared by every venue's signed
/// REST calls rather than reimplemented per module.
pub fn sign_hmac_sha256(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC-SHA256 over `message`, base64-encoded — OKX's flavor of §4.2's
/// signing discipline (`OK-ACCESS-SIGN` wants base64, not hex).
pub fn sign_hmac_sha256_base64(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(message.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}
