//! Request signing for Binance USDT-M futures
//!
//! Signed endpoints take an HMAC-SHA256 of the full query string, keyed with
//! the API secret, appended as `signature=<hex>`.

use anyhow::{anyhow, Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::{ExchangeConfig, API_KEY_ENV, API_SECRET_ENV};

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `query` keyed with `secret`
pub fn sign_query(query: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// API credentials container
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Credentials from the exchange config, which already carries any
    /// environment override. Missing or empty values are an error.
    pub fn from_config(config: &ExchangeConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .with_context(|| format!("Missing API key ({} in .env)", API_KEY_ENV))?;
        let api_secret = config
            .api_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .with_context(|| format!("Missing API secret ({} in .env)", API_SECRET_ENV))?;
        Ok(Self::new(api_key, api_secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn sign(&self, query: &str) -> Result<String> {
        sign_query(query, &self.api_secret)
    }
}
