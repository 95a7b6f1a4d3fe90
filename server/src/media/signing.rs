use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::MediaConfig;

type HmacSha256 = Hmac<Sha256>;

/// Expands opaque object-storage keys into time-limited URLs.
///
/// URL shape: `{base_url}/{key}?Expires={unix}&Signature={sig}` where
/// `sig = base64url(HMAC-SHA256(secret, "{key}:{expires}"))`.
/// The media edge recomputes the same HMAC to authorize the request.
#[derive(Debug, Clone)]
pub struct UrlSigner {
    base_url: String,
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl UrlSigner {
    pub fn new(base_url: &str, secret: &[u8], ttl_secs: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_vec(),
            ttl_secs,
        }
    }

    /// Build a signer from config. `None` when no secret is configured.
    pub fn from_config(config: &MediaConfig) -> Option<Self> {
        if config.signing_secret.is_empty() {
            return None;
        }
        Some(Self::new(
            &config.base_url,
            config.signing_secret.as_bytes(),
            config.url_ttl_secs,
        ))
    }

    /// Sign `key`, valid for the configured TTL from now.
    pub fn sign(&self, key: &str) -> String {
        self.sign_at(key, chrono::Utc::now().timestamp())
    }

    pub fn sign_at(&self, key: &str, now: i64) -> String {
        let key = key.trim_start_matches('/');
        let expires = now + self.ttl_secs as i64;
        format!(
            "{}/{}?Expires={}&Signature={}",
            self.base_url,
            key,
            expires,
            self.signature(key, expires)
        )
    }

    /// Check a signature produced by `sign_at` and that it has not expired.
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: i64) -> bool {
        if now >= expires {
            return false;
        }
        let Ok(sig) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(format!("{}:{}", key.trim_start_matches('/'), expires).as_bytes());
        mac.verify_slice(&sig).is_ok()
    }

    fn signature(&self, key: &str, expires: i64) -> String {
        let mut mac = self.mac();
        mac.update(format!("{}:{}", key, expires).as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }
}
