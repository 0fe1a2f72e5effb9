//! RSA-PSS/SHA-256 request signing for the venue-K WebSocket upgrade.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand_core::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::BlindedSigningKey;
use rsa::sha2::Sha256;
use rsa::signature::RandomizedSigner;
use rsa::signature::SignatureEncoding;
use rsa::RsaPrivateKey;

use crate::error::PipelineError;

/// Holds the key material needed to sign venue-K WebSocket upgrades.
/// The private key is never exposed outside [`KalshiAuth::sign`].
pub struct KalshiAuth {
    api_key_id: String,
    private_key: RsaPrivateKey,
}

impl fmt::Debug for KalshiAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KalshiAuth")
            .field("api_key_id", &self.api_key_id)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl KalshiAuth {
    pub fn new(api_key_id: String, private_key_pem: &str) -> Result<Self, PipelineError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| PipelineError::Auth {
                client_id: "k".to_string(),
                reason: format!("failed to parse private key: {e}"),
            })?;
        Ok(Self {
            api_key_id,
            private_key,
        })
    }

    pub fn api_key_id(&self) -> &str {
        &self.api_key_id
    }

    /// Produces the headers needed on the initial HTTP upgrade:
    /// `KALSHI-ACCESS-KEY`, `KALSHI-ACCESS-TIMESTAMP`,
    /// `KALSHI-ACCESS-SIGNATURE`.
    pub fn auth_headers(&self, method: &str, path: &str) -> Result<Vec<(&'static str, String)>, PipelineError> {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PipelineError::Auth {
                client_id: "k".to_string(),
                reason: format!("clock error: {e}"),
            })?
            .as_millis() as u64;
        let signature = self.sign(timestamp_ms, method, path)?;
        Ok(vec![
            ("KALSHI-ACCESS-KEY", self.api_key_id.clone()),
            ("KALSHI-ACCESS-TIMESTAMP", timestamp_ms.to_string()),
            ("KALSHI-ACCESS-SIGNATURE", signature),
        ])
    }

    fn sign(&self, timestamp_ms: u64, method: &str, path: &str) -> Result<String, PipelineError> {
        let message = format!("{}{}{}", timestamp_ms, method.to_uppercase(), path);
        let signing_key = BlindedSigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key.sign_with_rng(&mut OsRng, message.as_bytes());
        Ok(BASE64.encode(signature.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY_PEM: &str = include_str!("test_fixtures/test_key.pem");

    #[test]
    fn sign_produces_base64_signature() {
        let auth = KalshiAuth::new("key-id".to_string(), TEST_KEY_PEM).unwrap();
        let sig = auth.sign(1_700_000_000_000, "GET", "/trade-api/ws/v2").unwrap();
        assert!(!sig.is_empty());
        assert!(BASE64.decode(sig).is_ok());
    }

    #[test]
    fn debug_redacts_private_key() {
        let auth = KalshiAuth::new("key-id".to_string(), TEST_KEY_PEM).unwrap();
        let debug = format!("{:?}", auth);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("BEGIN"));
    }
}
