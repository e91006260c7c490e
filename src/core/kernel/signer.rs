use crate::core::errors::ExchangeError;
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::collections::BTreeMap;

/// Join parameters as `key=value` pairs with `&`, keys in ascending byte order.
///
/// Values are inserted verbatim. Anything the exchange wants escaped must already be
/// escaped by the caller, so the signed bytes are exactly the bytes sent.
pub fn canonicalize(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// HMAC-SHA256 over `payload`, lowercase hex.
pub fn sign_hex(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Signing(format!("Invalid secret key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Millisecond timestamp to embed in a signed request.
///
/// `server_time_secs` is the exchange clock in (fractional) seconds. The guard is subtracted
/// so the request lands inside the server's acceptance window despite transit latency.
pub fn signed_timestamp(server_time_secs: Decimal, guard_ms: u64) -> Result<u64, ExchangeError> {
    let millis = (server_time_secs * Decimal::ONE_THOUSAND).trunc() - Decimal::from(guard_ms);
    if millis.is_sign_negative() {
        return Err(ExchangeError::Signing(format!(
            "server time {} is smaller than the {}ms guard",
            server_time_secs, guard_ms
        )));
    }
    millis
        .to_u64()
        .ok_or_else(|| ExchangeError::Signing(format!("server time {} out of range", server_time_secs)))
}

/// Where the signature travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePlacement {
    /// `&sign=<hex>` appended to the canonical query string.
    Query,
    /// `"sign": "<hex>"` added to the JSON body alongside every other parameter.
    Body,
}

/// A request signed for exactly one submission.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: Method,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub canonical: String,
    pub timestamp: u64,
    pub signature: String,
    pub placement: SignaturePlacement,
}

impl SignedRequest {
    /// Query string to put on the URL; empty for body-signed requests.
    pub fn query_string(&self) -> String {
        match self.placement {
            SignaturePlacement::Query => format!("{}&sign={}", self.canonical, self.signature),
            SignaturePlacement::Body => String::new(),
        }
    }

    /// JSON body for body-signed requests.
    pub fn json_body(&self) -> Result<Option<String>, ExchangeError> {
        match self.placement {
            SignaturePlacement::Query => Ok(None),
            SignaturePlacement::Body => {
                let mut body = self.params.clone();
                body.insert("sign".to_string(), self.signature.clone());
                serde_json::to_string(&body)
                    .map(Some)
                    .map_err(|e| ExchangeError::Signing(format!("Failed to encode body: {}", e)))
            }
        }
    }
}

/// Signer trait for request authentication
pub trait Signer: Send + Sync {
    fn api_key(&self) -> &str;

    /// Signature over an already canonical payload.
    fn sign(&self, payload: &str) -> Result<String, ExchangeError>;

    /// Add `api_key` and `timestamp` to `params`, canonicalize, and sign.
    fn sign_params(
        &self,
        method: Method,
        path: &str,
        mut params: BTreeMap<String, String>,
        timestamp: u64,
        placement: SignaturePlacement,
    ) -> Result<SignedRequest, ExchangeError> {
        params.insert("api_key".to_string(), self.api_key().to_string());
        params.insert("timestamp".to_string(), timestamp.to_string());
        let canonical = canonicalize(&params);
        let signature = self.sign(&canonical)?;

        Ok(SignedRequest {
            method,
            path: path.to_string(),
            params,
            canonical,
            timestamp,
            signature,
            placement,
        })
    }
}

/// HMAC-SHA256 signer holding the credential pair.
pub struct HmacSigner {
    api_key: Secret<String>,
    secret_key: Secret<String>,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

impl HmacSigner {
    pub fn new(api_key: Secret<String>, secret_key: Secret<String>) -> Self {
        Self {
            api_key,
            secret_key,
        }
    }
}

impl Signer for HmacSigner {
    fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    fn sign(&self, payload: &str) -> Result<String, ExchangeError> {
        sign_hex(self.secret_key.expose_secret(), payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_canonicalize_sorts_keys() {
        let p = params(&[("symbol", "BTCUSDT"), ("qty", "1.000")]);
        assert_eq!(canonicalize(&p), "qty=1.000&symbol=BTCUSDT");
    }

    #[test]
    fn test_canonicalize_is_byte_order_not_case_order() {
        let p = params(&[("b", "1"), ("B", "2"), ("a", "3")]);
        assert_eq!(canonicalize(&p), "B=2&a=3&b=1");
    }

    #[test]
    fn test_canonicalize_keeps_values_verbatim() {
        let p = params(&[("addr", "a%2Fb"), ("price", "0.10")]);
        assert_eq!(canonicalize(&p), "addr=a%2Fb&price=0.10");
    }

    #[test]
    fn test_sign_hex_known_vector() {
        // RFC 4231 test case 2
        let sig = sign_hex("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_sign_is_stable() {
        let canonical = canonicalize(&params(&[("symbol", "BTCUSDT"), ("qty", "1.000")]));
        let first = sign_hex("s3cr3t", &canonical).unwrap();
        let second = sign_hex("s3cr3t", &canonical).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_signed_timestamp_applies_guard() {
        assert_eq!(signed_timestamp(dec!(1000.000), 100).unwrap(), 999_900);
        assert_eq!(
            signed_timestamp(dec!(1577444332.192859), 100).unwrap(),
            1_577_444_332_092
        );
    }

    #[test]
    fn test_signed_timestamp_rejects_underflow() {
        assert!(matches!(
            signed_timestamp(dec!(0.05), 100),
            Err(ExchangeError::Signing(_))
        ));
    }

    #[test]
    fn test_sign_params_query_placement() {
        let signer = HmacSigner::new(Secret::new("key".into()), Secret::new("s3cr3t".into()));
        let signed = signer
            .sign_params(
                Method::GET,
                "/spot/v1/account",
                BTreeMap::new(),
                999_900,
                SignaturePlacement::Query,
            )
            .unwrap();

        assert_eq!(signed.canonical, "api_key=key&timestamp=999900");
        assert_eq!(
            signed.signature,
            sign_hex("s3cr3t", "api_key=key&timestamp=999900").unwrap()
        );
        assert_eq!(
            signed.query_string(),
            format!("api_key=key&timestamp=999900&sign={}", signed.signature)
        );
        assert!(signed.json_body().unwrap().is_none());
    }

    #[test]
    fn test_sign_params_body_placement() {
        let signer = HmacSigner::new(Secret::new("key".into()), Secret::new("s3cr3t".into()));
        let signed = signer
            .sign_params(
                Method::POST,
                "/asset/v1/private/withdraw",
                params(&[("coin", "USDT"), ("amount", "10")]),
                5,
                SignaturePlacement::Body,
            )
            .unwrap();

        assert!(signed.query_string().is_empty());
        let body: serde_json::Value =
            serde_json::from_str(&signed.json_body().unwrap().unwrap()).unwrap();
        assert_eq!(body["coin"], "USDT");
        assert_eq!(body["timestamp"], "5");
        assert_eq!(body["sign"], signed.signature.as_str());
    }

    #[test]
    fn test_debug_hides_credentials() {
        let signer = HmacSigner::new(Secret::new("key".into()), Secret::new("s3cr3t".into()));
        assert!(!format!("{:?}", signer).contains("s3cr3t"));
    }
}
