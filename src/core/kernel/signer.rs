use crate::core::errors::ExchangeError;
use crate::core::kernel::nonce::{Nonce, SeedPolicy};
use crate::core::kernel::subscription::{PayloadAuth, SubscriptionPayload};
use base64::engine::general_purpose;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Result type for signing operations: (headers, `query_params`)
pub type SignatureResult = Result<(HashMap<String, String>, Vec<(String, String)>), ExchangeError>;

/// Signer trait for REST request authentication
///
/// Implementations hold one credential set and produce the headers and
/// query parameters a venue expects on an authenticated call.
pub trait Signer: Send + Sync {
    /// Sign a request and return headers and query parameters
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.)
    /// * `endpoint` - API endpoint path
    /// * `query_string` - Query string (without leading '?')
    /// * `body` - Raw request body bytes
    /// * `timestamp` - Request timestamp in milliseconds
    fn sign_request(
        &self,
        method: &str,
        endpoint: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult;
}

/// Signing strategy for WebSocket control frames.
///
/// Stamps `payload.auth` in place; the session calls it only when
/// authenticated endpoints are enabled.
pub trait PayloadSigner: Send + Sync {
    fn sign_payload(
        &self,
        payload: &mut SubscriptionPayload,
        timestamp_ms: u64,
    ) -> Result<(), ExchangeError>;
}

/// How raw MAC bytes are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    Hex,
    UpperHex,
    Base64,
}

impl SignatureEncoding {
    pub fn encode(self, bytes: &[u8]) -> String {
        match self {
            Self::Hex => hex::encode(bytes),
            Self::UpperHex => hex::encode_upper(bytes),
            Self::Base64 => general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// HMAC-SHA256 over `message` keyed with `secret`
pub fn hmac_sha256(secret: &[u8], message: &[u8]) -> Result<Vec<u8>, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ExchangeError::AuthError(format!("Invalid secret key: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn parse_query(query_string: &str) -> Vec<(String, String)> {
    query_string
        .split('&')
        .filter_map(|param| {
            param
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// Header names used by [`NonceHmacSigner`]
#[derive(Debug, Clone)]
pub struct NonceHeaders {
    pub key: String,
    pub nonce: String,
    pub signature: String,
}

impl Default for NonceHeaders {
    fn default() -> Self {
        Self {
            key: "API-Key".to_string(),
            nonce: "API-Nonce".to_string(),
            signature: "API-Signature".to_string(),
        }
    }
}

/// REST signer for venues that authenticate with a nonce:
/// `UPPERHEX(HMAC-SHA256(nonce + key + path + body, secret))`.
///
/// The nonce comes from a sequencer shared by every signer of the same
/// credential set.
pub struct NonceHmacSigner {
    api_key: String,
    secret: SecretVec<u8>,
    nonce: Arc<Nonce>,
    seed: SeedPolicy,
    headers: NonceHeaders,
}

impl NonceHmacSigner {
    pub fn new(api_key: String, secret_key: &str, nonce: Arc<Nonce>) -> Self {
        Self {
            api_key,
            secret: SecretVec::new(secret_key.as_bytes().to_vec()),
            nonce,
            seed: SeedPolicy::UnixNanos,
            headers: NonceHeaders::default(),
        }
    }

    pub fn with_seed_policy(mut self, seed: SeedPolicy) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_headers(mut self, headers: NonceHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Signature for an explicit nonce
    pub fn signature(
        &self,
        nonce: &str,
        path: &str,
        body: &[u8],
    ) -> Result<String, ExchangeError> {
        let mut message = Vec::with_capacity(nonce.len() + self.api_key.len() + path.len() + body.len());
        message.extend_from_slice(nonce.as_bytes());
        message.extend_from_slice(self.api_key.as_bytes());
        message.extend_from_slice(path.as_bytes());
        message.extend_from_slice(body);

        let mac = hmac_sha256(self.secret.expose_secret(), &message)?;
        Ok(SignatureEncoding::UpperHex.encode(&mac))
    }
}

impl Signer for NonceHmacSigner {
    fn sign_request(
        &self,
        _method: &str,
        endpoint: &str,
        query_string: &str,
        body: &[u8],
        _timestamp: u64,
    ) -> SignatureResult {
        let nonce = self.nonce.get_and_increment_string(self.seed);
        let path = if query_string.is_empty() {
            endpoint.to_string()
        } else {
            format!("{}?{}", endpoint, query_string)
        };
        let signature = self.signature(&nonce, &path, body)?;

        let mut headers = HashMap::new();
        headers.insert(self.headers.key.clone(), self.api_key.clone());
        headers.insert(self.headers.nonce.clone(), nonce);
        headers.insert(self.headers.signature.clone(), signature);

        Ok((headers, parse_query(query_string)))
    }
}

/// Rendering of the timestamp embedded in signed payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    UnixSeconds,
    UnixMillis,
}

impl TimestampFormat {
    fn render(self, timestamp_ms: u64) -> String {
        match self {
            Self::UnixSeconds => (timestamp_ms / 1_000).to_string(),
            Self::UnixMillis => timestamp_ms.to_string(),
        }
    }
}

/// HMAC signer for WebSocket control frames.
///
/// Preimage is `timestamp + api_key + context + client_id`, e.g. Coinbase
/// International uses the context `CBINTLMD` and the passphrase as client id.
pub struct HmacPayloadSigner {
    api_key: String,
    secret: SecretVec<u8>,
    client_id: String,
    context: String,
    encoding: SignatureEncoding,
    timestamp_format: TimestampFormat,
}

impl HmacPayloadSigner {
    pub fn new(
        api_key: String,
        secret: Vec<u8>,
        client_id: String,
        context: impl Into<String>,
    ) -> Self {
        Self {
            api_key,
            secret: SecretVec::new(secret),
            client_id,
            context: context.into(),
            encoding: SignatureEncoding::Base64,
            timestamp_format: TimestampFormat::UnixSeconds,
        }
    }

    /// Build from a base64-encoded secret as issued by some venues
    pub fn from_base64_secret(
        api_key: String,
        secret_b64: &str,
        client_id: String,
        context: impl Into<String>,
    ) -> Result<Self, ExchangeError> {
        let secret = general_purpose::STANDARD
            .decode(secret_b64)
            .map_err(|e| ExchangeError::AuthError(format!("Invalid secret key format: {}", e)))?;
        Ok(Self::new(api_key, secret, client_id, context))
    }

    pub fn with_encoding(mut self, encoding: SignatureEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }

    pub fn signature(&self, timestamp: &str) -> Result<String, ExchangeError> {
        let preimage = format!(
            "{}{}{}{}",
            timestamp, self.api_key, self.context, self.client_id
        );
        let mac = hmac_sha256(self.secret.expose_secret(), preimage.as_bytes())?;
        Ok(self.encoding.encode(&mac))
    }
}

impl PayloadSigner for HmacPayloadSigner {
    fn sign_payload(
        &self,
        payload: &mut SubscriptionPayload,
        timestamp_ms: u64,
    ) -> Result<(), ExchangeError> {
        let timestamp = self.timestamp_format.render(timestamp_ms);
        let signature = self.signature(&timestamp)?;

        payload.auth = Some(PayloadAuth {
            key: self.api_key.clone(),
            passphrase: self.client_id.clone(),
            signature,
            timestamp,
        });
        Ok(())
    }
}
