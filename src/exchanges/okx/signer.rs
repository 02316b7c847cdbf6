use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::{
    hmac_sha256, parse_query, SignatureEncoding, SignatureResult, Signer,
};
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;

pub struct OkxSigner {
    api_key: String,
    secret_key: Secret<String>,
    passphrase: Secret<String>,
}

impl OkxSigner {
    pub fn new(api_key: String, secret_key: String, passphrase: String) -> Self {
        Self {
            api_key,
            secret_key: Secret::new(secret_key),
            passphrase: Secret::new(passphrase),
        }
    }

    pub fn from_config(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        if !config.has_credentials() || config.passphrase_str().is_empty() {
            return Err(ExchangeError::AuthError(
                "OKX signing requires an API key, secret and passphrase".to_string(),
            ));
        }
        Ok(Self::new(
            config.api_key().to_string(),
            config.secret_key().to_string(),
            config.passphrase_str().to_string(),
        ))
    }

    /// The prehash string format is: timestamp + method + requestPath + body
    pub fn generate_signature(
        &self,
        timestamp: &str,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<String, ExchangeError> {
        let prehash = format!("{}{}{}{}", timestamp, method, request_path, body);
        let mac = hmac_sha256(self.secret_key.expose_secret().as_bytes(), prehash.as_bytes())?;
        Ok(SignatureEncoding::Base64.encode(&mac))
    }

    /// OKX wants an ISO-8601 timestamp with millisecond precision
    fn iso_timestamp(timestamp_ms: u64) -> Result<String, ExchangeError> {
        let datetime = chrono::DateTime::from_timestamp_millis(timestamp_ms as i64)
            .ok_or_else(|| ExchangeError::AuthError("Invalid timestamp".to_string()))?;
        Ok(datetime.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
    }
}

impl Signer for OkxSigner {
    fn sign_request(
        &self,
        method: &str,
        endpoint: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult {
        let timestamp = Self::iso_timestamp(timestamp)?;

        let request_path = if query_string.is_empty() {
            endpoint.to_string()
        } else {
            format!("{}?{}", endpoint, query_string)
        };

        let body_str = std::str::from_utf8(body)
            .map_err(|e| ExchangeError::AuthError(format!("Invalid body encoding: {}", e)))?;

        let signature = self.generate_signature(&timestamp, method, &request_path, body_str)?;

        let mut headers = HashMap::new();
        headers.insert("OK-ACCESS-KEY".to_string(), self.api_key.clone());
        headers.insert("OK-ACCESS-SIGN".to_string(), signature);
        headers.insert("OK-ACCESS-TIMESTAMP".to_string(), timestamp);
        headers.insert(
            "OK-ACCESS-PASSPHRASE".to_string(),
            self.passphrase.expose_secret().clone(),
        );

        // The query stays on the URL exactly as signed
        Ok((headers, parse_query(query_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose, Engine as _};

    #[test]
    fn test_sign_request_headers() {
        let signer = OkxSigner::new("key".to_string(), "secret".to_string(), "phrase".to_string());
        let (headers, params) = signer
            .sign_request(
                "GET",
                "/api/v5/account/balance",
                "ccy=BTC",
                &[],
                1_700_000_000_123,
            )
            .unwrap();

        assert_eq!(headers["OK-ACCESS-TIMESTAMP"], "2023-11-14T22:13:20.123Z");
        assert_eq!(headers["OK-ACCESS-KEY"], "key");
        assert_eq!(headers["OK-ACCESS-PASSPHRASE"], "phrase");
        assert_eq!(params, vec![("ccy".to_string(), "BTC".to_string())]);

        let expected = general_purpose::STANDARD.encode(
            hmac_sha256(
                b"secret",
                b"2023-11-14T22:13:20.123ZGET/api/v5/account/balance?ccy=BTC",
            )
            .unwrap(),
        );
        assert_eq!(headers["OK-ACCESS-SIGN"], expected);
    }

    #[test]
    fn test_body_is_part_of_prehash() {
        let signer = OkxSigner::new("key".to_string(), "secret".to_string(), "phrase".to_string());
        let sign = |body: &[u8]| {
            signer
                .sign_request("POST", "/api/v5/trade/order", "", body, 1_700_000_000_000)
                .unwrap()
                .0["OK-ACCESS-SIGN"]
                .clone()
        };

        assert_ne!(sign(br#"{"sz":"1"}"#), sign(br#"{"sz":"2"}"#));
    }

    #[test]
    fn test_from_config_requires_passphrase() {
        let config = ExchangeConfig::new("key".to_string(), "secret".to_string());
        assert!(OkxSigner::from_config(&config).is_err());
        assert!(OkxSigner::from_config(&config.passphrase("phrase".to_string())).is_ok());
    }
}
