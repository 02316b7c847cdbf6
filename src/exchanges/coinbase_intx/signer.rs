use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::{HmacPayloadSigner, SignatureEncoding, TimestampFormat};

/// Signing context Coinbase International mixes into market data auth
pub const MARKET_DATA_CONTEXT: &str = "CBINTLMD";

/// Subscription signer: base64(HMAC-SHA256(time + key + "CBINTLMD" + passphrase))
/// keyed by the base64-decoded API secret.
pub fn ws_signer(config: &ExchangeConfig) -> Result<HmacPayloadSigner, ExchangeError> {
    if !config.has_credentials() {
        return Err(ExchangeError::AuthError(
            "Coinbase International signing requires an API key and secret".to_string(),
        ));
    }
    if config.passphrase_str().is_empty() {
        return Err(ExchangeError::AuthError(
            "Coinbase International signing requires a passphrase".to_string(),
        ));
    }

    Ok(HmacPayloadSigner::from_base64_secret(
        config.api_key().to_string(),
        config.secret_key(),
        config.passphrase_str().to_string(),
        MARKET_DATA_CONTEXT,
    )?
    .with_encoding(SignatureEncoding::Base64)
    .with_timestamp_format(TimestampFormat::UnixSeconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::signer::{hmac_sha256, PayloadSigner};
    use crate::core::kernel::subscription::{Operation, SubscriptionPayload};
    use base64::{engine::general_purpose, Engine as _};

    fn config() -> ExchangeConfig {
        ExchangeConfig::new(
            "key".to_string(),
            general_purpose::STANDARD.encode(b"intx-secret"),
        )
        .passphrase("phrase".to_string())
        .authenticated_endpoints(true)
    }

    #[test]
    fn test_signature_matches_preimage() {
        let signer = ws_signer(&config()).unwrap();
        let mut payload = SubscriptionPayload {
            operation: Operation::Subscribe,
            channels: vec!["LEVEL2".to_string()],
            instruments: vec!["BTC-PERP".to_string()],
            auth: None,
        };

        signer.sign_payload(&mut payload, 1_700_000_000_123).unwrap();

        let auth = payload.auth.unwrap();
        let expected = general_purpose::STANDARD.encode(
            hmac_sha256(b"intx-secret", b"1700000000keyCBINTLMDphrase").unwrap(),
        );
        assert_eq!(auth.timestamp, "1700000000");
        assert_eq!(auth.key, "key");
        assert_eq!(auth.passphrase, "phrase");
        assert_eq!(auth.signature, expected);
    }

    #[test]
    fn test_missing_passphrase_is_rejected() {
        let config = ExchangeConfig::new("key".to_string(), "c2VjcmV0".to_string());
        assert!(matches!(ws_signer(&config), Err(ExchangeError::AuthError(_))));
    }

    #[test]
    fn test_non_base64_secret_is_rejected() {
        let config = ExchangeConfig::new("key".to_string(), "not base64!".to_string())
            .passphrase("phrase".to_string());
        assert!(ws_signer(&config).is_err());
    }
}
