use crate::core::config::ConfigError;
use crate::core::errors::ExchangeError;
use crate::core::kernel::rate_limit::{EndpointClass, EndpointRateLimiter};
use crate::core::kernel::signer::Signer;
use async_trait::async_trait;
use reqwest::{Client, Method, Request, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{instrument, trace};

/// REST client trait for rate-limited venue calls
///
/// Every call names the endpoint class it belongs to; the client waits for a
/// permit from that class's bucket before anything goes on the wire.
#[async_trait]
pub trait RestClient<E: EndpointClass>: Send + Sync {
    /// Make a GET request with strongly-typed response
    ///
    /// # Arguments
    /// * `class` - Endpoint class the call is charged against
    /// * `endpoint` - The API endpoint path
    /// * `query_params` - Query parameters as key-value pairs
    /// * `authenticated` - Whether to sign the request
    async fn get_json<T: DeserializeOwned>(
        &self,
        class: E,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<T, ExchangeError>;

    /// Make a POST request with strongly-typed response
    async fn post_json<T: DeserializeOwned>(
        &self,
        class: E,
        endpoint: &str,
        body: &Value,
        authenticated: bool,
    ) -> Result<T, ExchangeError>;

    /// Make a DELETE request with strongly-typed response
    async fn delete_json<T: DeserializeOwned>(
        &self,
        class: E,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<T, ExchangeError>;
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string to include in requests
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout_seconds: 30,
            user_agent: "LotusX/1.0".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder<E: EndpointClass> {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    limiter: Option<Arc<EndpointRateLimiter<E>>>,
}

impl<E: EndpointClass> RestClientBuilder<E> {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
            limiter: None,
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Share a limiter across clients holding the same credentials
    pub fn with_rate_limiter(mut self, limiter: Arc<EndpointRateLimiter<E>>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Build the REST client
    ///
    /// Without an explicit limiter one is built from `E::all()`.
    pub fn build(self) -> Result<ReqwestRest<E>, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| {
                ConfigError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e))
            })?;

        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => Arc::new(EndpointRateLimiter::new()?),
        };

        Ok(ReqwestRest {
            client,
            config: self.config,
            signer: self.signer,
            limiter,
        })
    }
}

/// Implementation of `RestClient` using reqwest
pub struct ReqwestRest<E: EndpointClass> {
    client: Client,
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    limiter: Arc<EndpointRateLimiter<E>>,
}

impl<E: EndpointClass> Clone for ReqwestRest<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            signer: self.signer.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

impl<E: EndpointClass> std::fmt::Debug for ReqwestRest<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl<E: EndpointClass> ReqwestRest<E> {
    pub fn limiter(&self) -> &Arc<EndpointRateLimiter<E>> {
        &self.limiter
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url, endpoint)
    }

    fn create_query_string(params: &[(&str, &str)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Assemble (and sign, when asked) a request without sending it
    pub fn build_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: &[u8],
        authenticated: bool,
        timestamp: u64,
    ) -> Result<Request, ExchangeError> {
        let mut request = self.client.request(method.clone(), self.build_url(endpoint));

        if authenticated {
            let signer = self.signer.as_ref().ok_or_else(|| {
                ExchangeError::AuthError(
                    "Authentication required but no signer provided".to_string(),
                )
            })?;

            let query_string = Self::create_query_string(query_params);
            let (headers, signed_params) =
                signer.sign_request(method.as_str(), endpoint, &query_string, body, timestamp)?;

            for (key, value) in headers {
                request = request.header(&key, &value);
            }
            if !signed_params.is_empty() {
                request = request.query(&signed_params);
            }
        } else if !query_params.is_empty() {
            request = request.query(query_params);
        }

        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_vec());
        }

        Ok(request.build()?)
    }

    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = %response.status()))]
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        trace!("Response body: {}", response_text);

        if status.is_success() {
            Ok(serde_json::from_str(&response_text)?)
        } else {
            Err(ExchangeError::ApiError {
                code: i32::from(status.as_u16()),
                message: response_text,
            })
        }
    }

    #[instrument(skip(self, query_params, body), fields(exchange = %self.config.exchange_name, class = ?class, method = %method, endpoint = %endpoint))]
    async fn make_request<T: DeserializeOwned>(
        &self,
        class: E,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: &[u8],
        authenticated: bool,
    ) -> Result<T, ExchangeError> {
        self.limiter.limit(class).await?;

        // Signed after the wait so the timestamp is fresh
        let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let request = self.build_request(
            method,
            endpoint,
            query_params,
            body,
            authenticated,
            timestamp,
        )?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("Request failed: {}", e)))?;

        self.handle_response(response).await
    }
}

#[async_trait]
impl<E: EndpointClass> RestClient<E> for ReqwestRest<E> {
    async fn get_json<T: DeserializeOwned>(
        &self,
        class: E,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<T, ExchangeError> {
        self.make_request(class, Method::GET, endpoint, query_params, &[], authenticated)
            .await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        class: E,
        endpoint: &str,
        body: &Value,
        authenticated: bool,
    ) -> Result<T, ExchangeError> {
        let body_bytes = serde_json::to_vec(body)?;
        self.make_request(class, Method::POST, endpoint, &[], &body_bytes, authenticated)
            .await
    }

    async fn delete_json<T: DeserializeOwned>(
        &self,
        class: E,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<T, ExchangeError> {
        self.make_request(class, Method::DELETE, endpoint, query_params, &[], authenticated)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::nonce::{Nonce, SeedPolicy};
    use crate::core::kernel::rate_limit::RateLimitRule;
    use crate::core::kernel::signer::NonceHmacSigner;
    use nonzero_ext::nonzero;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestEndpoint {
        Orders,
    }

    impl EndpointClass for TestEndpoint {
        fn all() -> &'static [Self] {
            &[TestEndpoint::Orders]
        }

        fn rule(self) -> RateLimitRule {
            RateLimitRule::new(Duration::from_secs(1), nonzero!(10u32))
        }
    }

    fn client(signer: Option<Arc<dyn Signer>>) -> ReqwestRest<TestEndpoint> {
        let config = RestClientConfig::new(
            "https://api.example.com".to_string(),
            "example".to_string(),
        );
        let mut builder = RestClientBuilder::new(config);
        if let Some(signer) = signer {
            builder = builder.with_signer(signer);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_unauthenticated_request_keeps_query() {
        let rest = client(None);
        let request = rest
            .build_request(
                Method::GET,
                "/v1/instruments",
                &[("type", "PERP")],
                &[],
                false,
                0,
            )
            .unwrap();

        assert_eq!(request.url().as_str(), "https://api.example.com/v1/instruments?type=PERP");
        assert!(request.headers().get("API-Signature").is_none());
    }

    #[test]
    fn test_authenticated_request_without_signer_fails() {
        let rest = client(None);
        let result = rest.build_request(Method::GET, "/v1/orders", &[], &[], true, 0);
        assert!(matches!(result, Err(ExchangeError::AuthError(_))));
    }

    #[test]
    fn test_signed_request_carries_nonce_headers() {
        let nonce = Arc::new(Nonce::new());
        let signer = NonceHmacSigner::new("key".to_string(), "secret", nonce.clone())
            .with_seed_policy(SeedPolicy::Value(100));
        let rest = client(Some(Arc::new(signer)));

        let body = br#"{"size":"1"}"#;
        let request = rest
            .build_request(Method::POST, "/v1/orders", &[], body, true, 0)
            .unwrap();

        let headers = request.headers();
        assert_eq!(headers.get("API-Key").unwrap(), "key");
        assert_eq!(headers.get("API-Nonce").unwrap(), "100");
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
        assert!(headers.get("API-Signature").is_some());
        assert_eq!(nonce.peek(), 101);
    }

    #[test]
    fn test_builder_creates_limiter_for_every_class() {
        let rest = client(None);
        assert!(rest.limiter().validate().is_ok());
    }
}
