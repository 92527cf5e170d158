//! # HTTP Retrieval Utilities
//!
//! This module provides a robust, asynchronous API client wrapper around `reqwest`.
//! It includes middleware support for exponential backoff retries, a hard
//! per-request timeout and standardized JSON response handling.

use std::time::Duration;

use reqwest::{header::{HeaderMap, AUTHORIZATION}, Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors raised while building or executing a request.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// The base URL could not be parsed or a path could not be joined onto it.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The underlying `reqwest` client could not be constructed.
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),

    /// The request failed at the transport level (after retries).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest_middleware::Error),

    /// The response body could not be read or decoded.
    #[error("failed to decode response body: {0}")]
    Body(#[from] reqwest::Error),

    /// The request body could not be serialized.
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A standardized container for API responses.
///
/// This struct wraps the deserialized data along with metadata about the
/// HTTP transaction, such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// Knobs for [`ApiClient::with_options`].
#[derive(Debug, Clone)]
pub struct ApiClientOptions {
    /// Hard timeout applied to every single HTTP attempt.
    pub timeout: Duration,
    /// How many times a transient failure is retried.
    pub max_retries: u32,
    /// Optional `User-Agent` header.
    pub user_agent: Option<String>,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            user_agent: None,
        }
    }
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles base URLs,
/// authentication tokens, and automatic retries.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient` with the default options (10s timeout, 3 retries).
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL for the API (e.g., "https://api.example.com/v1/").
    /// * `auth_token` - An optional string for the Authorization header.
    ///
    /// # Errors
    /// Returns [`RetrieveError::Url`] if the `base_url` is not a valid absolute URL.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, RetrieveError> {
        Self::with_options(base_url, auth_token, ApiClientOptions::default())
    }

    /// Creates a new `ApiClient` with explicit timeout and retry settings.
    pub fn with_options(
        base_url: &str,
        auth_token: Option<String>,
        options: ApiClientOptions,
    ) -> Result<Self, RetrieveError> {
        // Parse the base URL to ensure it is valid and absolute
        let url = Url::parse(base_url)?;

        // Configure an exponential backoff policy
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);

        let mut builder = reqwest::Client::builder().timeout(options.timeout);
        if let Some(agent) = &options.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        let http = builder.build().map_err(RetrieveError::Build)?;

        // Construct the client with the retry middleware
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token,
        })
    }

    /// The base URL every relative path is joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a generic HTTP request and handles the response.
    ///
    /// This method manages URL joining, header injection, authentication,
    /// and JSON serialization/deserialization. Non-2xx responses are not
    /// errors: they come back with `success == false` and the raw body.
    ///
    /// # Arguments
    /// * `method` - The HTTP verb (GET, POST, etc.).
    /// * `path` - The relative path to append to the base URL.
    /// * `headers` - Optional additional headers for this specific request.
    /// * `body` - Optional serializable object to send as the JSON body.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> Result<ApiResponse<T>, RetrieveError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        // 1. Construct the full absolute URL
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        // 2. Add Custom Headers if provided
        if let Some(h) = headers {
            req = req.headers(h);
        }

        // 3. Inject Bearer Authentication if a token is present
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        // 4. Serialize and attach the JSON body if present
        if let Some(b) = body {
            use reqwest::header::CONTENT_TYPE;
            let json_body = serde_json::to_string(&b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        // 5. Execute the request and capture response metadata
        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        // 6. Handle the result based on success status
        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            // Capture the error body as a string for debugging
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    /// Performs a GET and returns the raw body text, for sources that serve HTML.
    pub async fn get_text(
        &self,
        path: &str,
        headers: Option<HeaderMap>,
    ) -> Result<ApiResponse<String>, RetrieveError> {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(Method::GET, full_url);
        if let Some(h) = headers {
            req = req.headers(h);
        }

        let response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let text = response.text().await?;

        let success = status.is_success();
        Ok(ApiResponse {
            data: success.then(|| text.clone()),
            error_body: (!success).then_some(text),
            status: status.as_u16(),
            success,
            headers: resp_headers,
        })
    }
}
