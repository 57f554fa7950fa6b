use std::fmt;
use std::path::Path;
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthInterceptor;
use crate::envelope::{decode_envelope, serde_decode, DownloadedFile};
use crate::interceptor::{Interceptor, InterceptorChain, RequestFlow};
use crate::logging::LoggingInterceptor;
use crate::normalize::normalize;
use crate::request::{Call, MultipartBody, RequestBody, RequestDescriptor, ResponseTarget};
use crate::transport::{partial_path, RawResponse, ReqwestTransport, Transport, TransportFailure};
use crate::{ApiError, ApiResponse, ClientOptions, MemoryTokenStore, Result, TokenStore};

/// Joins a request path onto the base URL. Absolute URLs pass through.
pub fn resolve_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if base.is_empty() {
        format!("/{path}")
    } else if path.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{path}")
    }
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    options: ClientOptions,
    transport: Option<Arc<dyn Transport>>,
    token_store: Option<Arc<dyn TokenStore>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ApiClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            options: ClientOptions::default(),
            transport: None,
            token_store: None,
            interceptors: Vec::new(),
        }
    }

    /// Applies client options such as timeouts, retry and logging.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shares a token store; defaults to an empty [`MemoryTokenStore`].
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Adds a stage after authentication and before logging.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.options)?),
        };
        let token_store: Arc<dyn TokenStore> = match self.token_store {
            Some(store) => store,
            None => Arc::new(MemoryTokenStore::new()),
        };

        let mut chain = InterceptorChain::new();
        chain.push(Arc::new(AuthInterceptor::new(Arc::clone(&token_store))));
        for interceptor in self.interceptors {
            chain.push(interceptor);
        }
        let logging = LoggingInterceptor::new(self.options.debug_logging);
        if self.options.debug_logging {
            chain.push(Arc::new(logging));
        }

        Ok(ApiClient {
            base_url: self.base_url,
            transport,
            token_store,
            chain,
            logging,
            options: self.options,
        })
    }
}

/// HTTP client running every call through the interceptor pipeline.
///
/// Each call returns either a populated [`ApiResponse`] or an [`ApiError`];
/// raw transport failures never escape.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    token_store: Arc<dyn TokenStore>,
    chain: InterceptorChain,
    logging: LoggingInterceptor,
    options: ClientOptions,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("stages", &self.chain.len())
            .field("token", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl ApiClient {
    /// Creates a client with default options and an empty token store.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::builder(base_url).build()
    }

    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `API_BASE_URL`: base URL every path is joined onto (required)
    /// - `API_TOKEN`: initial access token (optional)
    /// - `API_TIMEOUT_MS`, `API_MAX_RETRIES`, `API_DEBUG_LOGGING`: see
    ///   [`ClientOptions::apply_env`]
    ///
    /// # Example
    ///
    /// ```no_run
    /// use api_pipeline::ApiClient;
    ///
    /// let api = ApiClient::from_env().expect("missing API_* env vars");
    /// ```
    pub fn from_env() -> std::result::Result<Self, String> {
        let base_url = std::env::var("API_BASE_URL")
            .map_err(|_| "missing API_BASE_URL environment variable".to_owned())?;
        if base_url.trim().is_empty() {
            return Err("API_BASE_URL is set but empty".to_owned());
        }
        let options = ClientOptions::default().apply_env()?;

        let store = MemoryTokenStore::new();
        if let Ok(token) = std::env::var("API_TOKEN") {
            if !token.trim().is_empty() {
                store.set_token(token);
            }
        }

        Self::builder(base_url)
            .options(options)
            .token_store(Arc::new(store))
            .build()
            .map_err(|err| err.to_string())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The store consulted before every send.
    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.token_store
    }

    /// Sends a GET and decodes the body into `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, call: Call) -> Result<ApiResponse<T>> {
        self.request_with(Method::GET, path, call, serde_decode).await
    }

    pub async fn get_with<T, F>(&self, path: &str, call: Call, decode: F) -> Result<ApiResponse<T>>
    where
        F: FnOnce(Value) -> Result<T>,
    {
        self.request_with(Method::GET, path, call, decode).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, call: Call) -> Result<ApiResponse<T>> {
        self.request_with(Method::POST, path, call, serde_decode).await
    }

    pub async fn post_with<T, F>(&self, path: &str, call: Call, decode: F) -> Result<ApiResponse<T>>
    where
        F: FnOnce(Value) -> Result<T>,
    {
        self.request_with(Method::POST, path, call, decode).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, call: Call) -> Result<ApiResponse<T>> {
        self.request_with(Method::PUT, path, call, serde_decode).await
    }

    pub async fn put_with<T, F>(&self, path: &str, call: Call, decode: F) -> Result<ApiResponse<T>>
    where
        F: FnOnce(Value) -> Result<T>,
    {
        self.request_with(Method::PUT, path, call, decode).await
    }

    pub async fn patch<T: DeserializeOwned>(&self, path: &str, call: Call) -> Result<ApiResponse<T>> {
        self.request_with(Method::PATCH, path, call, serde_decode).await
    }

    pub async fn patch_with<T, F>(&self, path: &str, call: Call, decode: F) -> Result<ApiResponse<T>>
    where
        F: FnOnce(Value) -> Result<T>,
    {
        self.request_with(Method::PATCH, path, call, decode).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str, call: Call) -> Result<ApiResponse<T>> {
        self.request_with(Method::DELETE, path, call, serde_decode).await
    }

    pub async fn delete_with<T, F>(&self, path: &str, call: Call, decode: F) -> Result<ApiResponse<T>>
    where
        F: FnOnce(Value) -> Result<T>,
    {
        self.request_with(Method::DELETE, path, call, decode).await
    }

    /// Posts a multipart form. Progress set on `call` reports bytes of file
    /// parts sent so far.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        body: MultipartBody,
        call: Call,
    ) -> Result<ApiResponse<T>> {
        let call = call.body(RequestBody::Multipart(body));
        self.request_with(Method::POST, path, call, serde_decode).await
    }

    /// Streams a GET response body into `destination`. Progress set on
    /// `call` reports bytes received and the content length.
    ///
    /// The body lands in `<destination>.part` first; on failure it is
    /// removed and any existing file at `destination` is left alone.
    pub async fn download(
        &self,
        path: &str,
        destination: impl AsRef<Path>,
        call: Call,
    ) -> Result<ApiResponse<DownloadedFile>> {
        let destination = destination.as_ref().to_path_buf();
        let mut request = call.into_descriptor(Method::GET, path)?;
        request.target = ResponseTarget::File(destination.clone());

        let response = match self.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                // A cancelled transfer never reaches the transport's cleanup.
                let _ = tokio::fs::remove_file(partial_path(&destination)).await;
                return Err(err);
            }
        };
        let bytes = tokio::fs::metadata(&destination)
            .await
            .map(|meta| meta.len())
            .map_err(|err| {
                ApiError::unknown(format!("cannot stat '{}': {err}", destination.display()))
            })?;

        Ok(ApiResponse::ok(
            DownloadedFile {
                path: destination,
                bytes,
            },
            Some(response.status.as_u16()),
        ))
    }

    /// Sends any method and decodes the response with `decode`.
    pub async fn request_with<T, F>(
        &self,
        method: Method,
        path: &str,
        call: Call,
        decode: F,
    ) -> Result<ApiResponse<T>>
    where
        F: FnOnce(Value) -> Result<T>,
    {
        let request = call.into_descriptor(method, path)?;
        let response = self.execute(request).await?;
        decode_envelope(&response, decode)
    }

    /// Runs one call through the pipeline, retrying per policy.
    ///
    /// The descriptor's attempt counter is incremented before every resend;
    /// once the cap is reached the last failure is normalized and returned.
    pub async fn execute(&self, mut request: RequestDescriptor) -> Result<RawResponse> {
        request.url = resolve_url(&self.base_url, &request.path);
        let cancel = request
            .options
            .cancel
            .clone()
            .unwrap_or_else(CancellationToken::new);
        let policy = &self.options.retry;

        loop {
            let failure = match self.send_once(request.clone(), &cancel).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            if !policy.should_retry(&request, &failure) {
                return Err(normalize(failure));
            }

            request.attempt += 1;
            let delay = policy.delay_for(request.attempt, &failure);
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                attempt = request.attempt,
                kind = ?failure.kind,
                status = ?failure.status(),
                "retrying request after {} ms",
                delay.as_millis()
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.logging.cancelled_in_backoff(&request);
                    return Err(ApiError::cancelled());
                }
                _ = sleep(delay) => {}
            }
        }
    }

    async fn send_once(
        &self,
        request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> std::result::Result<RawResponse, TransportFailure> {
        let (method, url) = (request.method.clone(), request.url.clone());
        let request = match self.chain.run_request(request).await {
            RequestFlow::Continue(request) => request,
            RequestFlow::Resolve(response) => {
                self.logging.resolved_early(&method, &url, &response);
                return Ok(response);
            }
            RequestFlow::Reject(failure) => {
                self.logging.rejected_early(&method, &url, &failure);
                return Err(failure);
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportFailure::cancelled()),
            result = self.transport.send(&request) => result,
        };

        self.chain.run_outcome(&request, outcome).await
    }
}
