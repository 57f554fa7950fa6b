//! `api-pipeline` is an async HTTP client that runs every call through an
//! interceptor pipeline:
//! - bearer-token injection from a shared [`TokenStore`], cleared on 401
//! - retry with exponential backoff and jitter ([`RetryPolicy`])
//! - normalization of every failure into one [`ApiError`]
//! - request/response/error logging via `tracing`
//!
//! Entry points are the verb methods on [`ApiClient`]:
//! [`ApiClient::get`], [`ApiClient::post`], [`ApiClient::put`],
//! [`ApiClient::patch`], [`ApiClient::delete`], [`ApiClient::upload`] and
//! [`ApiClient::download`].

mod auth;
mod client;
mod envelope;
mod error;
pub mod interceptor;
mod logging;
mod normalize;
mod options;
mod request;
mod retry;
mod token;
pub mod transport;

pub use auth::AuthInterceptor;
pub use client::{resolve_url, ApiClient, ApiClientBuilder};
pub use envelope::{ApiResponse, DownloadedFile};
pub use error::{ApiError, NetworkErrorKind};
pub use interceptor::{ErrorFlow, Interceptor, InterceptorChain, RequestFlow, ResponseFlow};
pub use logging::LoggingInterceptor;
pub use normalize::{extract_message, normalize};
pub use options::ClientOptions;
pub use request::{
    Call, FilePart, MultipartBody, ProgressCallback, RequestBody, RequestDescriptor,
    RequestOptions, ResponseTarget,
};
pub use retry::RetryPolicy;
pub use token::{MemoryTokenStore, Token, TokenStore};
pub use transport::{FailureKind, RawResponse, ReqwestTransport, Transport, TransportFailure};

pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, ApiError>;
