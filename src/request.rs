use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{ApiError, Result};

/// Progress callback receiving `(transferred, total)` in bytes.
///
/// `total` is `None` when the size is unknown.
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Request payload. Kept in owned, cloneable form so every retry resends
/// the same bytes.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Bytes {
        content_type: String,
        bytes: Bytes,
    },
    Multipart(MultipartBody),
}

impl RequestBody {
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|err| ApiError::unknown(format!("failed to encode request body: {err}")))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// One file inside a multipart upload.
#[derive(Clone, Debug, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Multipart form body for uploads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultipartBody {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        self.files.push(FilePart {
            field: field.into(),
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
        });
        self
    }

    /// Sets the content type of the most recently added file.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        if let Some(part) = self.files.last_mut() {
            part.content_type = Some(content_type.into());
        }
        self
    }

    /// Total bytes of all file parts.
    pub fn file_bytes(&self) -> u64 {
        self.files.iter().map(|part| part.bytes.len() as u64).sum()
    }
}

/// Where the response body goes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ResponseTarget {
    #[default]
    Memory,
    /// Stream the body to this file.
    File(PathBuf),
}

/// Per-request overrides.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Overrides the send and receive timeouts for this request.
    pub timeout: Option<Duration>,
    /// Overrides the retry policy's attempt cap.
    pub max_attempts: Option<u32>,
    /// Do not attach the bearer token.
    pub skip_auth: bool,
    pub cancel: Option<CancellationToken>,
    /// Upload or download progress.
    pub progress: Option<ProgressCallback>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("skip_auth", &self.skip_auth)
            .field("cancel", &self.cancel.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// A single outbound call, created fresh per call and carried across
/// retries.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    /// Absolute URL, resolved from `path` against the client's base URL.
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub options: RequestOptions,
    /// Retries already made for this call. Starts at 0.
    pub attempt: u32,
    pub target: ResponseTarget,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            url: path.clone(),
            path,
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            options: RequestOptions::default(),
            attempt: 0,
            target: ResponseTarget::Memory,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Caller-side description of a call: query, headers, body and overrides.
///
/// ```
/// use api_pipeline::Call;
///
/// let call = Call::new().query("page", "2").header("x-trace", "abc");
/// ```
#[derive(Clone, Debug, Default)]
pub struct Call {
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: RequestBody,
    pub(crate) options: RequestOptions,
}

impl Call {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// JSON body from a serializable value.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = RequestBody::json(body)?;
        Ok(self)
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.options.max_attempts = Some(max_attempts);
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.options.skip_auth = true;
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.options.cancel = Some(token);
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.options.progress = Some(Arc::new(callback));
        self
    }

    pub(crate) fn into_descriptor(self, method: Method, path: &str) -> Result<RequestDescriptor> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| ApiError::validation(format!("invalid header name '{name}': {err}")))?;
            let header_value = HeaderValue::from_str(&value).map_err(|err| {
                ApiError::validation(format!("invalid value for header '{name}': {err}"))
            })?;
            headers.append(header_name, header_value);
        }

        Ok(RequestDescriptor {
            query: self.query,
            headers,
            body: self.body,
            options: self.options,
            ..RequestDescriptor::new(method, path)
        })
    }
}
