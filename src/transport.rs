use std::error::Error as _;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::header::{self, HeaderMap};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use crate::request::{MultipartBody, ProgressCallback, RequestBody, RequestDescriptor, ResponseTarget};
use crate::{ApiError, ClientOptions, Result};

const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// Failure tag attached to every raw transport failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FailureKind {
    ConnectTimeout,
    SendTimeout,
    ReceiveTimeout,
    /// A response arrived with a non-success status.
    BadResponse,
    Cancelled,
    /// Connection-level failure, no response.
    ConnectionError,
    BadCertificate,
    Unknown,
}

impl FailureKind {
    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout | Self::SendTimeout | Self::ReceiveTimeout
        )
    }
}

/// Response as received from the wire.
#[derive(Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Empty for responses streamed to a file.
    pub body: Bytes,
    pub url: String,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            url: String::new(),
        }
    }

    /// Parses the body as JSON.
    ///
    /// An empty body is `null` and a non-JSON body becomes a JSON string.
    pub fn json(&self) -> serde_json::Value {
        if self.body.is_empty() {
            return serde_json::Value::Null;
        }
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| serde_json::Value::String(self.text()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("url", &self.url)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Raw failure from one transport send. Never leaves the pipeline without
/// being normalized into an [`ApiError`].
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Present for [`FailureKind::BadResponse`].
    pub response: Option<RawResponse>,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            response: None,
        }
    }

    pub fn bad_response(response: RawResponse) -> Self {
        Self {
            kind: FailureKind::BadResponse,
            message: format!("request failed with status {}", response.status.as_u16()),
            response: Some(response),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "request was cancelled")
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|response| response.status.as_u16())
    }
}

/// Sends one request attempt. The pipeline calls this exactly once per
/// attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &RequestDescriptor,
    ) -> std::result::Result<RawResponse, TransportFailure>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Send,
    Receive,
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    send_timeout: Duration,
    receive_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(options.connect_timeout_ms))
            .default_headers(options.default_headers.clone())
            .build()
            .map_err(|err| ApiError::unknown(format!("failed to build HTTP client: {err}")))?;
        Ok(Self::with_client(http, options))
    }

    /// Wraps an existing `reqwest::Client`; its own timeouts still apply.
    pub fn with_client(http: reqwest::Client, options: &ClientOptions) -> Self {
        Self {
            http,
            send_timeout: Duration::from_millis(options.send_timeout_ms),
            receive_timeout: Duration::from_millis(options.receive_timeout_ms),
        }
    }

    fn build_request(
        &self,
        request: &RequestDescriptor,
    ) -> std::result::Result<reqwest::RequestBuilder, TransportFailure> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Bytes {
                content_type,
                bytes,
            } => builder
                .header(header::CONTENT_TYPE, content_type.as_str())
                .body(bytes.clone()),
            RequestBody::Multipart(body) => {
                builder.multipart(build_form(body, request.options.progress.clone())?)
            }
        };

        Ok(builder)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
    ) -> std::result::Result<RawResponse, TransportFailure> {
        let send_timeout = request.options.timeout.unwrap_or(self.send_timeout);
        let receive_timeout = request.options.timeout.unwrap_or(self.receive_timeout);

        let pending = self.build_request(request)?.send();
        let response = match timeout(send_timeout, pending).await {
            Ok(result) => result.map_err(|err| classify(&err, Phase::Send))?,
            Err(_) => {
                return Err(TransportFailure::new(
                    FailureKind::SendTimeout,
                    format!("no response within {} ms", send_timeout.as_millis()),
                ))
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().to_string();

        // Error bodies always stay in memory so they can be normalized.
        let body = match &request.target {
            ResponseTarget::File(path) if status.is_success() => {
                write_to_file(
                    response,
                    path,
                    request.options.progress.as_ref(),
                    receive_timeout,
                )
                .await?;
                Bytes::new()
            }
            _ => read_body(response, receive_timeout).await?,
        };

        let raw = RawResponse {
            status,
            headers,
            body,
            url,
        };

        if status.is_success() {
            Ok(raw)
        } else {
            Err(TransportFailure::bad_response(raw))
        }
    }
}

async fn read_body(
    response: reqwest::Response,
    receive_timeout: Duration,
) -> std::result::Result<Bytes, TransportFailure> {
    let mut stream = std::pin::pin!(response.bytes_stream());
    let mut body = BytesMut::new();
    while let Some(chunk) = next_chunk(&mut stream, receive_timeout).await? {
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Sibling file a download streams into before it is moved into place.
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Streams the body next to `path` and renames it over `path` once complete,
/// so a failed transfer never leaves a truncated file at the destination.
async fn write_to_file(
    response: reqwest::Response,
    path: &Path,
    progress: Option<&ProgressCallback>,
    receive_timeout: Duration,
) -> std::result::Result<u64, TransportFailure> {
    let partial = partial_path(path);
    let received = match stream_to_file(response, &partial, progress, receive_timeout).await {
        Ok(received) => received,
        Err(failure) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(failure);
        }
    };
    tokio::fs::rename(&partial, path).await.map_err(|err| {
        TransportFailure::new(
            FailureKind::Unknown,
            format!("cannot move download into '{}': {err}", path.display()),
        )
    })?;
    Ok(received)
}

async fn stream_to_file(
    response: reqwest::Response,
    path: &Path,
    progress: Option<&ProgressCallback>,
    receive_timeout: Duration,
) -> std::result::Result<u64, TransportFailure> {
    let total = response.content_length();
    let mut file = tokio::fs::File::create(path).await.map_err(|err| {
        TransportFailure::new(
            FailureKind::Unknown,
            format!("cannot create '{}': {err}", path.display()),
        )
    })?;

    let mut stream = std::pin::pin!(response.bytes_stream());
    let mut received = 0u64;
    while let Some(chunk) = next_chunk(&mut stream, receive_timeout).await? {
        file.write_all(&chunk).await.map_err(|err| {
            TransportFailure::new(
                FailureKind::Unknown,
                format!("cannot write '{}': {err}", path.display()),
            )
        })?;
        received += chunk.len() as u64;
        if let Some(progress) = progress {
            progress(received, total);
        }
    }

    file.flush().await.map_err(|err| {
        TransportFailure::new(
            FailureKind::Unknown,
            format!("cannot flush '{}': {err}", path.display()),
        )
    })?;
    Ok(received)
}

/// Next body chunk; the receive timeout bounds the gap between chunks.
async fn next_chunk<S>(
    stream: &mut S,
    receive_timeout: Duration,
) -> std::result::Result<Option<Bytes>, TransportFailure>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    match timeout(receive_timeout, stream.next()).await {
        Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
        Ok(Some(Err(err))) => Err(classify(&err, Phase::Receive)),
        Ok(None) => Ok(None),
        Err(_) => Err(TransportFailure::new(
            FailureKind::ReceiveTimeout,
            format!("no data within {} ms", receive_timeout.as_millis()),
        )),
    }
}

fn build_form(
    body: &MultipartBody,
    progress: Option<ProgressCallback>,
) -> std::result::Result<Form, TransportFailure> {
    let total = body.file_bytes();
    let sent = Arc::new(AtomicU64::new(0));
    let mut form = Form::new();

    for (name, value) in &body.fields {
        form = form.text(name.clone(), value.clone());
    }

    for file in &body.files {
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = (0..file.bytes.len())
            .step_by(UPLOAD_CHUNK_SIZE)
            .map(|start| {
                let end = (start + UPLOAD_CHUNK_SIZE).min(file.bytes.len());
                Ok(file.bytes.slice(start..end))
            })
            .collect();

        let progress = progress.clone();
        let sent = Arc::clone(&sent);
        let stream = futures::stream::iter(chunks).inspect(move |chunk| {
            if let (Ok(chunk), Some(progress)) = (chunk, progress.as_ref()) {
                let len = chunk.len() as u64;
                let so_far = sent.fetch_add(len, Ordering::SeqCst) + len;
                progress(so_far, Some(total));
            }
        });

        let mut part = Part::stream_with_length(
            reqwest::Body::wrap_stream(stream),
            file.bytes.len() as u64,
        )
        .file_name(file.file_name.clone());
        if let Some(content_type) = &file.content_type {
            part = part.mime_str(content_type).map_err(|err| {
                TransportFailure::new(
                    FailureKind::Unknown,
                    format!("invalid content type '{content_type}': {err}"),
                )
            })?;
        }
        form = form.part(file.field.clone(), part);
    }

    Ok(form)
}

fn classify(err: &reqwest::Error, phase: Phase) -> TransportFailure {
    let message = error_chain_message(err);
    let kind = if err.is_timeout() {
        if err.is_connect() {
            FailureKind::ConnectTimeout
        } else if phase == Phase::Send {
            FailureKind::SendTimeout
        } else {
            FailureKind::ReceiveTimeout
        }
    } else if message.to_ascii_lowercase().contains("certificate") {
        FailureKind::BadCertificate
    } else if err.is_connect() || err.is_request() || (err.is_body() && phase == Phase::Receive) {
        FailureKind::ConnectionError
    } else {
        FailureKind::Unknown
    };
    TransportFailure::new(kind, message)
}

fn error_chain_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
