use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, COOKIE, SET_COOKIE};
use reqwest::Method;

use crate::interceptor::{ErrorFlow, Interceptor, RequestFlow, ResponseFlow};
use crate::request::{RequestBody, RequestDescriptor};
use crate::transport::{RawResponse, TransportFailure};

const MAX_LOGGED_BODY: usize = 2_048;

/// Emits `tracing` events for every request, response and error.
///
/// Purely observational: values pass through unchanged. When disabled,
/// every hook is a no-op.
#[derive(Clone, Copy, Debug)]
pub struct LoggingInterceptor {
    enabled: bool,
}

impl LoggingInterceptor {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }


    /// Logs a call a request stage answered without sending.
    pub(crate) fn resolved_early(&self, method: &Method, url: &str, response: &RawResponse) {
        if self.enabled {
            tracing::debug!(
                method = %method,
                url = %url,
                status = response.status.as_u16(),
                "http request resolved before send"
            );
        }
    }

    /// Logs a call a request stage refused to send.
    pub(crate) fn rejected_early(&self, method: &Method, url: &str, failure: &TransportFailure) {
        if self.enabled {
            tracing::warn!(
                method = %method,
                url = %url,
                kind = ?failure.kind,
                message = %failure.message,
                "http request rejected before send"
            );
        }
    }

    /// Logs a call cancelled while waiting to retry.
    pub(crate) fn cancelled_in_backoff(&self, request: &RequestDescriptor) {
        if self.enabled {
            tracing::warn!(
                method = %request.method,
                url = %request.url,
                attempt = request.attempt,
                "http request cancelled during retry backoff"
            );
        }
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn on_request(&self, request: RequestDescriptor) -> RequestFlow {
        if self.enabled {
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                headers = ?redact(&request.headers),
                query = ?request.query,
                body = %describe_body(&request.body),
                attempt = request.attempt,
                "http request"
            );
        }
        RequestFlow::Continue(request)
    }

    async fn on_response(&self, request: &RequestDescriptor, response: RawResponse) -> ResponseFlow {
        if self.enabled {
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                status = response.status.as_u16(),
                headers = ?redact(&response.headers),
                body = %truncate(&response.text()),
                "http response"
            );
        }
        ResponseFlow::Continue(response)
    }

    async fn on_error(&self, request: &RequestDescriptor, failure: TransportFailure) -> ErrorFlow {
        if self.enabled {
            let body = failure
                .response
                .as_ref()
                .map(|response| truncate(&response.text()))
                .unwrap_or_default();
            tracing::warn!(
                method = %request.method,
                url = %request.url,
                status = ?failure.status(),
                kind = ?failure.kind,
                message = %failure.message,
                body = %body,
                "http error"
            );
        }
        ErrorFlow::Continue(failure)
    }
}

fn redact(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if name == AUTHORIZATION || name == COOKIE || name == SET_COOKIE {
                "<redacted>".to_owned()
            } else {
                value.to_str().unwrap_or("<binary>").to_owned()
            };
            (name.as_str().to_owned(), shown)
        })
        .collect()
}

fn describe_body(body: &RequestBody) -> String {
    match body {
        RequestBody::Empty => String::new(),
        RequestBody::Json(value) => truncate(&value.to_string()),
        RequestBody::Bytes {
            content_type,
            bytes,
        } => format!("<{} bytes of {content_type}>", bytes.len()),
        RequestBody::Multipart(form) => format!(
            "<multipart: {} fields, {} files, {} bytes>",
            form.fields.len(),
            form.files.len(),
            form.file_bytes()
        ),
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_LOGGED_BODY {
        return text.to_owned();
    }
    let mut end = MAX_LOGGED_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &text[..end], text.len())
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
    use reqwest::{Method, StatusCode};

    use super::{redact, truncate, LoggingInterceptor};
    use crate::interceptor::{Interceptor, RequestFlow, ResponseFlow};
    use crate::request::RequestDescriptor;
    use crate::transport::RawResponse;

    #[test]
    fn authorization_is_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let shown = redact(&headers);
        assert!(shown.iter().all(|(_, value)| !value.contains("secret")));
        assert!(shown.iter().any(|(_, value)| value == "application/json"));
    }

    #[test]
    fn long_bodies_are_truncated_on_char_boundary() {
        let text = "é".repeat(3_000);
        let out = truncate(&text);
        assert!(out.ends_with("(6000 bytes)"));
    }

    #[tokio::test]
    async fn values_pass_through_unchanged() {
        let logging = LoggingInterceptor::new(true);
        let mut request = RequestDescriptor::new(Method::GET, "/users");
        request.attempt = 2;

        let RequestFlow::Continue(request) = logging.on_request(request).await else {
            panic!("logging must not short-circuit");
        };
        assert_eq!(request.attempt, 2);

        let response = RawResponse::new(StatusCode::OK, "{}");
        let ResponseFlow::Continue(response) = logging.on_response(&request, response).await else {
            panic!("logging must not reject");
        };
        assert_eq!(response.text(), "{}");
    }
}
