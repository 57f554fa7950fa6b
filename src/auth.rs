use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;

use crate::interceptor::{ErrorFlow, Interceptor, RequestFlow, ResponseFlow};
use crate::request::RequestDescriptor;
use crate::transport::{FailureKind, RawResponse, TransportFailure};
use crate::TokenStore;

/// Attaches the stored bearer token and drops it when the server answers 401.
pub struct AuthInterceptor {
    store: Arc<dyn TokenStore>,
}

impl fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInterceptor")
            .field("store", &"<token store>")
            .finish()
    }
}

impl AuthInterceptor {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    fn invalidate(&self, request: &RequestDescriptor) {
        tracing::debug!(url = %request.url, "received 401, clearing stored token");
        self.store.clear_token();
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn on_request(&self, mut request: RequestDescriptor) -> RequestFlow {
        if request.options.skip_auth {
            return RequestFlow::Continue(request);
        }
        let Some(token) = self.store.token().filter(|token| !token.trim().is_empty()) else {
            return RequestFlow::Continue(request);
        };

        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers.insert(AUTHORIZATION, value);
                RequestFlow::Continue(request)
            }
            Err(_) => RequestFlow::Reject(TransportFailure::new(
                FailureKind::Unknown,
                "stored access token is not a valid header value",
            )),
        }
    }

    async fn on_response(&self, request: &RequestDescriptor, response: RawResponse) -> ResponseFlow {
        if response.status == StatusCode::UNAUTHORIZED {
            self.invalidate(request);
        }
        ResponseFlow::Continue(response)
    }

    async fn on_error(&self, request: &RequestDescriptor, failure: TransportFailure) -> ErrorFlow {
        if failure.status() == Some(StatusCode::UNAUTHORIZED.as_u16()) {
            self.invalidate(request);
        }
        ErrorFlow::Continue(failure)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::header::AUTHORIZATION;
    use reqwest::{Method, StatusCode};

    use super::AuthInterceptor;
    use crate::interceptor::{Interceptor, RequestFlow};
    use crate::request::RequestDescriptor;
    use crate::transport::{RawResponse, TransportFailure};
    use crate::{MemoryTokenStore, Token, TokenStore};

    async fn attach(store: Arc<MemoryTokenStore>, request: RequestDescriptor) -> RequestDescriptor {
        match AuthInterceptor::new(store).on_request(request).await {
            RequestFlow::Continue(request) => request,
            other => panic!("expected continue, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn header_is_prefix_plus_stored_token_verbatim() {
        let store = Arc::new(MemoryTokenStore::with_token(Token::new("Bearer xyz")));
        let request = attach(store, RequestDescriptor::new(Method::GET, "/me")).await;
        assert_eq!(request.headers[AUTHORIZATION], "Bearer Bearer xyz");
    }

    #[tokio::test]
    async fn attaches_bearer_header_when_token_present() {
        let store = Arc::new(MemoryTokenStore::with_token(Token::new("abc123")));
        let request = attach(store, RequestDescriptor::new(Method::GET, "/me")).await;
        assert_eq!(request.headers[AUTHORIZATION], "Bearer abc123");
    }

    #[tokio::test]
    async fn no_header_without_token_or_with_blank_token() {
        let store = Arc::new(MemoryTokenStore::new());
        let request = attach(store.clone(), RequestDescriptor::new(Method::GET, "/me")).await;
        assert!(request.headers.get(AUTHORIZATION).is_none());

        store.set_token("   ".to_owned());
        let request = attach(store, RequestDescriptor::new(Method::GET, "/me")).await;
        assert!(request.headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn skip_auth_leaves_headers_untouched() {
        let store = Arc::new(MemoryTokenStore::with_token(Token::new("abc123")));
        let mut request = RequestDescriptor::new(Method::POST, "/login");
        request.options.skip_auth = true;
        let request = attach(store, request).await;
        assert!(request.headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn unauthorized_failure_clears_token() {
        let store = Arc::new(MemoryTokenStore::with_token(Token::new("abc123")));
        let auth = AuthInterceptor::new(store.clone());
        let request = RequestDescriptor::new(Method::GET, "/me");

        let forbidden = TransportFailure::bad_response(RawResponse::new(StatusCode::FORBIDDEN, ""));
        auth.on_error(&request, forbidden).await;
        assert!(store.token().is_some());

        let unauthorized =
            TransportFailure::bad_response(RawResponse::new(StatusCode::UNAUTHORIZED, ""));
        auth.on_error(&request, unauthorized).await;
        assert!(store.token().is_none());
    }
}
