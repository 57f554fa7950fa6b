use std::fmt;
use std::sync::RwLock;

/// Access token with an optional refresh token.
///
/// Expiry and refresh are the caller's concern; the pipeline only reads the
/// access token and clears it on 401.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl Token {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Process-wide token storage read on every outgoing request.
///
/// Implementations backed by secure device storage plug in here; the
/// pipeline assumes no transactional guarantees.
pub trait TokenStore: Send + Sync {
    /// Current access token, if any.
    fn token(&self) -> Option<String>;

    /// Current refresh token, if any.
    fn refresh_token(&self) -> Option<String>;

    /// Replaces both tokens.
    fn set(&self, token: Token);

    /// Replaces the access token and keeps the refresh token.
    fn set_token(&self, access_token: String);

    /// Removes both tokens.
    fn clear_token(&self);
}

/// In-memory [`TokenStore`].
#[derive(Default)]
pub struct MemoryTokenStore {
    inner: RwLock<Option<Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: Token) -> Self {
        Self {
            inner: RwLock::new(Some(token)),
        }
    }
}

impl fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTokenStore")
            .field("has_token", &self.token().is_some())
            .finish()
    }
}

// A poisoned lock only means a writer panicked mid-assignment of an Option;
// the stored value is still a valid token or none.
impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<String> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|token| token.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().and_then(|token| token.refresh_token.clone())
    }

    fn set(&self, token: Token) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token);
    }

    fn set_token(&self, access_token: String) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let refresh_token = guard.take().and_then(|token| token.refresh_token);
        *guard = Some(Token {
            access_token,
            refresh_token,
        });
    }

    fn clear_token(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}
