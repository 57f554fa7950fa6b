use std::fmt;

/// Category of a [`ApiError::Network`] failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NetworkErrorKind {
    /// Connect, send or receive timeout.
    Timeout,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 403.
    Forbidden,
    /// HTTP 404.
    NotFound,
    /// HTTP 5xx.
    ServerError,
    /// Connection-level failure, no response was received.
    NoConnection,
    /// TLS certificate rejected.
    BadCertificate,
    /// Request cancelled by the caller.
    Cancelled,
    /// Any other 4xx status.
    Generic,
}

impl NetworkErrorKind {
    /// Machine-readable code carried by errors of this kind.
    pub fn code(self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::ServerError => "SERVER_ERROR",
            Self::NoConnection => "NO_CONNECTION",
            Self::BadCertificate => "BAD_CERTIFICATE",
            Self::Cancelled => "REQUEST_CANCELLED",
            Self::Generic => "CLIENT_ERROR",
        }
    }

    /// Human-readable message used when the server supplied none.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Timeout => "Connection timed out. Please try again.",
            Self::Unauthorized => "Session expired. Please sign in again.",
            Self::Forbidden => "You do not have permission to perform this action.",
            Self::NotFound => "The requested resource was not found.",
            Self::ServerError => "Server error occurred. Please try again later.",
            Self::NoConnection => "No internet connection. Please check your network.",
            Self::BadCertificate => "Certificate error. The connection is not secure.",
            Self::Cancelled => "Request was cancelled",
            Self::Generic => "Client error occurred",
        }
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error type returned by this crate.
///
/// Every transport failure is converted into exactly one of these variants
/// before it reaches the caller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Transport or protocol failure.
    #[error("network error [{code}]: {message}")]
    Network {
        kind: NetworkErrorKind,
        /// Machine-readable code, see [`NetworkErrorKind::code`].
        code: String,
        /// Message suitable for display.
        message: String,
        /// HTTP status when a response was received.
        status_code: Option<u16>,
    },
    /// The server rejected client-supplied data (HTTP 400).
    #[error("validation error: {message}")]
    Validation { message: String },
    /// Anything that could not be classified.
    #[error("unknown error: {message}")]
    Unknown { message: String },
}

impl ApiError {
    /// Builds a network error with the kind's default message.
    pub fn network(kind: NetworkErrorKind, status_code: Option<u16>) -> Self {
        Self::network_with_message(kind, kind.default_message(), status_code)
    }

    pub fn network_with_message(
        kind: NetworkErrorKind,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Network {
            kind,
            code: kind.code().to_owned(),
            message: message.into(),
            status_code,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::network(NetworkErrorKind::Cancelled, None)
    }

    /// Message suitable for display.
    pub fn message(&self) -> &str {
        match self {
            Self::Network { message, .. }
            | Self::Validation { message }
            | Self::Unknown { message } => message,
        }
    }

    /// Machine-readable code, `None` for non-network errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Network { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Network { status_code, .. } => *status_code,
            Self::Validation { .. } => Some(400),
            Self::Unknown { .. } => None,
        }
    }

    pub fn network_kind(&self) -> Option<NetworkErrorKind> {
        match self {
            Self::Network { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True when the caller should send the user back to sign-in.
    pub fn is_unauthorized(&self) -> bool {
        self.network_kind() == Some(NetworkErrorKind::Unauthorized)
    }

    pub fn is_cancelled(&self) -> bool {
        self.network_kind() == Some(NetworkErrorKind::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiError, NetworkErrorKind};

    #[test]
    fn network_error_carries_kind_code() {
        let err = ApiError::network(NetworkErrorKind::Forbidden, Some(403));
        assert_eq!(err.code(), Some("FORBIDDEN"));
        assert_eq!(err.status_code(), Some(403));
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn cancelled_uses_request_cancelled_code() {
        let err = ApiError::cancelled();
        assert!(err.is_cancelled());
        assert_eq!(err.code(), Some("REQUEST_CANCELLED"));
        assert_eq!(err.message(), "Request was cancelled");
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = ApiError::network_with_message(NetworkErrorKind::Generic, "teapot", Some(418));
        assert_eq!(err.to_string(), "network error [CLIENT_ERROR]: teapot");
        assert_eq!(
            ApiError::validation("bad email").to_string(),
            "validation error: bad email"
        );
    }
}
