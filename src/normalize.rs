//! Conversion of raw transport failures into [`ApiError`].

use serde_json::Value;

use crate::transport::{FailureKind, TransportFailure};
use crate::{ApiError, NetworkErrorKind};

const MESSAGE_KEYS: [&str; 5] = ["message", "error", "detail", "msg", "error_description"];

/// Maps a raw failure into exactly one typed error.
pub fn normalize(failure: TransportFailure) -> ApiError {
    match failure.kind {
        FailureKind::ConnectTimeout | FailureKind::SendTimeout | FailureKind::ReceiveTimeout => {
            ApiError::network(NetworkErrorKind::Timeout, None)
        }
        FailureKind::BadResponse => match failure.response {
            Some(response) => from_status(response.status.as_u16(), &response.json()),
            None => ApiError::unknown(failure.message),
        },
        FailureKind::Cancelled => ApiError::cancelled(),
        FailureKind::ConnectionError => ApiError::network(NetworkErrorKind::NoConnection, None),
        FailureKind::BadCertificate => ApiError::network(NetworkErrorKind::BadCertificate, None),
        FailureKind::Unknown => {
            if failure.message.trim().is_empty() {
                ApiError::unknown("unknown error")
            } else {
                ApiError::unknown(failure.message)
            }
        }
    }
}

fn from_status(status: u16, body: &Value) -> ApiError {
    let message = extract_message(body);
    match status {
        400 => ApiError::validation(message.unwrap_or_else(|| "Invalid request data".to_owned())),
        401 => ApiError::network(NetworkErrorKind::Unauthorized, Some(status)),
        403 => ApiError::network(NetworkErrorKind::Forbidden, Some(status)),
        404 => ApiError::network(NetworkErrorKind::NotFound, Some(status)),
        400..=499 => match message {
            Some(message) => {
                ApiError::network_with_message(NetworkErrorKind::Generic, message, Some(status))
            }
            None => ApiError::network(NetworkErrorKind::Generic, Some(status)),
        },
        500.. => ApiError::network(NetworkErrorKind::ServerError, Some(status)),
        _ => ApiError::unknown(
            message.unwrap_or_else(|| format!("unexpected response status {status}")),
        ),
    }
}

/// Pulls a human-readable message out of an error response body.
pub fn extract_message(body: &Value) -> Option<String> {
    match body {
        Value::Object(map) => {
            if let Some(message) = MESSAGE_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
            {
                return Some(message.to_owned());
            }
            match map.get("errors")? {
                Value::Object(errors) => match errors.values().next()? {
                    Value::Array(items) => items.first().map(value_to_string),
                    Value::String(text) => Some(text.clone()),
                    _ => None,
                },
                Value::Array(items) => items.first().map(|item| match item {
                    Value::Object(entry) => entry
                        .get("message")
                        .map(value_to_string)
                        .unwrap_or_else(|| item.to_string()),
                    other => value_to_string(other),
                }),
                _ => None,
            }
        }
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::json;

    use super::{extract_message, normalize};
    use crate::transport::{FailureKind, RawResponse, TransportFailure};
    use crate::{ApiError, NetworkErrorKind};

    fn status_failure(status: u16, body: serde_json::Value) -> TransportFailure {
        TransportFailure::bad_response(RawResponse::new(
            StatusCode::from_u16(status).expect("valid status"),
            body.to_string(),
        ))
    }

    #[test]
    fn timeouts_become_network_timeout() {
        for kind in [
            FailureKind::ConnectTimeout,
            FailureKind::SendTimeout,
            FailureKind::ReceiveTimeout,
        ] {
            let err = normalize(TransportFailure::new(kind, "slow"));
            assert_eq!(err.network_kind(), Some(NetworkErrorKind::Timeout));
        }
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (401, NetworkErrorKind::Unauthorized),
            (403, NetworkErrorKind::Forbidden),
            (404, NetworkErrorKind::NotFound),
            (409, NetworkErrorKind::Generic),
            (500, NetworkErrorKind::ServerError),
            (503, NetworkErrorKind::ServerError),
        ];
        for (status, kind) in cases {
            let err = normalize(status_failure(status, json!({})));
            assert_eq!(err.network_kind(), Some(kind), "{status}");
            assert_eq!(err.status_code(), Some(status));
        }
    }

    #[test]
    fn bad_request_is_validation_with_first_field_error() {
        let err = normalize(status_failure(
            400,
            json!({"errors": {"email": ["already taken"]}}),
        ));
        assert_eq!(err, ApiError::validation("already taken"));
    }

    #[test]
    fn other_client_error_uses_body_message_or_default() {
        let err = normalize(status_failure(422, json!({"detail": "name too long"})));
        assert_eq!(err.message(), "name too long");
        assert_eq!(err.code(), Some("CLIENT_ERROR"));

        let err = normalize(status_failure(418, json!(null)));
        assert_eq!(err.message(), "Client error occurred");
    }

    #[test]
    fn connection_level_failures() {
        let err = normalize(TransportFailure::new(FailureKind::ConnectionError, "refused"));
        assert_eq!(err.code(), Some("NO_CONNECTION"));

        let err = normalize(TransportFailure::new(FailureKind::BadCertificate, "bad cert"));
        assert_eq!(err.code(), Some("BAD_CERTIFICATE"));

        let err = normalize(TransportFailure::cancelled());
        assert_eq!(err.code(), Some("REQUEST_CANCELLED"));
    }

    #[test]
    fn unknown_keeps_raw_message() {
        assert_eq!(
            normalize(TransportFailure::new(FailureKind::Unknown, "disk full")),
            ApiError::unknown("disk full")
        );
        assert_eq!(
            normalize(TransportFailure::new(FailureKind::Unknown, "")),
            ApiError::unknown("unknown error")
        );
    }

    #[test]
    fn message_key_priority() {
        let body = json!({"msg": "third", "error": "second", "message": "first"});
        assert_eq!(extract_message(&body).as_deref(), Some("first"));

        let body = json!({"msg": "fourth", "error_description": "fifth"});
        assert_eq!(extract_message(&body).as_deref(), Some("fourth"));
    }

    #[test]
    fn errors_shapes() {
        assert_eq!(
            extract_message(&json!({"errors": {"name": "required"}})).as_deref(),
            Some("required")
        );
        assert_eq!(
            extract_message(&json!({"errors": [{"message": "bad id"}, "ignored"]})).as_deref(),
            Some("bad id")
        );
        assert_eq!(
            extract_message(&json!({"errors": ["plain"]})).as_deref(),
            Some("plain")
        );
        assert_eq!(extract_message(&json!("oops")).as_deref(), Some("oops"));
        assert_eq!(extract_message(&json!({"status": 400})), None);
        assert_eq!(extract_message(&json!([1, 2])), None);
    }
}
