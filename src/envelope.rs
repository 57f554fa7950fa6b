use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::RawResponse;
use crate::{ApiError, Result};

/// Uniform success-shaped wrapper returned from every call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status_code: Option<u16>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, status_code: Option<u16>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: String::new(),
            status_code,
        }
    }

    /// Returns the payload, failing when the server sent none.
    pub fn into_data(self) -> Result<T> {
        self.data.ok_or_else(|| {
            ApiError::unknown(if self.message.is_empty() {
                "response contained no data".to_owned()
            } else {
                self.message
            })
        })
    }
}

/// Result of a completed download.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub path: PathBuf,
    /// Size of the written file.
    pub bytes: u64,
}

/// Decodes with serde.
pub(crate) fn serde_decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| ApiError::unknown(format!("failed to decode response: {err}")))
}

/// Builds the envelope for a successful response.
///
/// A JSON object carrying `data` or `success` is unwrapped as an envelope
/// with its `data` run through `decode`; any other body is decoded whole
/// and wrapped as a success.
pub(crate) fn decode_envelope<T, F>(response: &RawResponse, decode: F) -> Result<ApiResponse<T>>
where
    F: FnOnce(Value) -> Result<T>,
{
    let http_status = Some(response.status.as_u16());
    match response.json() {
        Value::Object(mut map) if map.contains_key("data") || map.contains_key("success") => {
            let data = match map.remove("data") {
                None | Some(Value::Null) => None,
                Some(value) => Some(decode(value)?),
            };
            Ok(ApiResponse {
                success: map.get("success").and_then(Value::as_bool).unwrap_or(true),
                data,
                message: map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                status_code: map
                    .get("statusCode")
                    .and_then(Value::as_u64)
                    .and_then(|code| u16::try_from(code).ok())
                    .or(http_status),
            })
        }
        body => Ok(ApiResponse::ok(decode(body)?, http_status)),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde::Deserialize;
    use serde_json::json;

    use super::{decode_envelope, serde_decode, ApiResponse};
    use crate::transport::RawResponse;
    use crate::ApiError;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    fn raw(body: serde_json::Value) -> RawResponse {
        RawResponse::new(StatusCode::OK, body.to_string())
    }

    #[test]
    fn envelope_body_is_unwrapped() {
        let response = raw(json!({
            "success": true,
            "data": {"id": 1, "name": "Kit"},
            "message": "fetched",
            "statusCode": 200
        }));
        let envelope: ApiResponse<User> =
            decode_envelope(&response, serde_decode).expect("must decode");
        assert!(envelope.success);
        assert_eq!(envelope.message, "fetched");
        assert_eq!(envelope.status_code, Some(200));
        assert_eq!(
            envelope.data,
            Some(User {
                id: 1,
                name: "Kit".to_owned()
            })
        );
    }

    #[test]
    fn envelope_with_failure_flag_and_no_data() {
        let response = raw(json!({"success": false, "message": "nothing here"}));
        let envelope: ApiResponse<User> =
            decode_envelope(&response, serde_decode).expect("must decode");
        assert!(!envelope.success);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.status_code, Some(200));
        assert_eq!(
            envelope.into_data().expect_err("no data"),
            ApiError::unknown("nothing here")
        );
    }

    #[test]
    fn plain_body_goes_through_decode_function() {
        let response = raw(json!([1, 2, 3]));
        let envelope = decode_envelope(&response, |value| {
            Ok(value.as_array().map(Vec::len).unwrap_or_default())
        })
        .expect("must decode");
        assert!(envelope.success);
        assert_eq!(envelope.data, Some(3));
        assert!(envelope.message.is_empty());
    }

    #[test]
    fn shape_mismatch_is_unknown_error() {
        let response = raw(json!({"id": "not-a-number"}));
        let err = decode_envelope::<User, _>(&response, serde_decode).expect_err("must fail");
        assert!(matches!(err, ApiError::Unknown { .. }));
    }
}
