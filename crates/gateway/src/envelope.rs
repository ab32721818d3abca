//! Response envelope and error mapping.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::Serialize,
    serde_json::{Value, json},
    wagate_common::Error,
};

/// The uniform response body: `{success, data | error, message}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Success envelope around any serialisable payload.
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse> {
    Json(ApiResponse {
        success: true,
        data: serde_json::to_value(data).ok(),
        error: None,
        message: None,
    })
}

/// Success envelope with a human message and no payload.
pub fn ok_message(message: impl Into<String>) -> Json<ApiResponse> {
    Json(ApiResponse {
        success: true,
        data: None,
        error: None,
        message: Some(message.into()),
    })
}

/// A gateway error carried to the HTTP layer.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match code {
            "not_found" => StatusCode::NOT_FOUND,
            "bad_input" | "already_exists" => StatusCode::BAD_REQUEST,
            "not_connected" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Never leak internal details (driver errors, payload dumps) to
        // clients; the full error is in the server log.
        let message = match code {
            "storage" | "serialisation" | "internal" => {
                tracing::error!(error = %self.0, "internal error on control api");
                "internal error".to_string()
            },
            _ => self.0.to_string(),
        };
        let body = json!({
            "success": false,
            "error": code,
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}

/// Handler result alias.
pub type ApiResult = Result<Json<ApiResponse>, ApiError>;

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: Error) -> StatusCode {
        ApiError(error).into_response().status()
    }

    #[test]
    fn taxonomy_maps_to_exit_codes() {
        assert_eq!(status_of(Error::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(Error::bad_input("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(Error::already_exists("628")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::not_connected("628", "reconnecting")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(Error::timeout("webhook")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(Error::internal("boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn envelope_skips_absent_fields() {
        let body = serde_json::to_value(ok(json!({"n": 1})).0).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["n"], 1);
        assert!(body.get("error").is_none());
    }
}
