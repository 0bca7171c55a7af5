//! Response envelope helpers.

use crate::service::ApiOutput;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Error envelope: `{"error": {"code", "message"}}`.
pub fn error_body(code: &str, message: String) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}

/// 200 with the encoded rows (GET), the record ids (POST) or an empty body (DELETE).
pub fn api_response(output: ApiOutput) -> Response {
    match output {
        ApiOutput::Rows(rows) => (StatusCode::OK, Json(rows)).into_response(),
        ApiOutput::Ids(ids) => (StatusCode::OK, Json(ids)).into_response(),
        ApiOutput::Deleted(_) => StatusCode::OK.into_response(),
    }
}
