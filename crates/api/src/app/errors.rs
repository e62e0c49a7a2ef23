use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use bakeshop_infra::OrderWorkflowError;

pub fn workflow_error_to_response(err: OrderWorkflowError) -> axum::response::Response {
    match err {
        OrderWorkflowError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        e @ OrderWorkflowError::UnknownProduct(_) => {
            json_error(StatusCode::BAD_REQUEST, "unknown_product", e.to_string())
        }
        e @ OrderWorkflowError::ProductUnavailable(_) => {
            json_error(StatusCode::BAD_REQUEST, "product_unavailable", e.to_string())
        }
        e @ OrderWorkflowError::InsufficientStock { .. } => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "insufficient_stock",
            e.to_string(),
        ),
        OrderWorkflowError::InvalidTransition(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition", msg)
        }
        e @ OrderWorkflowError::NotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", e.to_string())
        }
        OrderWorkflowError::Storage(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        ),
    }
}

/// Malformed or non-JSON request bodies.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_json", rejection.body_text())
}

pub fn invalid_id(what: &str) -> axum::response::Response {
    json_error(
        StatusCode::BAD_REQUEST,
        "invalid_id",
        format!("{what} id must be a positive integer"),
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
