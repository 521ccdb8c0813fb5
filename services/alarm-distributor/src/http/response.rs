use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use fw_protocol::HttpErrorEnvelope;

pub(crate) fn json_error(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Response {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.into(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

pub fn not_found(message: impl Into<String>) -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub fn bad_request(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
}

pub fn service_unavailable(message: impl Into<String>) -> Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "DEGRADED", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn not_found_sets_not_found_contract() {
        let response = not_found("alarm missing");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: HttpErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.code, "NOT_FOUND");
        assert_eq!(parsed.message, "alarm missing");
    }
}
