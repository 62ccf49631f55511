//! 错误响应

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use ivf_core::IvfError;
use serde_json::json;
use tracing::error;

/// 业务错误到HTTP响应的包装
#[derive(Debug)]
pub struct ApiError(pub IvfError);

impl From<IvfError> for ApiError {
    fn from(err: IvfError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            IvfError::Validation(_) => StatusCode::BAD_REQUEST,
            IvfError::NotFound(_) => StatusCode::NOT_FOUND,
            IvfError::Conflict(_) | IvfError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            IvfError::Database(_) | IvfError::Internal(_) | IvfError::Config(_) | IvfError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // 内部错误的细节只写日志
        let message = if status.is_server_error() {
            error!("Request failed: {}", self.0);
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = Json(json!({
            "error": true,
            "message": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError(IvfError::validation("x")).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError(IvfError::not_found("x")).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError(IvfError::Conflict("x".into())).status(), StatusCode::CONFLICT);
        let transition = IvfError::InvalidStateTransition {
            from: "completed".into(),
            event: "outcome_recorded".into(),
        };
        assert_eq!(ApiError(transition).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError(IvfError::Database("connection refused".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
