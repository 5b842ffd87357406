use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Uniform JSON error/success envelope used by handlers and middleware.
#[derive(Serialize, Debug, PartialEq)]
pub struct JsonResponse {
    #[serde(skip)]
    pub status: StatusCode,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl JsonResponse {
    pub fn success(message: &str) -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            message: message.to_string(),
            code: None,
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            success: false,
            message: message.to_string(),
            code: None,
        }
    }

    pub fn unauthorized(message: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            success: false,
            message: message.to_string(),
            code: None,
        }
    }

    pub fn forbidden_with_code(message: &str, code: &str) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            success: false,
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    pub fn too_many_requests(message: &str) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            success: false,
            message: message.to_string(),
            code: None,
        }
    }

    pub fn server_error(message: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            success: false,
            message: message.to_string(),
            code: None,
        }
    }
}

impl IntoResponse for JsonResponse {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}
