pub mod groups;

use axum::Json;
use axum::Router;
use axum::response::{IntoResponse, Response};
use hyper::StatusCode;
use serde_json::json;

use crate::error::ApiError;
use crate::server::appstate::AppState;

/// Simple api error wrapper.
///
/// Handler results need to implement [`IntoResponse`], but keeping that
/// conversion out of [`ApiError`] itself means the error type stays usable
/// outside of axum. So we use this thin wrapper for an [`IntoResponse`] impl.
#[derive(Debug)]
pub struct ControllerApiError(ApiError);

pub type ControllerApiResult<T> = Result<T, ControllerApiError>;

impl From<ApiError> for ControllerApiError {
    fn from(value: ApiError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ControllerApiError {
    fn into_response(self) -> Response {
        log::error!("Request failed: {}", self.0);

        let status = match self.0 {
            ApiError::GroupNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let res = json!({"error": self.0.to_string()});

        (status, Json(res)).into_response()
    }
}

pub fn router() -> Router<AppState> {
    Router::new().merge(groups::router())
}
