//! Maps `DmStatus` onto an HTTP response, so REST and gRPC never drift on
//! status-code mapping (`StatusCode::http_status` is the single source).

use axum::body::Body;
use axum::http::StatusCode as HttpStatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use dm_core::error::DmStatus;

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

pub struct HttpError(pub DmStatus);

impl From<DmStatus> for HttpError {
    fn from(status: DmStatus) -> Self {
        HttpError(status)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.0.code.http_status();
        let body = ErrorBody {
            code: format!("{:?}", self.0.code),
            message: self.0.message,
        };
        let payload = serde_json::to_vec(&body).unwrap_or_default();
        Response::builder()
            .status(HttpStatusCode::from_u16(status).unwrap_or(HttpStatusCode::INTERNAL_SERVER_ERROR))
            .header("content-type", "application/json")
            .body(Body::from(payload))
            .unwrap_or_else(|_| HttpStatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

pub type HttpResult<T> = Result<T, HttpError>;
