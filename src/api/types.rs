use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Response sent when a request is shed and no pressure handler takes over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    /// Stable machine-readable code, e.g. `UNDER_PRESSURE`.
    pub code: String,
    pub message: String,
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody<'a> {
    pub code: &'a str,
    pub error: &'static str,
    pub message: &'a str,
    pub status_code: u16,
}

impl Rejection {
    pub fn body(&self) -> RejectionBody<'_> {
        RejectionBody {
            code: &self.code,
            error: self.status.canonical_reason().unwrap_or("Unknown"),
            message: &self.message,
            status_code: self.status.as_u16(),
        }
    }

    pub fn to_response(&self) -> Response {
        let mut resp = (self.status, Json(self.body())).into_response();
        resp.headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        resp
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        self.to_response()
    }
}
