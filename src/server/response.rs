//! JSON response builders

use crate::router::RouterError;
use crate::upload::UploadError;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;

pub type HttpResponse = Response<Full<Bytes>>;

/// Message returned with every successful upload
pub const UPLOAD_SUCCESS_MESSAGE: &str = "Video uploaded successfully";

#[derive(Serialize)]
struct UploadSuccess<'a> {
    message: &'a str,
    #[serde(rename = "fileUrl")]
    file_url: &'a str,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    details: String,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response body");
            br#"{"error":"Internal error"}"#.to_vec()
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn health() -> HttpResponse {
    json(StatusCode::OK, &Health { status: "ok" })
}

pub fn uploaded(file_url: &str) -> HttpResponse {
    json(
        StatusCode::OK,
        &UploadSuccess {
            message: UPLOAD_SUCCESS_MESSAGE,
            file_url,
        },
    )
}

pub fn upload_error(err: &UploadError) -> HttpResponse {
    let kind = err.kind();
    json(
        kind.status_code(),
        &ErrorBody {
            error: kind.label(),
            details: err.public_details(),
        },
    )
}

pub fn router_error(err: &RouterError) -> HttpResponse {
    match err {
        RouterError::NotFound(_) => json(
            StatusCode::NOT_FOUND,
            &ErrorBody {
                error: "Not found",
                details: err.to_string(),
            },
        ),
        RouterError::MethodNotAllowed { .. } => {
            let mut response = json(
                StatusCode::METHOD_NOT_ALLOWED,
                &ErrorBody {
                    error: "Method not allowed",
                    details: err.to_string(),
                },
            );
            if let Some(allow) = err.allowed_methods() {
                response
                    .headers_mut()
                    .insert(ALLOW, HeaderValue::from_static(allow));
            }
            response
        }
    }
}
