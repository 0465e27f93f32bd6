//! HTTP request handling
//!
//! Routes a request and turns the outcome into a JSON response. The upload
//! body is handed to the [`UploadHandler`] as a stream of data frames, so it
//! is read off the socket only as fast as storage accepts it.

use super::response::{self, HttpResponse};
use crate::router::{self, Route};
use crate::upload::UploadHandler;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::BodyStream;
use hyper::body::Body;
use hyper::header::CONTENT_TYPE;
use hyper::Request;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// State shared by every connection
#[derive(Debug)]
pub struct AppState {
    pub upload: UploadHandler,
}

impl AppState {
    pub fn new(upload: UploadHandler) -> Self {
        Self { upload }
    }
}

/// CORS policy: any origin, method and header
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Handle one HTTP request
///
/// Never fails: every error becomes a response.
#[tracing::instrument(
    name = "http.request",
    skip_all,
    fields(
        http.method = %req.method(),
        http.target = %req.uri().path(),
        http.status_code = tracing::field::Empty
    )
)]
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<HttpResponse, Infallible>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let response = match router::resolve(req.method(), req.uri().path()) {
        Ok(Route::Health) => response::health(),
        Ok(Route::Upload) => upload(req, &state.upload).await,
        Err(e) => {
            tracing::debug!(error = %e, "Unrouted request");
            response::router_error(&e)
        }
    };

    let status = response.status();
    tracing::Span::current().record("http.status_code", status.as_u16());
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), "Request failed");
    } else {
        tracing::info!(status = status.as_u16(), "Request completed");
    }

    Ok(response)
}

async fn upload<B>(req: Request<B>, handler: &UploadHandler) -> HttpResponse
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let body = BodyStream::new(req.into_body())
        .try_filter_map(|frame| async move { Ok(frame.into_data().ok()) });

    match handler.handle(content_type.as_deref(), body).await {
        Ok(video) => response::uploaded(&video.url),
        Err(e) => response::upload_error(&e),
    }
}
