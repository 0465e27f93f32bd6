//! Request router
//!
//! Maps a method and path onto one of the service's routes. Anything that is
//! not a known path is a 404; a known path with the wrong method is a 405.

use hyper::Method;
use thiserror::Error;

/// Liveness probe path
pub const HEALTH_PATH: &str = "/api/health";

/// Video upload path
pub const UPLOAD_PATH: &str = "/api/upload";

/// Router errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("No route for {0}")]
    NotFound(String),

    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },
}

impl RouterError {
    /// Value for the `Allow` header of a 405 response
    pub fn allowed_methods(&self) -> Option<&'static str> {
        match self {
            RouterError::MethodNotAllowed { path, .. } => allowed_methods(path),
            RouterError::NotFound(_) => None,
        }
    }
}

/// Service routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// GET /api/health
    Health,
    /// POST /api/upload
    Upload,
}

/// Resolve a request to a route
pub fn resolve(method: &Method, path: &str) -> Result<Route, RouterError> {
    let path = normalize(path);

    let route = match path {
        HEALTH_PATH if method == Method::GET || method == Method::HEAD => Route::Health,
        UPLOAD_PATH if method == Method::POST => Route::Upload,
        HEALTH_PATH | UPLOAD_PATH => {
            return Err(RouterError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            })
        }
        _ => return Err(RouterError::NotFound(path.to_string())),
    };

    Ok(route)
}

fn allowed_methods(path: &str) -> Option<&'static str> {
    match normalize(path) {
        HEALTH_PATH => Some("GET, HEAD"),
        UPLOAD_PATH => Some("POST"),
        _ => None,
    }
}

/// Drop a single trailing slash, keeping "/" itself
fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}
