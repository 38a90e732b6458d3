//! Request Router
//!
//! Maps an incoming method and path onto one of the service's endpoints.

use hyper::Method;
use thiserror::Error;

/// Router errors
#[derive(Error, Debug, PartialEq)]
pub enum RouterError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
}

/// Service endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// GET /
    Index,
    /// GET /info
    Info,
    /// GET /health
    Health,
    /// POST /upload
    Upload,
}

impl Route {
    /// Resolve a request to a route
    ///
    /// A single trailing slash is ignored, so `/upload/` routes like `/upload`.
    pub fn parse(method: &Method, path: &str) -> Result<Self, RouterError> {
        let normalized = match path.strip_suffix('/') {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => path,
        };

        let (route, allowed) = match normalized {
            "" | "/" => (Route::Index, Method::GET),
            "/info" => (Route::Info, Method::GET),
            "/health" => (Route::Health, Method::GET),
            "/upload" => (Route::Upload, Method::POST),
            _ => return Err(RouterError::NotFound(path.to_string())),
        };

        if *method == allowed || (allowed == Method::GET && *method == Method::HEAD) {
            Ok(route)
        } else {
            Err(RouterError::MethodNotAllowed(format!(
                "{} {} (expected {})",
                method, path, allowed
            )))
        }
    }

    /// The method this route answers to, for `Allow` headers
    pub fn allowed_method(path: &str) -> Option<Method> {
        match path.trim_end_matches('/') {
            "" | "/info" | "/health" => Some(Method::GET),
            "/upload" => Some(Method::POST),
            _ => None,
        }
    }
}
