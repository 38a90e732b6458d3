//! `POST /upload` handler
//!
//! Parses the request as `multipart/form-data` with `multer` and relays the
//! first part that carries a filename. The part is handed to the relay as a
//! live stream, so the file is never held in memory as a whole.

use super::text_response;
use crate::upload::{BoxError, UploadOutcome, UploadRelay, UploadRequest};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::CONTENT_TYPE;
use hyper::{Request, Response, StatusCode};
use multer::Multipart;
use tracing::{debug, warn};

/// Relay the first file part of a multipart request
pub(crate) async fn handle_upload<B>(req: Request<B>, relay: &UploadRelay) -> Response<String>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send + 'static,
{
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let boundary = match content_type.map(multer::parse_boundary) {
        Some(Ok(boundary)) => boundary,
        Some(Err(e)) => {
            warn!("Rejecting upload with bad content type: {}", e);
            return text_response(
                StatusCode::BAD_REQUEST,
                format!("Expected multipart/form-data: {}", e),
            );
        }
        None => {
            warn!("Rejecting upload without content type");
            return text_response(
                StatusCode::BAD_REQUEST,
                "Expected multipart/form-data".to_string(),
            );
        }
    };

    let mut multipart = Multipart::new(req.into_body().into_data_stream(), boundary);

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                warn!("Multipart body has no file part");
                return text_response(
                    StatusCode::BAD_REQUEST,
                    "No file part in upload".to_string(),
                );
            }
            Err(e) => {
                warn!("Malformed multipart body: {}", e);
                return text_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid multipart body: {}", e),
                );
            }
        };

        let Some(file_name) = field.file_name().map(str::to_string) else {
            debug!(field = ?field.name(), "Skipping non-file part");
            continue;
        };

        let outcome = relay.relay(UploadRequest::new(field, file_name)).await;
        return outcome_response(outcome);
    }
}

/// Map an upload outcome onto an HTTP response
pub(crate) fn outcome_response(outcome: UploadOutcome) -> Response<String> {
    match outcome {
        UploadOutcome::Success { url } => text_response(StatusCode::OK, url),
        UploadOutcome::Failure { cause } => {
            let status = if cause.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            text_response(status, format!("Upload failed: {}", cause))
        }
    }
}
