mod execute;

pub use execute::*;

use actix_web::HttpRequest;
use actix_web::HttpResponse;
use actix_web::error::{InternalError, JsonPayloadError};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
}

#[derive(Serialize)]
struct ErrorResponseWithMessage {
    reason: &'static str,
    code: u32,
    message: String,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponseWithMessage {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
        message: err.to_string(),
    });
    InternalError::from_response(err, response).into()
}
