use crate::error::{Error, ErrorKind};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub(crate) struct APIError(anyhow::Error);

fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::JsonExtractorRejection(err) => match err {
            JsonRejection::JsonDataError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            JsonRejection::JsonSyntaxError(_) => StatusCode::BAD_REQUEST,
            JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        Error::Resolver(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::UnknownServiceKind(_) => StatusCode::NOT_FOUND,
        err => match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Syntax | ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unsupported => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Provider => StatusCode::BAD_GATEWAY,
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for APIError {
    fn into_response(self) -> Response {
        let any_err = self.0;
        let status = any_err
            .downcast_ref::<Error>()
            .map_or(StatusCode::INTERNAL_SERVER_ERROR, status_of);
        let body = Json(json!({
            "error": format!("{any_err}"),
        }));
        (status, body).into_response()
    }
}

impl<E> From<E> for APIError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
