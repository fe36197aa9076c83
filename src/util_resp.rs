use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use hypertext::Rendered;

pub fn see_other_ok(r: Redirect) -> StandardResponse {
    Ok(SuccessResponse::SeeOther(Box::new(r)))
}

pub fn err_not_found() -> StandardResponse {
    Err(FailureResponse::NotFound(()))
}

pub fn bad_request(html: Rendered<String>) -> StandardResponse {
    Err(FailureResponse::BadRequest(html))
}

pub fn success(html: Rendered<String>) -> StandardResponse {
    Ok(SuccessResponse::Success(html))
}

pub fn server_error() -> StandardResponse {
    Err(FailureResponse::ServerError(()))
}

pub type StandardResponse = Result<SuccessResponse, FailureResponse>;

/// A file handed to the browser as a download.
#[derive(Debug)]
pub struct Attachment {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

pub enum SuccessResponse {
    Success(Rendered<String>),
    SeeOther(Box<Redirect>),
    Attachment(Attachment),
    /// Nothing changed; htmx leaves the page alone on a 204.
    NoContent,
    /// Asks htmx to reload the whole page.
    Refresh,
}

#[derive(Debug)]
pub enum FailureResponse {
    BadRequest(Rendered<String>),
    NotFound(()),
    Forbidden(Rendered<String>),
    ServerError(()),
}

impl From<diesel::result::Error> for FailureResponse {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => FailureResponse::NotFound(()),
            e => {
                tracing::error!("database error: {e}");
                FailureResponse::ServerError(())
            }
        }
    }
}

impl From<diesel::r2d2::PoolError> for FailureResponse {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        tracing::error!("failed to check out a database connection: {e}");
        FailureResponse::ServerError(())
    }
}

impl IntoResponse for SuccessResponse {
    fn into_response(self) -> Response {
        match self {
            SuccessResponse::Success(html) => {
                Html(html.into_inner()).into_response()
            }
            SuccessResponse::SeeOther(redirect) => redirect.into_response(),
            SuccessResponse::Attachment(file) => {
                let disposition = format!(
                    "attachment; filename=\"{}\"",
                    file.filename.replace(['"', '\\'], "")
                );
                let mut response = file.bytes.into_response();
                let headers = response.headers_mut();
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(file.content_type),
                );
                if let Ok(value) = HeaderValue::from_str(&disposition) {
                    headers.insert(header::CONTENT_DISPOSITION, value);
                }
                response
            }
            SuccessResponse::NoContent => StatusCode::NO_CONTENT.into_response(),
            SuccessResponse::Refresh => {
                let mut response = StatusCode::OK.into_response();
                response
                    .headers_mut()
                    .insert("hx-refresh", HeaderValue::from_static("true"));
                response
            }
        }
    }
}

impl IntoResponse for FailureResponse {
    fn into_response(self) -> Response {
        match self {
            FailureResponse::BadRequest(html) => {
                (StatusCode::BAD_REQUEST, Html(html.into_inner()))
                    .into_response()
            }
            FailureResponse::NotFound(()) => {
                (StatusCode::NOT_FOUND, "Not found").into_response()
            }
            FailureResponse::Forbidden(html) => {
                (StatusCode::FORBIDDEN, Html(html.into_inner())).into_response()
            }
            FailureResponse::ServerError(()) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong. Try again.",
            )
                .into_response(),
        }
    }
}
