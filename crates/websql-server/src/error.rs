// HTTP mapping of service errors
// Tenant and token rejections answer with a JSON `{"err"}` body, everything
// else becomes a plain-text 500 carrying the error message.

use std::fmt::{Display, Formatter};

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, http::header::ContentType};
use websql_api::rest::ErrResponse;
use websql_common::{WebsqlError, classify};

// Local wrapper so actix's ResponseError can be implemented for anyhow errors
#[derive(Debug)]
pub struct AppError {
    inner: anyhow::Error,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError { inner: value }
    }
}

impl From<WebsqlError> for AppError {
    fn from(value: WebsqlError) -> Self {
        AppError { inner: value.into() }
    }
}

impl AppError {
    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }
}

impl actix_web::error::ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match classify(&self.inner) {
            Some(WebsqlError::Auth(_)) | Some(WebsqlError::NotFound(_)) => StatusCode::OK,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match classify(&self.inner) {
            Some(e @ (WebsqlError::Auth(_) | WebsqlError::NotFound(_))) => {
                HttpResponse::Ok().json(ErrResponse { err: e.to_string() })
            }
            _ => HttpResponse::InternalServerError()
                .content_type(ContentType::plaintext())
                .body(self.inner.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;
    use actix_web::body::MessageBody;

    fn body_text(response: HttpResponse) -> String {
        let bytes = response.into_body().try_into_bytes().unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_auth_error_is_json_err() {
        let err = AppError::from(WebsqlError::auth("Invalid app."));
        assert_eq!(err.status_code(), StatusCode::OK);

        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response), r#"{"err":"Invalid app."}"#);
    }

    #[test]
    fn test_other_errors_are_plain_500() {
        let err = AppError::from(WebsqlError::script("Incorrect param count. Expected: 3 actual: 4"));
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response), "Incorrect param count. Expected: 3 actual: 4");

        let err = AppError::from(anyhow::anyhow!("connection refused"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(classify(err.inner()).is_none());
    }
}
