//! Request body decoding.
//!
//! [`Payload<T>`] accepts both body shapes browsers send to the API:
//! `application/json` and `application/x-www-form-urlencoded`. Anything else
//! is rejected with `415`. Decode failures become `400 invalid_body`, and
//! bodies over the router's limit become `413`. Rejections are
//! [`ApiError`]s, so they are rendered by the error stage like any other
//! failure and never reach the handler body.

use axum::extract::{FromRequest, Request};
use axum::http::{header, StatusCode};
use axum::{Form, Json};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiError;

/// JSON or form-encoded request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct Payload<T>(pub T);

/// Body encodings accepted by [`Payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
}

impl BodyKind {
    /// Classifies a `Content-Type` header value.
    fn from_content_type(value: &str) -> Option<Self> {
        let mime = value.split(';').next().unwrap_or_default().trim();
        if mime.eq_ignore_ascii_case("application/json")
            || mime.to_ascii_lowercase().ends_with("+json")
        {
            Some(Self::Json)
        } else if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            Some(Self::Form)
        } else {
            None
        }
    }
}

/// Maps a framework body rejection onto the API error taxonomy.
fn rejection(status: StatusCode, text: String) -> ApiError {
    debug!(status = %status, reason = %text, "Request body rejected");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::InvalidBody(text)
    }
}

impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let kind = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(BodyKind::from_content_type);

        match kind {
            Some(BodyKind::Json) => Json::<T>::from_request(req, state)
                .await
                .map(|Json(value)| Self(value))
                .map_err(|rej| rejection(rej.status(), rej.body_text())),
            Some(BodyKind::Form) => Form::<T>::from_request(req, state)
                .await
                .map(|Form(value)| Self(value))
                .map_err(|rej| rejection(rej.status(), rej.body_text())),
            None => Err(ApiError::UnsupportedMediaType),
        }
    }
}
