//! HTTP handlers for the oidc-auth gateway.

pub mod invite;
pub mod login;

pub use invite::*;
pub use login::*;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
