//! Request body extraction.
use axum::extract::FromRequest;

use crate::error::AuthError;

/// JSON body whose rejection renders like any other failed authentication
#[derive(Debug, Clone, FromRequest)]
#[from_request(via(axum::Json), rejection(AuthError))]
pub struct Payload<T>(pub T);
