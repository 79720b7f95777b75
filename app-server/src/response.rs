//! Response envelope shared by all JSON routes.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// `{ code, msg, data }` body the web client expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(msg: impl Into<String>, data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            msg: msg.into(),
            data: Some(data),
        }
    }

    pub fn empty(msg: impl Into<String>) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            msg: msg.into(),
            data: None,
        }
    }

    pub fn failure(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            msg: msg.into(),
            data: None,
        }
    }
}
