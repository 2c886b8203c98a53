//! Matrix client errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: {status} {errcode} - {message}")]
    Api {
        status: u16,
        errcode: String,
        message: String,
    },

    #[error("Unknown token")]
    Unauthorized,
}
