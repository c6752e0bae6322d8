//! UI login: trades the configured username/password for the API key.
//!
//! The password is compared as an unsalted MD5 hex digest, which matches the
//! existing configuration format but is not a secure password hash.

use crate::{errors::AppError, state::AuthSettings};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub status: String,
    pub api_key: String,
}

/// Lowercase hex MD5 of `password`.
pub fn password_digest(password: &str) -> String {
    format!("{:x}", md5::compute(password.as_bytes()))
}

/// `POST /api/login`
pub async fn login(
    State(auth): State<Arc<AuthSettings>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(creds) = payload.map_err(|_| AppError::bad_request("Invalid request"))?;

    let matches = !auth.ui_password_hash.is_empty()
        && creds.username == auth.ui_username
        && password_digest(&creds.password) == auth.ui_password_hash;
    if !matches {
        tracing::debug!("rejected login for user {:?}", creds.username);
        return Err(AppError::unauthorized("Invalid credentials"));
    }

    Ok(Json(LoginResponse {
        status: "success".into(),
        api_key: auth.api_key.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_digest_is_hex_md5() {
        assert_eq!(
            password_digest("password"),
            "5f4dcc3b5aa765d61d8327deb882cf99"
        );
        assert_eq!(password_digest(""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
