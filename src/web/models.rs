//! Contains the data models for API requests and responses.

use serde::{Deserialize, Serialize};

/// Represents a request to execute a G-code command.
#[derive(Deserialize)]
pub struct GcodeCommandRequest {
    pub command: String,
}

/// Login credentials posted to `/api/v1/auth/login`.
#[derive(Deserialize)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

/// A signed JWT issued on successful login.
#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
}

/// Result of validating a bearer token against `/api/v1/auth/check`.
#[derive(Serialize)]
pub struct TokenCheckResponse {
    pub valid: bool,
}