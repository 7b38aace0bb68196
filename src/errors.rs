// API error codes
//
// Every failure surfaced over HTTP carries a stable code (AGT-<status>-<n>)
// and a JSON body of the form {"error": message, "code": code}.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::fmt;
use std::str::FromStr;

/// Stable error codes exposed by the HTTP API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// AGT-400-01
    MissingQuery,
    /// AGT-400-02
    InvalidRequest,
    /// AGT-401-01
    Unauthorized,
    /// AGT-404-01
    ToolNotFound,
    /// AGT-500-01
    Internal,
    /// AGT-500-02
    McpUnavailable,
    /// AGT-504-01
    Timeout,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 7] = [
        ErrorCode::MissingQuery,
        ErrorCode::InvalidRequest,
        ErrorCode::Unauthorized,
        ErrorCode::ToolNotFound,
        ErrorCode::Internal,
        ErrorCode::McpUnavailable,
        ErrorCode::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingQuery => "AGT-400-01",
            ErrorCode::InvalidRequest => "AGT-400-02",
            ErrorCode::Unauthorized => "AGT-401-01",
            ErrorCode::ToolNotFound => "AGT-404-01",
            ErrorCode::Internal => "AGT-500-01",
            ErrorCode::McpUnavailable => "AGT-500-02",
            ErrorCode::Timeout => "AGT-504-01",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::MissingQuery | ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::ToolNotFound => StatusCode::NOT_FOUND,
            ErrorCode::Internal | ErrorCode::McpUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::MissingQuery => "The query field is required.",
            ErrorCode::InvalidRequest => "Invalid request format or parameters",
            ErrorCode::Unauthorized => "Authorization header is required",
            ErrorCode::ToolNotFound => "Tool not found in registry",
            ErrorCode::Internal => "Internal server error. Please try again later.",
            ErrorCode::McpUnavailable => "MCP server connection failed",
            ErrorCode::Timeout => "Request timeout exceeded",
        }
    }

    /// Resolve a code string, falling back to `Internal` for unknown codes
    pub fn lookup(code: &str) -> ErrorCode {
        code.parse().unwrap_or(ErrorCode::Internal)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownErrorCode(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown error code: {0}")]
pub struct UnknownErrorCode(pub String);

/// An error that maps onto an HTTP response
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
        }
    }

    /// Same code, caller-supplied message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.message,
            "code": self.code.as_str(),
        })
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        ApiError::new(code)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.code.status().is_server_error() {
            tracing::error!(code = %self.code, error = %self.message, "Request failed");
        } else {
            tracing::debug!(code = %self.code, error = %self.message, "Request rejected");
        }
        (self.code.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_strings() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::lookup(code.as_str()), code);
        }
    }

    #[test]
    fn test_unknown_code_falls_back_to_internal() {
        assert_eq!(ErrorCode::lookup("AGT-999-99"), ErrorCode::Internal);
        assert!("nope".parse::<ErrorCode>().is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::MissingQuery.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::ToolNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::McpUnavailable.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorCode::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_body_uses_override_message() {
        let err = ApiError::with_message(ErrorCode::McpUnavailable, "connection refused");
        let body = err.body();
        assert_eq!(body["error"], "connection refused");
        assert_eq!(body["code"], "AGT-500-02");

        let default = ApiError::new(ErrorCode::MissingQuery);
        assert_eq!(default.body()["error"], "The query field is required.");
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::new(ErrorCode::Timeout).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
