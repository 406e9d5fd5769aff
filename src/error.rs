// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Lingo
//!
//! This module defines all error types used throughout the engine.
//! Cancellation is deliberately *not* an error: cooperative aborts settle as
//! a distinct stream event and reset transient state silently.

use thiserror::Error;

/// Main error type for Lingo operations
#[derive(Error, Debug)]
pub enum LingoError {
    /// Model transport errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Session registry errors
    #[error("Session error: {0}")]
    Session(String),

    /// Durable storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Document handle errors
    #[error("Document error: {0}")]
    Document(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Model-transport-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,
}

/// Result type alias for Lingo operations
pub type Result<T> = std::result::Result<T, LingoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lingo_error_session() {
        let err = LingoError::Session("no active session".to_string());
        assert!(err.to_string().contains("Session error"));
        assert!(err.to_string().contains("no active session"));
    }

    #[test]
    fn test_lingo_error_storage() {
        let err = LingoError::Storage("disk full".to_string());
        assert!(err.to_string().contains("Storage error"));
    }

    #[test]
    fn test_lingo_error_document() {
        let err = LingoError::Document("handle dropped".to_string());
        assert!(err.to_string().contains("Document error"));
    }

    #[test]
    fn test_lingo_error_invalid_input() {
        let err = LingoError::InvalidInput("empty message".to_string());
        assert!(err.to_string().contains("Invalid input"));
    }

    #[test]
    fn test_lingo_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LingoError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_api_error_network() {
        let err = ApiError::Network("connection refused".to_string());
        assert!(err.to_string().contains("Network error"));
    }

    #[test]
    fn test_api_error_server_error() {
        let err = ApiError::ServerError {
            status: 500,
            message: "internal server error".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("internal server error"));
    }

    #[test]
    fn test_api_error_stream_error() {
        let err = ApiError::StreamError("stream closed".to_string());
        assert!(err.to_string().contains("Streaming error"));
    }

    #[test]
    fn test_api_error_timeout() {
        let err = ApiError::Timeout;
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_lingo_error_from_api_error() {
        let api_err = ApiError::Timeout;
        let err: LingoError = api_err.into();
        assert!(err.to_string().contains("API error"));
    }

    #[test]
    fn test_result_type_alias() {
        fn test_fn() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(test_fn().unwrap(), 42);
    }
}
