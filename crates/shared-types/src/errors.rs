//! Common error types used across all GeoExplorer crates
//! Provides consistent error handling and reporting

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base error type for all GeoExplorer operations
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum ExplorerError {
    // Lookup errors
    #[error("Dataset not found: {dataset_id}")]
    DatasetNotFound { dataset_id: String },

    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    // Store errors
    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Invalid identifier: {identifier}")]
    InvalidIdentifier { identifier: String },

    // Request errors
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        message: String,
        field: Option<String>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ExplorerError {
    /// Short stable label for the variant, used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ExplorerError::DatasetNotFound { .. } => "dataset_not_found",
            ExplorerError::TableNotFound { .. } => "table_not_found",
            ExplorerError::Store { .. } => "store",
            ExplorerError::InvalidIdentifier { .. } => "invalid_identifier",
            ExplorerError::InvalidRequest { .. } => "invalid_request",
            ExplorerError::InvalidConfig { .. } => "invalid_config",
            ExplorerError::Internal { .. } => "internal",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ExplorerError::DatasetNotFound { .. } | ExplorerError::TableNotFound { .. }
        )
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExplorerError::InvalidRequest { .. } | ExplorerError::InvalidIdentifier { .. }
        )
    }
}

/// Result type alias for GeoExplorer operations
pub type ExplorerResult<T> = Result<T, ExplorerError>;

/// Error response structure sent over the wire
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ExplorerError,
    pub timestamp: u64,
    pub context: Option<ErrorContext>,
}

/// Additional context for error reporting
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorContext {
    pub component: String,
    pub operation: String,
    pub metadata: serde_json::Value,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(error: ExplorerError) -> Self {
        Self {
            success: false,
            error,
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
            context: None,
        }
    }

    /// Add context to the error response
    pub fn with_context(mut self, component: &str, operation: &str) -> Self {
        self.context = Some(ErrorContext {
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: serde_json::Value::Null,
        });
        self
    }

    /// Add metadata to the error context
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        if let Some(ref mut ctx) = self.context {
            ctx.metadata = metadata;
        }
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":{"type":"Internal","details":{"message":"Failed to serialize error"}}}"#.to_string()
        })
    }
}

impl From<serde_json::Error> for ExplorerError {
    fn from(err: serde_json::Error) -> Self {
        ExplorerError::Internal {
            message: format!("serialization failed: {err}"),
        }
    }
}

/// Helper macro for creating errors with context
#[macro_export]
macro_rules! explorer_error {
    ($variant:ident { $($field:ident: $value:expr),* }) => {
        $crate::errors::ExplorerError::$variant {
            $($field: $value.into()),*
        }
    };
}

/// Helper macro for converting foreign Results into ExplorerResult
#[macro_export]
macro_rules! map_explorer_error {
    ($result:expr, $error_variant:ident, $message:expr) => {
        $result.map_err(|e| $crate::errors::ExplorerError::$error_variant {
            message: format!("{}: {}", $message, e),
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let error = ExplorerError::DatasetNotFound {
            dataset_id: "ds-42".to_string(),
        };

        let response = ErrorResponse::new(error).with_context("DataManager", "fetch_and_compute");

        let json = response.to_json();
        assert!(json.contains("DatasetNotFound"));
        assert!(json.contains("ds-42"));
        assert!(json.contains("fetch_and_compute"));
    }

    #[test]
    fn test_error_classification() {
        let not_found = explorer_error!(TableNotFound { table: "data_1" });
        assert!(not_found.is_not_found());
        assert_eq!(not_found.kind(), "table_not_found");

        let bad = explorer_error!(InvalidRequest { message: "bbox must have 4 or 6 values" });
        assert!(bad.is_client_error());
        assert!(!bad.is_not_found());
    }

    #[test]
    fn test_map_explorer_error_macro() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("disk gone"));
        let mapped: ExplorerResult<()> = map_explorer_error!(result, Store, "opening store");

        match mapped {
            Err(ExplorerError::Store { message }) => {
                assert!(message.starts_with("opening store"));
                assert!(message.contains("disk gone"));
            }
            other => panic!("Wrong error variant: {other:?}"),
        }
    }
}
