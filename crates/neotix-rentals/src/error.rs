use crate::domain::types::{ClusterId, CostBreakdown};
use crate::provisioner::ProvisionError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RentalsError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Cluster {cluster_id} already has an active rental")]
    Conflict { cluster_id: ClusterId },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
        /// Full quote that produced `required`; present when the check ran
        /// inside a deploy, absent on a bare ledger debit.
        breakdown: Option<CostBreakdown>,
    },

    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Provisioning timed out after {elapsed_secs}s")]
    ProvisionTimeout { elapsed_secs: u64 },

    /// A compensating action itself failed. Whatever state was left behind is
    /// no longer tracked by the saga and needs operator attention.
    #[error("Internal inconsistency during {operation}: {message}")]
    InternalInconsistency { operation: String, message: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Invalid rental state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Database error during {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RentalsError {
    pub fn database(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Machine-readable error kind for API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            RentalsError::Validation { .. } => "validation",
            RentalsError::Conflict { .. } => "conflict",
            RentalsError::InsufficientBalance { .. } => "insufficient_balance",
            RentalsError::Provision(_) => "provision_failure",
            RentalsError::ProvisionTimeout { .. } => "provision_timeout",
            RentalsError::InternalInconsistency { .. } => "internal_inconsistency",
            RentalsError::NotFound { .. } => "not_found",
            RentalsError::InvalidStateTransition { .. } => "invalid_state_transition",
            RentalsError::Database { .. } => "database",
            RentalsError::Config(_) => "config",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            RentalsError::Validation { .. } => StatusCode::BAD_REQUEST,
            RentalsError::Conflict { .. } | RentalsError::InvalidStateTransition { .. } => {
                StatusCode::CONFLICT
            }
            RentalsError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            RentalsError::Provision(_) => StatusCode::BAD_GATEWAY,
            RentalsError::ProvisionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RentalsError::NotFound { .. } => StatusCode::NOT_FOUND,
            RentalsError::InternalInconsistency { .. }
            | RentalsError::Database { .. }
            | RentalsError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RentalsError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut detail = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });

        // Balance rejections carry the numbers the caller needs to render the
        // shortfall.
        if let RentalsError::InsufficientBalance {
            required,
            available,
            breakdown,
        } = &self
        {
            detail["required_amount"] = json!(required);
            detail["current_balance"] = json!(available);
            if let Some(breakdown) = breakdown {
                detail["cost_breakdown"] =
                    serde_json::to_value(breakdown).unwrap_or(serde_json::Value::Null);
            }
        }

        (status, Json(json!({ "error": detail }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RentalsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            RentalsError::validation("no configuration").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RentalsError::Conflict {
                cluster_id: ClusterId::new()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            RentalsError::InsufficientBalance {
                required: dec!(1.13),
                available: dec!(1.00),
                breakdown: None,
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            RentalsError::Provision(ProvisionError::Capacity("none".to_string())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RentalsError::ProvisionTimeout { elapsed_secs: 240 }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_kind_is_machine_readable() {
        assert_eq!(
            RentalsError::ProvisionTimeout { elapsed_secs: 240 }.kind(),
            "provision_timeout"
        );
        assert_eq!(
            RentalsError::InternalInconsistency {
                operation: "deploy".to_string(),
                message: "leak".to_string(),
            }
            .kind(),
            "internal_inconsistency"
        );
    }
}
