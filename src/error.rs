use thiserror::Error;

use crate::models::payment::PaymentStatus;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unsupported payment method: {0}")]
    UnsupportedMethod(String),
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} rejected the request: {message}")]
    Rejected {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} sent an unexpected response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: &'static str,
        operation: &'static str,
    },
    #[error("failed to sign {provider} request: {message}")]
    Signing {
        provider: &'static str,
        message: String,
    },
}

impl GatewayError {
    pub fn transport(provider: &'static str, source: reqwest::Error) -> Self {
        GatewayError::Transport { provider, source }
    }

    pub fn rejected(provider: &'static str, message: impl Into<String>) -> Self {
        GatewayError::Rejected {
            provider,
            message: message.into(),
        }
    }

    pub fn malformed(provider: &'static str, message: impl Into<String>) -> Self {
        GatewayError::Malformed {
            provider,
            message: message.into(),
        }
    }

    /// Network failures and vendor-side 5xx. Nothing retries automatically;
    /// callers use this to pick a status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport { .. } => true,
            GatewayError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{table} record {key} already exists")]
    Duplicate { table: &'static str, key: String },
    #[error("database error: {0}")]
    Backend(String),
    #[error("failed to encode record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum BillingError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),
    #[error("{0}")]
    Validation(String),
    #[error("cannot move payment from {from} to {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("monthly post limit of {limit} reached")]
    QuotaExceeded { limit: u32 },
    #[error("{0}")]
    Conflict(String),
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BillingError::Validation(errors.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let server_error = GatewayError::Http {
            provider: "bkash",
            status: 503,
            body: "unavailable".to_string(),
        };
        assert!(server_error.is_retryable());

        let client_error = GatewayError::Http {
            provider: "bkash",
            status: 401,
            body: "bad credentials".to_string(),
        };
        assert!(!client_error.is_retryable());
        assert!(!GatewayError::rejected("rocket", "insufficient balance").is_retryable());
        assert!(!GatewayError::UnsupportedMethod("paypal".to_string()).is_retryable());
    }

    #[test]
    fn test_unsupported_method_message() {
        let err = GatewayError::UnsupportedMethod("paypal".to_string());
        assert_eq!(err.to_string(), "Unsupported payment method: paypal");
    }
}
