//! Application-wide error types
//!
//! Errors are grouped by where they originate: domain rule violations,
//! external systems (the gateway, the billing platform) and local
//! infrastructure (configuration, persistence, serialization).

use std::fmt;
use thiserror::Error;

/// Result type used across the service
pub type AppResult<T> = Result<T, AppError>;

/// Domain-level failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("Invalid request: {message}")]
    Validation { message: String },
}

/// Failures reported by systems this service talks to
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalError {
    #[error("{provider} error: {message}")]
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },

    #[error("Billing platform error: {message}")]
    BillingPlatform { message: String, is_retryable: bool },

    #[error("{service} rate limit exceeded")]
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
}

/// Local infrastructure failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InfrastructureError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String, is_retryable: bool },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppErrorKind {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Validation {
            message: message.into(),
        }))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Persistence {
            message: message.into(),
            is_retryable: false,
        }))
    }

    pub fn billing(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::External(ExternalError::BillingPlatform {
            message: message.into(),
            is_retryable: false,
        }))
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::External(ExternalError::PaymentProvider { is_retryable, .. })
            | AppErrorKind::External(ExternalError::BillingPlatform { is_retryable, .. })
            | AppErrorKind::Infrastructure(InfrastructureError::Persistence {
                is_retryable, ..
            }) => *is_retryable,
            AppErrorKind::External(ExternalError::RateLimit { .. }) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, AppErrorKind::Domain(DomainError::NotFound { .. }))
    }

    pub fn is_persistence(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Infrastructure(InfrastructureError::Persistence { .. })
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.kind, context),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AppError {}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Serialization {
                message: error.to_string(),
            },
        ))
    }
}

#[cfg(feature = "database")]
impl From<crate::database::error::DatabaseError> for AppError {
    fn from(error: crate::database::error::DatabaseError) -> Self {
        if error.is_not_found() {
            return Self::new(AppErrorKind::Domain(DomainError::NotFound {
                entity: "Record".to_string(),
                id: error.context.clone().unwrap_or_else(|| "unknown".to_string()),
            }));
        }

        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Persistence {
            message: error.to_string(),
            is_retryable: error.is_retryable(),
        }))
    }
}
