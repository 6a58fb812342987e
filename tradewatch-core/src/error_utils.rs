use crate::error::*;
use tracing::{error, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::Fetch(e) => {
                error!("Fetch error details: {:?}", e);
            }
            CoreError::Database(e) => {
                error!("Database error details: {:?}", e);
            }
            CoreError::Delivery(e) => {
                error!("Delivery error details: {:?}", e);
            }
            CoreError::Llm(e) => {
                error!("LLM error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Fetch(e) => e.is_retryable(),
            CoreError::Database(e) => e.is_retryable(),
            CoreError::Delivery(e) => e.is_retryable(),
            CoreError::Llm(e) => e.is_retryable(),
            CoreError::Network(_) => true,
            _ => false,
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::Fetch(e) => e.error_code(),
            CoreError::Parse(_) => "PARSE".to_string(),
            CoreError::Database(e) => e.error_code(),
            CoreError::Delivery(e) => e.error_code(),
            CoreError::Llm(e) => e.error_code(),
            CoreError::Config(e) => e.error_code(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
        }
    }
}

impl ErrorExt for FetchError {
    fn log_error(&self) -> &Self {
        error!("FetchError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("FetchError (warning): {}", self);
        self
    }

    // Every failed attempt is retried except a URL that cannot be built.
    fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::InvalidUrl { .. })
    }

    fn error_code(&self) -> String {
        match self {
            FetchError::UnexpectedStatus { .. } => "FETCH_UNEXPECTED_STATUS".to_string(),
            FetchError::ServerError { .. } => "FETCH_SERVER_ERROR".to_string(),
            FetchError::RateLimited { .. } => "FETCH_RATE_LIMITED".to_string(),
            FetchError::RequestTimeout { .. } => "FETCH_TIMEOUT".to_string(),
            FetchError::ConnectionFailed { .. } => "FETCH_CONNECTION_FAILED".to_string(),
            FetchError::BodyUnreadable { .. } => "FETCH_BODY_UNREADABLE".to_string(),
            FetchError::InvalidUrl { .. } => "FETCH_INVALID_URL".to_string(),
        }
    }
}

impl ErrorExt for DatabaseError {
    fn log_error(&self) -> &Self {
        error!("DatabaseError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("DatabaseError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::DatabaseLocked
                | DatabaseError::ConnectionFailed { .. }
                | DatabaseError::TransactionFailed { .. }
        )
    }

    fn error_code(&self) -> String {
        match self {
            DatabaseError::ConnectionFailed { .. } => "DB_CONNECTION_FAILED".to_string(),
            DatabaseError::MigrationFailed { .. } => "DB_MIGRATION_FAILED".to_string(),
            DatabaseError::QueryFailed { .. } => "DB_QUERY_FAILED".to_string(),
            DatabaseError::TransactionFailed { .. } => "DB_TRANSACTION_FAILED".to_string(),
            DatabaseError::DatabaseLocked => "DB_LOCKED".to_string(),
            DatabaseError::Sql(_) => "DB_SQL_ERROR".to_string(),
        }
    }
}

impl ErrorExt for DeliveryError {
    fn log_error(&self) -> &Self {
        error!("DeliveryError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("DeliveryError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transport { .. })
    }

    fn error_code(&self) -> String {
        match self {
            DeliveryError::InvalidAddress { .. } => "MAIL_INVALID_ADDRESS".to_string(),
            DeliveryError::MessageBuild { .. } => "MAIL_BUILD_FAILED".to_string(),
            DeliveryError::AuthenticationFailed { .. } => "MAIL_AUTH_FAILED".to_string(),
            DeliveryError::Transport { .. } => "MAIL_TRANSPORT".to_string(),
            DeliveryError::Rejected { .. } => "MAIL_REJECTED".to_string(),
        }
    }
}

impl ErrorExt for LlmError {
    fn log_error(&self) -> &Self {
        error!("LlmError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("LlmError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimitExceeded { .. }
                | LlmError::ServiceUnavailable { .. }
                | LlmError::RequestTimeout { .. }
        )
    }

    fn error_code(&self) -> String {
        match self {
            LlmError::InvalidApiKey { .. } => "LLM_INVALID_API_KEY".to_string(),
            LlmError::RateLimitExceeded { .. } => "LLM_RATE_LIMIT".to_string(),
            LlmError::ServiceUnavailable { .. } => "LLM_SERVICE_UNAVAILABLE".to_string(),
            LlmError::RequestRejected { .. } => "LLM_REQUEST_REJECTED".to_string(),
            LlmError::RequestTimeout { .. } => "LLM_TIMEOUT".to_string(),
            LlmError::InvalidResponseFormat { .. } => "LLM_INVALID_RESPONSE".to_string(),
            LlmError::EmptyCompletion { .. } => "LLM_EMPTY_COMPLETION".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}
