use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("Unexpected status {status_code} from {url}")]
    UnexpectedStatus { url: String, status_code: u16 },

    #[error("Server error {status_code} from {url}")]
    ServerError { url: String, status_code: u16 },

    #[error("Rate limited by {url}")]
    RateLimited { url: String },

    #[error("Request timeout for {url}")]
    RequestTimeout { url: String },

    #[error("Connection failed for {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Response body unreadable for {url}: {reason}")]
    BodyUnreadable { url: String, reason: String },

    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },
}

#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("Invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Migration failed: {migration}")]
    MigrationFailed { migration: String },

    #[error("Query execution failed: {query}")]
    QueryFailed { query: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Database locked")]
    DatabaseLocked,

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Invalid mailbox address: {address}")]
    InvalidAddress { address: String },

    #[error("Failed to build message: {reason}")]
    MessageBuild { reason: String },

    #[error("SMTP authentication failed for {username}")]
    AuthenticationFailed { username: String },

    #[error("SMTP transport error: {reason}")]
    Transport { reason: String },

    #[error("Message rejected by {host}: {reason}")]
    Rejected { host: String, reason: String },
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API key invalid or missing for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Rate limit exceeded for {provider}")]
    RateLimitExceeded { provider: String },

    #[error("Provider service unavailable: {provider} ({status_code})")]
    ServiceUnavailable { provider: String, status_code: u16 },

    #[error("Request rejected by {provider}: {status_code}")]
    RequestRejected { provider: String, status_code: u16 },

    #[error("Request timeout for {provider}")]
    RequestTimeout { provider: String },

    #[error("Invalid response format from {provider}")]
    InvalidResponseFormat { provider: String },

    #[error("Empty completion from {provider}")]
    EmptyCompletion { provider: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
