//! Typed errors for the fetchkol core library.
//!
//! One `thiserror` enum per subsystem, so callers can match on the failure
//! class of the layer they talk to instead of unpacking strings.

/// Failures while locating, reading, or validating the YAML configuration.
///
/// All of these abort startup (or the task, when hit lazily); none are
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field the engine cannot run without was left unset.
    #[error("config is missing '{field}'")]
    MissingField {
        /// Dotted path of the unset field.
        field: String,
    },

    /// A field is set but carries a value the engine rejects.
    #[error("config field '{field}' is invalid: {message}")]
    InvalidValue {
        /// Dotted path of the rejected field.
        field: String,
        /// What the validation objected to.
        message: String,
    },

    /// Nothing readable at the resolved config path.
    #[error("no config file at {path}")]
    NotFound {
        /// The path that was tried.
        path: String,
    },

    /// The file exists but is not valid YAML for the expected schema.
    #[error("config YAML is malformed: {source}")]
    Yaml {
        /// The YAML error, with line and column.
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors from interacting with the admin credential service.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// Network-level failure communicating with the admin service.
    #[error("admin service network error: {source}")]
    Network {
        /// The underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// Admin service returned an error response.
    #[error("admin service error (HTTP {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the service.
        message: String,
    },

    /// The lock call succeeded but returned no accounts.
    #[error("no {account_type} accounts available from admin service")]
    NoAccounts {
        /// The requested account class.
        account_type: String,
    },
}

/// Errors surfaced by the per-platform fetch strategies.
///
/// Every variant maps onto the HTTP-ish code the strategies report upstream
/// via [`FetchError::http_code`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Timeout, 5xx, or unexpected content type. The caller may keep partial
    /// results collected before the failure.
    #[error("transient upstream failure (HTTP {status}): {message}")]
    Transient {
        /// The observed HTTP status (or a synthetic 5xx for network errors).
        status: u16,
        /// Details of the failure.
        message: String,
    },

    /// Upstream returned HTTP 429 for the credential in use.
    #[error("rate limited by upstream")]
    RateLimited,

    /// The response was redirected to the platform's suspension page.
    #[error("账号被挂起")]
    AccountSuspended,

    /// Target user or resource does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Details about what was missing.
        message: String,
    },

    /// A required endpoint or key is missing from configuration.
    /// Aborts the task; never retried.
    #[error("fetch configuration error: {message}")]
    Config {
        /// Which endpoint or key is missing.
        message: String,
    },

    /// No credential of the required class could be leased.
    #[error("no credentials available: {message}")]
    NoCredentials {
        /// Details about the failed lease.
        message: String,
    },

    /// Network-level failure on an outbound platform call.
    #[error("upstream network error: {source}")]
    Network {
        /// The underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// The HTTP-ish status code this error reports to callers.
    pub fn http_code(&self) -> u16 {
        match self {
            FetchError::Transient { status, .. } => *status,
            FetchError::RateLimited => 429,
            FetchError::AccountSuspended => 403,
            FetchError::NotFound { .. } => 404,
            FetchError::Config { .. } | FetchError::NoCredentials { .. } => 500,
            FetchError::Network { source } => {
                if source.is_timeout() {
                    504
                } else {
                    502
                }
            }
        }
    }

    /// Whether the task should fail immediately without consulting other
    /// sources. Only configuration errors short-circuit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Config { .. })
    }
}

/// Errors from the task log storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to the task log database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },
}

/// Errors from the work queue transport.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue is closed; no consumer will ever see the item.
    #[error("work queue closed")]
    Closed,

    /// A work item failed to encode or decode.
    #[error("work item codec error: {source}")]
    Codec {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from intake validation and task coordination.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The platform is not one of the supported values.
    #[error("unknown platform: {name}")]
    UnknownPlatform {
        /// The rejected platform string.
        name: String,
    },

    /// The action is not one of the supported values.
    #[error("unknown action: {name}")]
    UnknownAction {
        /// The rejected action string.
        name: String,
    },

    /// `count` is outside the accepted range.
    #[error("count must satisfy 0 < count <= {max}, got {count}")]
    CountOutOfRange {
        /// The rejected count.
        count: i64,
        /// The inclusive upper bound.
        max: i64,
    },

    /// A follower bound is negative.
    #[error("follower bound must be non-negative, got {value}")]
    NegativeFollowerBound {
        /// The rejected bound.
        value: i64,
    },

    /// A required parameter is absent.
    #[error("missing required parameter: {name}")]
    MissingParam {
        /// The parameter name.
        name: String,
    },

    /// The task row could not be persisted.
    #[error("task log error: {source}")]
    Storage {
        /// The underlying storage error.
        #[from]
        source: StorageError,
    },
}
