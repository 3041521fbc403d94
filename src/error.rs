//! Error types for palaver.
//!
//! Every fallible operation in the crate returns [`Error`].  Variants are grouped into a small
//! taxonomy by [`Error::kind`] so that the orchestrator and the HTTP surface can decide what is
//! fatal, what is shown to the user, and what maps to which status code.

use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;
use std::sync::Arc;

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid startup configuration.  Fatal.
    Configuration,
    /// Bad input: rejected upload, unsupported format, filtered content.
    Validation,
    /// An external collaborator (AI model, translation API) failed.
    Collaborator,
    /// A bounded store is full.
    Capacity,
    /// The addressed resource does not exist.
    NotFound,
    /// The addressed resource existed but its lifetime has passed.
    Expired,
    /// Local failures: I/O, encoding, serialization of our own data.
    Internal,
}

/// The main error type for palaver.
#[derive(Clone, Debug)]
pub enum Error {
    /// Missing or malformed configuration.
    Configuration {
        /// Human-readable error message.
        message: String,
        /// The environment variable or option at fault.
        variable: Option<String>,
    },

    /// Input failed validation.
    Validation {
        /// Human-readable error message.
        message: String,
        /// Parameter that failed validation.
        param: Option<String>,
    },

    /// Content was rejected by a content filter.
    Blocked {
        /// The category of the rule that matched.
        category: String,
    },

    /// An export format that is not supported.
    InvalidFormat {
        /// The format that was requested.
        format: String,
    },

    /// A generic collaborator API error.
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error status string from the API.
        error_type: Option<String>,
        /// Human-readable error message.
        message: String,
    },

    /// The collaborator rejected our credentials.
    Authentication {
        /// Human-readable error message.
        message: String,
    },

    /// Quota or rate limit exceeded.
    RateLimit {
        /// Human-readable error message.
        message: String,
        /// Time to wait before retrying, in seconds.
        retry_after: Option<u64>,
    },

    /// The collaborator did not answer in time.
    Timeout {
        /// Human-readable error message.
        message: String,
        /// Duration of the timeout in seconds.
        duration: Option<f64>,
    },

    /// The request was cancelled before the collaborator answered.
    Cancelled {
        /// Human-readable error message.
        message: String,
    },

    /// Connection error.
    Connection {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// The collaborator is overloaded or unavailable.
    ServiceUnavailable {
        /// Human-readable error message.
        message: String,
        /// Time to wait before retrying, in seconds.
        retry_after: Option<u64>,
    },

    /// The collaborator answered with something we could not use.
    MalformedResponse {
        /// Human-readable error message.
        message: String,
    },

    /// HTTP client error.
    HttpClient {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A bounded store is full.
    Capacity {
        /// Human-readable error message.
        message: String,
        /// The limit that was reached.
        limit: usize,
    },

    /// Resource not found.
    NotFound {
        /// Human-readable error message.
        message: String,
        /// Resource type.
        resource_type: Option<String>,
        /// Resource ID.
        resource_id: Option<String>,
    },

    /// Resource expired.
    Expired {
        /// Human-readable error message.
        message: String,
        /// Resource ID.
        resource_id: Option<String>,
    },

    /// Error during JSON or YAML serialization or deserialization.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },

    /// A URL parsing or manipulation error.
    Url {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<url::ParseError>,
    },

    /// Encoding/decoding error.
    Encoding {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>, variable: Option<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            variable,
        }
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    /// Creates a new content-filter rejection.
    pub fn blocked(category: impl Into<String>) -> Self {
        Error::Blocked {
            category: category.into(),
        }
    }

    /// Creates a new invalid-format error.
    pub fn invalid_format(format: impl Into<String>) -> Self {
        Error::InvalidFormat {
            format: format.into(),
        }
    }

    /// Creates a new API error.
    pub fn api(status_code: u16, error_type: Option<String>, message: String) -> Self {
        Error::Api {
            status_code,
            error_type,
            message,
        }
    }

    /// Creates a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Error::Authentication {
            message: message.into(),
        }
    }

    /// Creates a new rate limit error.
    pub fn rate_limit(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a new timeout error.
    pub fn timeout(message: impl Into<String>, duration: Option<f64>) -> Self {
        Error::Timeout {
            message: message.into(),
            duration,
        }
    }

    /// Creates a new cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Error::Cancelled {
            message: message.into(),
        }
    }

    /// Creates a new connection error.
    pub fn connection(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Connection {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new service unavailable error.
    pub fn service_unavailable(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::ServiceUnavailable {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a new malformed-response error.
    pub fn malformed_response(message: impl Into<String>) -> Self {
        Error::MalformedResponse {
            message: message.into(),
        }
    }

    /// Creates a new HTTP client error.
    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new capacity error.
    pub fn capacity(message: impl Into<String>, limit: usize) -> Self {
        Error::Capacity {
            message: message.into(),
            limit,
        }
    }

    /// Creates a new not found error.
    pub fn not_found(
        message: impl Into<String>,
        resource_type: Option<String>,
        resource_id: Option<String>,
    ) -> Self {
        Error::NotFound {
            message: message.into(),
            resource_type,
            resource_id,
        }
    }

    /// Creates a new expired error.
    pub fn expired(message: impl Into<String>, resource_id: Option<String>) -> Self {
        Error::Expired {
            message: message.into(),
            resource_id,
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new URL error.
    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    /// Creates a new encoding error.
    pub fn encoding(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Encoding {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Validation { .. } | Error::Blocked { .. } | Error::InvalidFormat { .. } => {
                ErrorKind::Validation
            }
            Error::Api { .. }
            | Error::Authentication { .. }
            | Error::RateLimit { .. }
            | Error::Timeout { .. }
            | Error::Cancelled { .. }
            | Error::Connection { .. }
            | Error::ServiceUnavailable { .. }
            | Error::MalformedResponse { .. }
            | Error::HttpClient { .. } => ErrorKind::Collaborator,
            Error::Capacity { .. } => ErrorKind::Capacity,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Expired { .. } => ErrorKind::Expired,
            Error::Serialization { .. }
            | Error::Io { .. }
            | Error::Url { .. }
            | Error::Encoding { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if this error is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    /// Returns true if this error is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Returns true if this error is a content-filter rejection.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Error::Blocked { .. })
    }

    /// Returns true if this error is an unsupported export format.
    pub fn is_invalid_format(&self) -> bool {
        matches!(self, Error::InvalidFormat { .. })
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Returns true if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Returns true if this error is a capacity error.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Error::Capacity { .. })
    }

    /// Returns true if this error is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true if this error is an expiry error.
    pub fn is_expired(&self) -> bool {
        matches!(self, Error::Expired { .. })
    }

    /// Returns true if this error came from an external collaborator.
    pub fn is_collaborator(&self) -> bool {
        self.kind() == ErrorKind::Collaborator
    }

    /// The content-filter category, if this is a rejection.
    pub fn blocked_category(&self) -> Option<&str> {
        match self {
            Error::Blocked { category } => Some(category),
            _ => None,
        }
    }

    /// Returns the status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// A message suitable for showing to the person chatting.
    ///
    /// Collaborator failures are phrased as a request to try again; everything else uses the
    /// [`Display`](fmt::Display) form.
    pub fn user_message(&self) -> String {
        match self {
            Error::Blocked { category } => format!("Content blocked: {category}"),
            Error::Timeout { .. } => {
                "The assistant took too long to answer. Please try again.".to_string()
            }
            Error::Cancelled { .. } => "The request was cancelled.".to_string(),
            Error::RateLimit { .. } => {
                "The assistant is receiving too many requests. Please wait and try again."
                    .to_string()
            }
            err if err.is_collaborator() => {
                format!("I encountered an error: {err}. Please try again.")
            }
            err => err.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration { message, variable } => {
                if let Some(variable) = variable {
                    write!(f, "Configuration error: {message} ({variable})")
                } else {
                    write!(f, "Configuration error: {message}")
                }
            }
            Error::Validation { message, param } => {
                if let Some(param) = param {
                    write!(f, "Validation error: {message} (parameter: {param})")
                } else {
                    write!(f, "Validation error: {message}")
                }
            }
            Error::Blocked { category } => {
                write!(f, "Content blocked: {category}")
            }
            Error::InvalidFormat { format } => {
                write!(f, "Invalid export format: {format}")
            }
            Error::Api {
                message,
                error_type,
                ..
            } => {
                if let Some(error_type) = error_type {
                    write!(f, "{error_type}: {message}")
                } else {
                    write!(f, "API error: {message}")
                }
            }
            Error::Authentication { message } => {
                write!(f, "Authentication error: {message}")
            }
            Error::RateLimit {
                message,
                retry_after,
            } => {
                if let Some(retry_after) = retry_after {
                    write!(
                        f,
                        "Rate limit exceeded: {message} (retry after {retry_after} seconds)"
                    )
                } else {
                    write!(f, "Rate limit exceeded: {message}")
                }
            }
            Error::Timeout { message, duration } => {
                if let Some(duration) = duration {
                    write!(f, "Timeout error: {message} ({duration} seconds)")
                } else {
                    write!(f, "Timeout error: {message}")
                }
            }
            Error::Cancelled { message } => {
                write!(f, "Request cancelled: {message}")
            }
            Error::Connection { message, .. } => {
                write!(f, "Connection error: {message}")
            }
            Error::ServiceUnavailable {
                message,
                retry_after,
            } => {
                if let Some(retry_after) = retry_after {
                    write!(
                        f,
                        "Service unavailable: {message} (retry after {retry_after} seconds)"
                    )
                } else {
                    write!(f, "Service unavailable: {message}")
                }
            }
            Error::MalformedResponse { message } => {
                write!(f, "Malformed response: {message}")
            }
            Error::HttpClient { message, .. } => {
                write!(f, "HTTP client error: {message}")
            }
            Error::Capacity { message, limit } => {
                write!(f, "Capacity exceeded: {message} (limit: {limit})")
            }
            Error::NotFound {
                message,
                resource_type,
                resource_id,
            } => {
                let prefix = if let Some(resource_type) = resource_type {
                    format!("Resource not found ({resource_type})")
                } else {
                    "Resource not found".to_string()
                };

                let suffix = if let Some(resource_id) = resource_id {
                    format!(" [ID: {resource_id}]")
                } else {
                    "".to_string()
                };

                write!(f, "{prefix}: {message}{suffix}")
            }
            Error::Expired {
                message,
                resource_id,
            } => {
                if let Some(resource_id) = resource_id {
                    write!(f, "Expired: {message} [ID: {resource_id}]")
                } else {
                    write!(f, "Expired: {message}")
                }
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
            Error::Url { message, .. } => {
                write!(f, "URL error: {message}")
            }
            Error::Encoding { message, .. } => {
                write!(f, "Encoding error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Connection { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::HttpClient { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Serialization { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            Error::Encoding { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::serialization(format!("YAML error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::encoding(format!("UTF-8 error: {err}"), Some(Box::new(err)))
    }
}

/// A specialized Result type for palaver operations.
pub type Result<T> = std::result::Result<T, Error>;
