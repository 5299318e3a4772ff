//! Error types for the performance test engine.
//!
//! Defines [`LoadTestError`] for configuration, engine and report errors, and
//! [`OperationError`] for failures of the unit of work under test. Operation
//! errors never escape a run: they are recorded as failed samples and counted
//! by [`OperationError::kind`].

/// Errors that reject or abort a whole test run.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    /// TOML parse failure -- the config file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse config TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// Semantic validation failure -- the config parsed successfully but
    /// contains invalid values (e.g., zero users, zero step size).
    #[error("Config validation error: {message}")]
    ConfigValidation { message: String },

    /// A config could not be rendered back to TOML.
    #[error("Failed to serialize config TOML: {source}")]
    ConfigSerialize {
        #[from]
        source: toml::ser::Error,
    },

    /// File I/O failure -- the config file could not be read from disk.
    #[error("Failed to read config file '{path}': {source}")]
    ConfigIo {
        source: std::io::Error,
        path: String,
    },

    /// Internal engine bug (worker panic, inconsistent recorder state).
    ///
    /// Never produced by a failing operation.
    #[error("Engine fault: {message}")]
    EngineFault { message: String },

    /// The JSON report could not be serialized or written.
    #[error("Failed to write report '{path}': {message}")]
    Report { path: String, message: String },
}

impl LoadTestError {
    /// Shorthand for a [`LoadTestError::ConfigValidation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`LoadTestError::EngineFault`] error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::EngineFault {
            message: message.into(),
        }
    }

    /// Returns `true` if the run was rejected before any worker started.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse { .. } | Self::ConfigValidation { .. } | Self::ConfigIo { .. }
        )
    }
}

/// Failure reported by the unit of work under test.
///
/// Each variant represents a distinct error category that the metrics pipeline
/// counts and reports separately.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Non-success HTTP status returned by the target.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The operation exceeded its own timeout.
    #[error("Operation timed out")]
    Timeout,

    /// Connection-level failure (DNS resolution, TCP connect, TLS handshake).
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Any other failure raised by the operation (assertion, page error, ...).
    #[error("Operation failed: {message}")]
    Failed { message: String },
}

impl OperationError {
    /// Convenience constructor for [`OperationError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Returns the error category recorded as a sample's `error_kind`.
    ///
    /// Categories: `"http"`, `"timeout"`, `"connection"`, `"failed"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Timeout => "timeout",
            Self::Connection { .. } => "connection",
            Self::Failed { .. } => "failed",
        }
    }

    /// Classify a [`reqwest::Error`] into the appropriate [`OperationError`] variant.
    pub fn classify_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Connection {
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_http() {
        let err = OperationError::Http {
            status: 503,
            body: "Service Unavailable".to_string(),
        };
        assert_eq!(err.kind(), "http");
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
    }

    #[test]
    fn test_kind_timeout() {
        assert_eq!(OperationError::Timeout.kind(), "timeout");
    }

    #[test]
    fn test_kind_connection() {
        let err = OperationError::Connection {
            message: "DNS resolution failed".to_string(),
        };
        assert_eq!(err.kind(), "connection");
    }

    #[test]
    fn test_kind_failed() {
        let err = OperationError::failed("selector not found");
        assert_eq!(err.kind(), "failed");
        assert_eq!(err.to_string(), "Operation failed: selector not found");
    }

    #[test]
    fn test_configuration_errors_are_classified() {
        assert!(LoadTestError::validation("users must be > 0").is_configuration_error());
        assert!(!LoadTestError::engine("worker panicked").is_configuration_error());
    }

    #[test]
    fn test_toml_error_converts() {
        let parse = toml::from_str::<toml::Value>("= nope").unwrap_err();
        let err: LoadTestError = parse.into();
        assert!(err.to_string().starts_with("Failed to parse config TOML"));
    }

    #[test]
    fn test_toml_serialize_error_is_not_a_rejection() {
        let ser = <toml::ser::Error as serde::ser::Error>::custom("unsupported value");
        let err: LoadTestError = ser.into();
        assert!(matches!(err, LoadTestError::ConfigSerialize { .. }));
        assert!(err.to_string().starts_with("Failed to serialize config TOML"));
        assert!(!err.is_configuration_error());
    }
}
