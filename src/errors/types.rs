//! # Error Types
//!
//! Error types for the resource builder using `thiserror`.

use std::fmt;

/// Custom result type for builder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a build failure.
///
/// Callers use the kind to decide how to report a failed build; the message
/// of the root cause is what ends up in the VirtualService status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Conflict,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::InvalidInput => write!(f, "invalid_input"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Main error type for the resource builder
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Builder configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A referenced store entity is absent
    #[error("{message}")]
    NotFound { resource_type: String, message: String },

    /// Unmarshal/validate failures and malformed user input
    #[error("{message}")]
    InvalidInput { message: String, field: Option<String> },

    /// Mutually incompatible inputs
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Recovered panics and broken internal expectations
    #[error("internal error: {message}")]
    Internal { message: String },

    /// JSON decoding of an opaque blob failed
    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Protobuf decoding of an `Any` payload failed
    #[error("{context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: prost::DecodeError,
    },

    /// A phase prefix wrapped around an inner failure
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a not found error reading "<resource_type> <name> not found"
    pub fn not_found<R: Into<String>, N: fmt::Display>(resource_type: R, name: N) -> Self {
        let resource_type = resource_type.into();
        let message = format!("{} {} not found", resource_type, name);
        Self::NotFound { resource_type, message }
    }

    /// Create a not found error with a custom message
    pub fn missing<R: Into<String>, M: Into<String>>(resource_type: R, message: M) -> Self {
        Self::NotFound { resource_type: resource_type.into(), message: message.into() }
    }

    /// Create an invalid input error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput { message: message.into(), field: None }
    }

    /// Create an invalid input error with field information
    pub fn invalid_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::InvalidInput { message: message.into(), field: Some(field.into()) }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Create a JSON decoding error
    pub fn json<S: Into<String>>(context: S, source: serde_json::Error) -> Self {
        Self::Json { context: context.into(), source }
    }

    /// Create a protobuf decoding error
    pub fn decode<S: Into<String>>(context: S, source: prost::DecodeError) -> Self {
        Self::Decode { context: context.into(), source }
    }

    /// Wrap this error with a context prefix
    pub fn wrap<S: Into<String>>(self, context: S) -> Self {
        Self::Context { context: context.into(), source: Box::new(self) }
    }

    /// Classify the error, looking through context wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Context { source, .. } => source.kind(),
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Internal { .. } => ErrorKind::Internal,
            Error::Config { .. }
            | Error::InvalidInput { .. }
            | Error::Json { .. }
            | Error::Decode { .. } => ErrorKind::InvalidInput,
        }
    }

    /// The innermost error of a context chain.
    ///
    /// Its message is short enough for a status field; the full chain is
    /// what gets logged.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Adds phase context to fallible results.
pub trait ResultExt<T> {
    /// Prefix the error with a fixed context string
    fn context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Prefix the error with a lazily formatted context string
    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| e.wrap(context))
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| e.wrap(f()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::json("JSON serialization failed", error)
    }
}

impl From<prost::DecodeError> for Error {
    fn from(error: prost::DecodeError) -> Self {
        Self::decode("protobuf decoding failed", error)
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let message = fields
            .iter()
            .map(|(field, field_errors)| {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::invalid(format!("Validation failed: {}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = Error::config("Test configuration error");
        assert!(matches!(error, Error::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_not_found_message() {
        let error = Error::not_found("listener", "default/http");
        assert_eq!(error.to_string(), "listener default/http not found");
        assert_eq!(error.kind(), ErrorKind::NotFound);

        let error = Error::missing("secret", "can't find secret for domain a.example.com");
        assert_eq!(error.to_string(), "can't find secret for domain a.example.com");
    }

    #[test]
    fn test_conflict_prefix() {
        let error = Error::conflict("virtual host is set, but filter chains are found in listener");
        assert_eq!(
            error.to_string(),
            "conflict: virtual host is set, but filter chains are found in listener"
        );
    }

    #[test]
    fn test_context_chain_and_root_cause() {
        let result: Result<()> = Err(Error::invalid("rbac action is empty"));
        let error = result
            .context("failed to build HTTP filters")
            .context("MainBuilder.BuildResources failed")
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "MainBuilder.BuildResources failed: failed to build HTTP filters: rbac action is empty"
        );
        assert_eq!(error.root_cause().to_string(), "rbac action is empty");
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_kind_looks_through_context() {
        let cases = [
            (Error::invalid("test"), ErrorKind::InvalidInput),
            (Error::not_found("cluster", "test"), ErrorKind::NotFound),
            (Error::conflict("test"), ErrorKind::Conflict),
            (Error::internal("test"), ErrorKind::Internal),
        ];
        for (error, kind) in cases {
            let message = error.to_string();
            let wrapped = error.wrap("failed to build clusters").wrap("MainBuilder.BuildResources failed");
            assert_eq!(wrapped.kind(), kind);
            assert_eq!(wrapped.root_cause().to_string(), message);
        }
    }

    #[test]
    fn test_error_conversions() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: Error = json_error.into();
        assert!(matches!(error, Error::Json { .. }));
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(ErrorKind::Conflict.to_string(), "conflict");
    }
}
