use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use tracing::error;

use crate::types::ErrorResponse;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    SelfRequest,
    DuplicateRequest,
    TargetNotFound,
    ConnectionNotFound,
    AlreadyAccepted,
    StorageFailure,
    Unauthenticated,
    UserNotFound,
    UsernameTaken,
    ConfigReadError,
    ConfigParseError,
    IOError,
    ParseError,
}

#[derive(Debug, Serialize)]
pub struct Error {
    kind: ErrorKind,
    details: Option<String>,
    #[serde(skip)]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    #[inline]
    pub fn new(
        kind: ErrorKind,
        details: impl Into<String>,
        source: impl StdError + 'static + Send + Sync,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            details: Some(details.into()),
        }
    }

    #[inline]
    pub fn with_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            details: None,
        }
    }

    #[inline]
    pub fn with_details(kind: ErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            source: None,
            details: Some(details.into()),
        }
    }

    #[inline]
    pub fn self_request() -> Self {
        Self::with_kind(ErrorKind::SelfRequest)
    }

    #[inline]
    pub fn duplicate_request() -> Self {
        Self::with_kind(ErrorKind::DuplicateRequest)
    }

    #[inline]
    pub fn target_not_found(details: impl Into<String>) -> Self {
        Self::with_details(ErrorKind::TargetNotFound, details)
    }

    #[inline]
    pub fn connection_not_found(details: impl Into<String>) -> Self {
        Self::with_details(ErrorKind::ConnectionNotFound, details)
    }

    #[inline]
    pub fn already_accepted() -> Self {
        Self::with_kind(ErrorKind::AlreadyAccepted)
    }

    #[inline]
    pub fn storage(details: impl Into<String>) -> Self {
        Self::with_details(ErrorKind::StorageFailure, details)
    }

    #[inline]
    pub fn unauthenticated(details: impl Into<String>) -> Self {
        Self::with_details(ErrorKind::Unauthenticated, details)
    }

    #[inline]
    pub fn user_not_found(details: impl Into<String>) -> Self {
        Self::with_details(ErrorKind::UserNotFound, details)
    }

    #[inline]
    pub fn username_taken(username: impl Into<String>) -> Self {
        Self::with_details(ErrorKind::UsernameTaken, username)
    }

    pub fn config_read(error: std::io::Error) -> Self {
        Self::new(ErrorKind::ConfigReadError, error.to_string(), error)
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// The text handed back to the caller. Internal details stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::SelfRequest => "You cannot send a friend request to yourself.",
            ErrorKind::DuplicateRequest => "Friend request already sent.",
            ErrorKind::TargetNotFound | ErrorKind::UserNotFound => "User not found.",
            ErrorKind::ConnectionNotFound => "Friend request not found.",
            ErrorKind::AlreadyAccepted => "Friend request already accepted.",
            ErrorKind::Unauthenticated => "Authentication credentials were not provided.",
            ErrorKind::UsernameTaken => "A user with that username already exists.",
            ErrorKind::StorageFailure
            | ErrorKind::ConfigReadError
            | ErrorKind::ConfigParseError
            | ErrorKind::IOError
            | ErrorKind::ParseError => "Something went wrong, please try again.",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{:?}: {}", self.kind, details),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<Error> for ErrorResponse {
    fn from(e: Error) -> Self {
        if e.kind == ErrorKind::StorageFailure {
            error!("storage failure surfaced to caller: {:?}", e);
        }
        ErrorResponse {
            error: e.user_message().to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::new(ErrorKind::IOError, value.to_string(), value)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(value: serde_yaml::Error) -> Self {
        Self::new(ErrorKind::ConfigParseError, value.to_string(), value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::new(ErrorKind::ParseError, value.to_string(), value)
    }
}

// every database error is transient from the caller's point of view
impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Self::new(ErrorKind::StorageFailure, value.to_string(), value)
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        Self::new(ErrorKind::StorageFailure, value.to_string(), value)
    }
}
