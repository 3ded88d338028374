//! Error types for drivesync

use thiserror::Error;

/// Result type alias for drivesync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for drivesync
#[derive(Error, Debug)]
pub enum Error {
    /// Local I/O failure while hashing a file or extracting its blocks
    #[error("read error: {message}")]
    Read {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Local I/O failure outside of hashing (e.g. writing a signature file)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// The local file changed between signature computation and block extraction
    #[error("source changed: {message}")]
    SourceChanged { message: String },

    /// The remote store refused or failed to open an upload session
    #[error("failed to open upload session: {message}")]
    SessionOpen { message: String },

    /// A chunk or delta payload was not acknowledged
    #[error("transmission failed for session {session_id}: {message}")]
    Transmission { session_id: String, message: String },

    /// The remote store failed to commit the session
    #[error("failed to finalize session {session_id}: {message}")]
    Finalize { session_id: String, message: String },

    /// No usable signature exists for the stored file (recovered by a full upload)
    #[error("signature unavailable for {file_id}: {message}")]
    SignatureUnavailable { file_id: String, message: String },

    /// Network errors (HTTP, connection issues)
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The remote store answered with something we cannot interpret
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Delta plan is internally inconsistent or cannot be replayed
    #[error("delta error: {message}")]
    Delta { message: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,
}

/// Fieldless classification of [`Error`], for callers that branch on the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Read,
    Io,
    SourceChanged,
    SessionOpen,
    Transmission,
    Finalize,
    SignatureUnavailable,
    Network,
    Protocol,
    Delta,
    Config,
    Cancelled,
}

impl Error {
    /// Create a read error with context
    pub fn read(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Read {
            message: message.into(),
            source,
        }
    }

    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a source-changed error
    pub fn source_changed(message: impl Into<String>) -> Self {
        Self::SourceChanged {
            message: message.into(),
        }
    }

    /// Create a session-open error
    pub fn session_open(message: impl Into<String>) -> Self {
        Self::SessionOpen {
            message: message.into(),
        }
    }

    /// Create a transmission error
    pub fn transmission(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transmission {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Create a finalize error
    pub fn finalize(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Finalize {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Create a signature-unavailable error
    pub fn signature_unavailable(file_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SignatureUnavailable {
            file_id: file_id.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a delta error
    pub fn delta(message: impl Into<String>) -> Self {
        Self::Delta {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Read { .. } => ErrorKind::Read,
            Error::Io { .. } => ErrorKind::Io,
            Error::SourceChanged { .. } => ErrorKind::SourceChanged,
            Error::SessionOpen { .. } => ErrorKind::SessionOpen,
            Error::Transmission { .. } => ErrorKind::Transmission,
            Error::Finalize { .. } => ErrorKind::Finalize,
            Error::SignatureUnavailable { .. } => ErrorKind::SignatureUnavailable,
            Error::Network { .. } => ErrorKind::Network,
            Error::Protocol { .. } => ErrorKind::Protocol,
            Error::Delta { .. } => ErrorKind::Delta,
            Error::Config { .. } => ErrorKind::Config,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Check whether restarting the whole upload pipeline could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network { .. }
                | Error::Transmission { .. }
                | Error::Finalize { .. }
                | Error::SourceChanged { .. }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: format!("TOML parse error: {}", err),
        }
    }
}
