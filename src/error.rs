use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportErrorCode {
    /// Push-channel connect/read failure. Recovered locally by the
    /// reconnect loop and never surfaced to query consumers.
    Connection,
    /// Server-reported error payload or non-success HTTP status.
    Remote,
    /// Malformed filter or value detected before any network I/O.
    Encoding,
    InvalidArgument,
}

impl TransportErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorCode::Connection => "transporter/connection",
            TransportErrorCode::Remote => "transporter/remote",
            TransportErrorCode::Encoding => "transporter/encoding",
            TransportErrorCode::InvalidArgument => "transporter/invalid-argument",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransportError {
    pub code: TransportErrorCode,
    message: String,
}

impl TransportError {
    pub fn new(code: TransportErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for TransportError {}

pub type TransportResult<T> = Result<T, TransportError>;

pub fn connection_error(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorCode::Connection, message)
}

pub fn remote_error(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorCode::Remote, message)
}

pub fn encoding_error(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorCode::Encoding, message)
}

pub fn invalid_argument(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorCode::InvalidArgument, message)
}
