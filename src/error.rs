use std::fmt;
use std::io;

use thiserror::Error;

use crate::names::NameKind;
use crate::{ObjectPathError, SignatureError};

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }

    /// A decode error at the given byte offset into the message.
    #[inline]
    pub(crate) fn decode(reason: impl Into<String>, offset: usize) -> Error {
        Self::new(ErrorKind::Decode {
            reason: reason.into(),
            offset,
        })
    }

    /// An encode error with the given reason.
    #[inline]
    pub(crate) fn encode(reason: impl Into<String>) -> Error {
        Self::new(ErrorKind::Encode(reason.into()))
    }

    /// An authentication failure with the given reason.
    #[inline]
    pub(crate) fn auth(reason: impl Into<String>) -> Error {
        Self::new(ErrorKind::Auth(reason.into()))
    }

    /// Test if the error is a retryable write-buffer overflow.
    #[inline]
    pub(crate) fn is_buffer_full(&self) -> bool {
        matches!(self.kind, ErrorKind::BufferFull)
    }

    #[cfg(test)]
    pub(crate) fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl std::error::Error for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock => Self::new(ErrorKind::WouldBlock),
            _ => Self::new(ErrorKind::Io(error)),
        }
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<ObjectPathError> for Error {
    #[inline]
    fn from(error: ObjectPathError) -> Self {
        Self::new(ErrorKind::ObjectPath(error))
    }
}

#[derive(Debug, Error)]
pub(crate) enum ErrorKind {
    /// Address syntactically unsound or semantically unusable here.
    #[error("invalid d-bus address: {0}")]
    InvalidAddress(String),
    /// Address names a transport this implementation does not support.
    #[error("unsupported transport `{0}`")]
    UnknownTransport(String),
    /// OS-level connect, socket or name resolution failure.
    #[error("connecting to `{address}` failed")]
    Connect {
        address: String,
        #[source]
        inner: io::Error,
    },
    /// The autolaunch subprocess failed.
    #[error("launcher failed: {0}")]
    Launcher(String),
    /// Authentication negotiation failed.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Wire data violates the protocol.
    #[error("decode error at offset {offset}: {reason}")]
    Decode { reason: String, offset: usize },
    /// A message or value cannot be represented on the wire.
    #[error("encode error: {0}")]
    Encode(String),
    /// A bus, interface, member, error or path name fails validation.
    #[error("invalid {kind} name `{name}`: {why}")]
    InvalidName {
        kind: NameKind,
        name: String,
        why: &'static str,
    },
    #[error("signature error")]
    Signature(#[source] SignatureError),
    #[error("object path error")]
    ObjectPath(#[source] ObjectPathError),
    /// Raw read or write failure on the underlying stream.
    #[error("i/o error")]
    Io(#[source] io::Error),
    /// The operation was cancelled and the transport is poisoned.
    #[error("operation cancelled")]
    Cancelled,
    /// Internal marker for nonblocking retries, never surfaced.
    #[error("operation would block")]
    WouldBlock,
    /// The write buffer reached its capacity; retry after growing.
    #[error("write buffer is full")]
    BufferFull,
    /// The transport has been shut down.
    #[error("transport is shut down")]
    Shutdown,
}
