//! Crate-wide error type and its mapping onto the stable `Rerror` wire strings.

use std::fmt;
use std::io;

/// Every distinguishable failure a session or backend can report.
///
/// Each variant carries its own fixed wire string (see [`ErrorKind::message`]);
/// unlike an errno, the string is the wire representation itself, so there is
/// only one place (this file) that needs to agree with the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedMessage,
    UnknownType,
    BadVersionOrder,
    FidInUse,
    UnknownFid,
    NoFids,
    NoTags,
    WalkTooLong,
    BadName,
    NotFound,
    IsDir,
    NotDir,
    AlreadyOpen,
    BadOpenMode,
    BadDirOffset,
    Denied,
    Exists,
    NoSpace,
    NotEmpty,
    AuthRequired,
    AuthNotRequired,
    Io,
}

impl ErrorKind {
    /// The exact string placed in an `Rerror.ename` for this kind.
    pub fn message(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            MalformedMessage => "bad message",
            UnknownType => "unknown message type",
            BadVersionOrder => "version not negotiated",
            FidInUse => "fid in use",
            UnknownFid => "unknown fid",
            NoFids => "no free fids",
            NoTags => "no free tags",
            WalkTooLong => "walk depth exceeds limit",
            BadName => "illegal name",
            NotFound => "file does not exist",
            IsDir => "is a directory",
            NotDir => "not a directory",
            AlreadyOpen => "fid already open",
            BadOpenMode => "bad open mode",
            BadDirOffset => "bad directory offset",
            Denied => "permission denied",
            Exists => "file exists",
            NoSpace => "no space",
            NotEmpty => "directory not empty",
            AuthRequired => "authentication required",
            AuthNotRequired => "authentication not required",
            Io => "i/o error",
        }
    }
}

/// The crate's single error type: either a classified protocol/backend
/// failure or a transparent I/O failure from a transport.
#[derive(Debug)]
pub enum Error {
    Proto(ErrorKind),
    Io(io::Error),
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error::Proto(kind)
    }

    /// The string that belongs on the wire in an `Rerror` for this error.
    pub fn wire_message(&self) -> String {
        match self {
            Error::Proto(kind) => kind.message().to_owned(),
            Error::Io(_) => ErrorKind::Io.message().to_owned(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Proto(kind) => write!(f, "{}", kind.message()),
            Error::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Proto(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::Proto(kind)
    }
}

/// Shorthand for constructing an `Err(Error::Proto(kind))`.
#[macro_export]
macro_rules! proto_err {
    ($kind:ident) => {
        Err($crate::error::Error::Proto($crate::error::ErrorKind::$kind))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_messages_match_table() {
        assert_eq!(ErrorKind::FidInUse.message(), "fid in use");
        assert_eq!(ErrorKind::NotFound.message(), "file does not exist");
        assert_eq!(ErrorKind::BadDirOffset.message(), "bad directory offset");
    }

    #[test]
    fn unknown_io_error_maps_to_io_error_string() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "disk gone").into();
        assert_eq!(err.wire_message(), "i/o error");
    }
}
