//! Error types for netbridge.

use std::io;

use thiserror::Error;

/// Direction of the I/O call that produced a back-end error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Outbound (send/write).
    Send,
    /// Inbound (recv/read).
    Recv,
}

/// Shared transport error taxonomy.
///
/// Every back-end failure is translated into one of these before it leaves
/// the crate; callers never see back-end-native codes. Each variant carries a
/// stable negative code (see [`NetError::code`]) for engines that speak
/// integer return values.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// Operation attempted with no valid socket handle.
    #[error("invalid context: no open connection")]
    InvalidContext,

    /// Peer closed the connection or the pipe broke.
    #[error("connection reset by peer")]
    ConnReset,

    /// Non-recoverable send failure.
    #[error("send failed")]
    SendFailed,

    /// Non-recoverable receive failure.
    #[error("receive failed")]
    RecvFailed,

    /// Line read gave up after repeated would-block retries.
    #[error("receive timed out")]
    RecvTimeout,

    /// Nothing to read right now; try again.
    #[error("would block on read")]
    WantRead,

    /// Cannot write right now; try again.
    #[error("would block on write")]
    WantWrite,

    /// Name resolution failed.
    #[error("name resolution failed")]
    ResolveError,

    /// Deadline exceeded.
    #[error("operation timed out")]
    Timeout,

    /// Low-level connect failed on every attempt.
    #[error("connect failed")]
    ConnectFailed,

    /// A line exceeded the caller's maximum length before its terminator.
    #[error("line too long")]
    LineTooLong,
}

impl NetError {
    /// Stable negative integer code for this error.
    pub fn code(&self) -> i32 {
        match self {
            NetError::InvalidContext => -1,
            NetError::ConnReset => -2,
            NetError::SendFailed => -3,
            NetError::RecvFailed => -4,
            NetError::RecvTimeout => -5,
            NetError::WantRead => -6,
            NetError::WantWrite => -7,
            NetError::ResolveError => -8,
            NetError::Timeout => -9,
            NetError::ConnectFailed => -10,
            NetError::LineTooLong => -11,
        }
    }

    /// Map a code produced by [`NetError::code`] back to the error.
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            -1 => NetError::InvalidContext,
            -2 => NetError::ConnReset,
            -3 => NetError::SendFailed,
            -4 => NetError::RecvFailed,
            -5 => NetError::RecvTimeout,
            -6 => NetError::WantRead,
            -7 => NetError::WantWrite,
            -8 => NetError::ResolveError,
            -9 => NetError::Timeout,
            -10 => NetError::ConnectFailed,
            -11 => NetError::LineTooLong,
            _ => return None,
        };
        Some(err)
    }

    /// Translate a back-end I/O error.
    ///
    /// Would-block and interruption come out as `WantRead`/`WantWrite`; the
    /// I/O engine retries those internally. Reset, abort, broken pipe and
    /// not-connected all mean the peer is gone.
    pub fn from_io(err: &io::Error, direction: Direction) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => match direction {
                Direction::Send => NetError::WantWrite,
                Direction::Recv => NetError::WantRead,
            },
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => NetError::ConnReset,
            io::ErrorKind::TimedOut => NetError::Timeout,
            _ => match direction {
                Direction::Send => NetError::SendFailed,
                Direction::Recv => NetError::RecvFailed,
            },
        }
    }

    /// "Try again" conditions that are not failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, NetError::WantRead | NetError::WantWrite)
    }

    /// Whether the caller should tear the link down and reconnect.
    pub fn requires_reconnect(&self) -> bool {
        !self.is_transient()
    }

    /// Whether this error means the peer dropped the link.
    pub fn is_reset(&self) -> bool {
        matches!(self, NetError::ConnReset)
    }
}

impl From<NetError> for io::Error {
    fn from(err: NetError) -> Self {
        let kind = match err {
            NetError::ConnReset => io::ErrorKind::ConnectionReset,
            NetError::WantRead | NetError::WantWrite => io::ErrorKind::WouldBlock,
            NetError::Timeout | NetError::RecvTimeout => io::ErrorKind::TimedOut,
            NetError::InvalidContext => io::ErrorKind::NotConnected,
            NetError::LineTooLong => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Result type for transport operations.
pub type NetResult<T> = Result<T, NetError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The configuration text is not valid TOML for this schema.
    #[cfg(feature = "config")]
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable_and_negative() {
        let all = [
            NetError::InvalidContext,
            NetError::ConnReset,
            NetError::SendFailed,
            NetError::RecvFailed,
            NetError::RecvTimeout,
            NetError::WantRead,
            NetError::WantWrite,
            NetError::ResolveError,
            NetError::Timeout,
            NetError::ConnectFailed,
            NetError::LineTooLong,
        ];
        for err in all {
            assert!(err.code() < 0);
            assert_eq!(NetError::from_code(err.code()), Some(err));
        }
        assert_eq!(NetError::InvalidContext.code(), -1);
        assert_eq!(NetError::WantWrite.code(), -7);
        assert_eq!(NetError::from_code(0), None);
    }

    #[test]
    fn test_from_io_translation() {
        let would_block = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(NetError::from_io(&would_block, Direction::Recv), NetError::WantRead);
        assert_eq!(NetError::from_io(&would_block, Direction::Send), NetError::WantWrite);

        let pipe = io::Error::from(io::ErrorKind::BrokenPipe);
        assert_eq!(NetError::from_io(&pipe, Direction::Send), NetError::ConnReset);

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(NetError::from_io(&reset, Direction::Recv), NetError::ConnReset);

        let other = io::Error::other("radio fault");
        assert_eq!(NetError::from_io(&other, Direction::Send), NetError::SendFailed);
        assert_eq!(NetError::from_io(&other, Direction::Recv), NetError::RecvFailed);
    }

    #[test]
    fn test_reconnect_policy() {
        assert!(NetError::WantRead.is_transient());
        assert!(!NetError::WantRead.requires_reconnect());
        assert!(NetError::ConnReset.requires_reconnect());
        assert!(NetError::SendFailed.requires_reconnect());
        assert!(NetError::ConnReset.is_reset());
        assert!(!NetError::Timeout.is_reset());
    }

    #[test]
    fn test_into_io_error() {
        let err: io::Error = NetError::ConnReset.into();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        let err: io::Error = NetError::WantRead.into();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
