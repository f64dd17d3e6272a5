use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The operation was attempted on a closed connection.
    #[error("connection is closed")]
    Closed,

    /// The payload does not fit into a single packet alongside the header;
    /// the protocol does not fragment.
    #[error("payload of {len} bytes exceeds the maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// The transport accepted fewer bytes than the packet contains.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

impl ConnectionError {
    /// EOF-like transport failures are soft: they are swallowed on transmit
    /// and end a retransmit pass cleanly instead of being reported.
    pub fn is_eof_like(&self) -> bool {
        match self {
            ConnectionError::Transport(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::unexpected_eof(io::ErrorKind::UnexpectedEof, true)]
    #[case::connection_reset(io::ErrorKind::ConnectionReset, true)]
    #[case::not_connected(io::ErrorKind::NotConnected, true)]
    #[case::permission_denied(io::ErrorKind::PermissionDenied, false)]
    #[case::other(io::ErrorKind::Other, false)]
    fn test_is_eof_like_transport(#[case] kind: io::ErrorKind, #[case] expected: bool) {
        let error = ConnectionError::Transport(io::Error::from(kind));
        assert_eq!(error.is_eof_like(), expected);
    }

    #[test]
    fn test_non_transport_errors_are_not_eof_like() {
        assert!(!ConnectionError::Closed.is_eof_like());
        assert!(!ConnectionError::ShortWrite { written: 3, expected: 9 }.is_eof_like());
    }
}
