//! Close status codes (RFC 6455 Section 7.4) and the record of how a connection ended.

/// Status code carried by a close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000, the purpose of the connection has been fulfilled.
    Normal,
    /// 1001, an endpoint is going away.
    Away,
    /// 1002, protocol error.
    Protocol,
    /// 1003, a data type the endpoint cannot accept.
    Unsupported,
    /// 1005, no status code was present. Never sent on the wire.
    Status,
    /// 1006, the connection closed without a close frame. Never sent on the wire.
    Abnormal,
    /// 1007, message data inconsistent with its type (e.g. invalid UTF-8 text).
    Invalid,
    /// 1008, policy violation.
    Policy,
    /// 1009, message too big to process.
    Size,
    /// 1010, the client expected an extension the server did not negotiate.
    Extension,
    /// 1011, unexpected condition on the server.
    Error,
    /// 1012, service restart.
    Restart,
    /// 1013, try again later.
    Again,
    /// 1015, TLS handshake failure. Never sent on the wire.
    Tls,
    /// Any other code: reserved (1004, 1016-2999), registered (3000-3999) or private (4000-4999).
    Other(u16),
}

impl CloseCode {
    /// Whether this code may appear in a close frame received from a peer.
    pub fn is_allowed(self) -> bool {
        match self {
            Self::Status | Self::Abnormal | Self::Tls => false,
            Self::Other(code) => (3000..5000).contains(&code),
            _ => true,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            1015 => Self::Tls,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Other(code) => code,
        }
    }
}

/// How the most recent connection ended.
///
/// `code` is `0` and `reason` empty until a close is observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebSocketCloseInfo {
    pub code: u16,
    pub reason: String,
}

impl WebSocketCloseInfo {
    pub fn new(code: impl Into<u16>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_roundtrip() {
        for code in [1000u16, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011] {
            assert_eq!(u16::from(CloseCode::from(code)), code);
        }
        assert_eq!(CloseCode::from(4001), CloseCode::Other(4001));
    }

    #[test]
    fn test_allowed_codes() {
        assert!(CloseCode::Normal.is_allowed());
        assert!(CloseCode::Size.is_allowed());
        assert!(CloseCode::Other(3000).is_allowed());
        assert!(CloseCode::Other(4999).is_allowed());

        assert!(!CloseCode::Status.is_allowed());
        assert!(!CloseCode::Abnormal.is_allowed());
        assert!(!CloseCode::Other(1004).is_allowed());
        assert!(!CloseCode::Other(999).is_allowed());
        assert!(!CloseCode::Other(5000).is_allowed());
    }

    #[test]
    fn test_default_close_info() {
        let info = WebSocketCloseInfo::default();
        assert_eq!(info.code, 0);
        assert!(info.reason.is_empty());

        let info = WebSocketCloseInfo::new(CloseCode::Normal, "Normal closure");
        assert_eq!(info.code, 1000);
    }
}
