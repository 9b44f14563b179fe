//! Where to find the MPD server.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::MpdError;

/// Port MPD listens on when none is given.
pub const DEFAULT_PORT: u16 = 6600;

/// A TCP endpoint or a local Unix socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MpdAddress {
    /// `host:port`
    Tcp(String),
    /// Path to a Unix domain socket
    Unix(PathBuf),
}

impl Default for MpdAddress {
    fn default() -> Self {
        MpdAddress::Tcp(format!("localhost:{DEFAULT_PORT}"))
    }
}

impl FromStr for MpdAddress {
    type Err = MpdError;

    /// A leading `/` selects a Unix socket; anything else is a TCP host with
    /// an optional port.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MpdError::InvalidArgument("empty MPD address".to_string()));
        }
        if s.starts_with('/') {
            return Ok(MpdAddress::Unix(PathBuf::from(s)));
        }
        if has_port(s) {
            Ok(MpdAddress::Tcp(s.to_string()))
        } else {
            Ok(MpdAddress::Tcp(format!("{s}:{DEFAULT_PORT}")))
        }
    }
}

/// `host:port`, `[v6]:port` and bare IPv6 literals are told apart here.
fn has_port(s: &str) -> bool {
    if let Some(rest) = s.strip_prefix('[') {
        return rest
            .split_once(']')
            .is_some_and(|(_, tail)| tail.starts_with(':'));
    }
    matches!(s.matches(':').count(), 1)
}

impl fmt::Display for MpdAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpdAddress::Tcp(address) => f.write_str(address),
            MpdAddress::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("localhost", MpdAddress::Tcp("localhost:6600".into()))]
    #[case("localhost:6601", MpdAddress::Tcp("localhost:6601".into()))]
    #[case("10.0.0.2:6600", MpdAddress::Tcp("10.0.0.2:6600".into()))]
    #[case("[::1]:6600", MpdAddress::Tcp("[::1]:6600".into()))]
    #[case("[::1]", MpdAddress::Tcp("[::1]:6600".into()))]
    #[case("/run/mpd/socket", MpdAddress::Unix("/run/mpd/socket".into()))]
    fn test_parse_address(#[case] input: &str, #[case] expected: MpdAddress) {
        assert_eq!(input.parse::<MpdAddress>().unwrap(), expected);
    }

    #[test]
    fn test_empty_address_is_rejected() {
        assert!(matches!(
            "  ".parse::<MpdAddress>(),
            Err(MpdError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(MpdAddress::default().to_string(), "localhost:6600");
        assert_eq!(
            MpdAddress::Unix("/run/mpd/socket".into()).to_string(),
            "/run/mpd/socket"
        );
    }
}
