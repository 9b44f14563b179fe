//! Error types for the MPD client

use thiserror::Error;

/// Errors that can occur while talking to MPD
#[derive(Debug, Error)]
pub enum MpdError {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server closed the connection
    #[error("Connection closed by server")]
    Closed,

    /// The server sent something that is not valid protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server rejected a command
    #[error("ACK [{code}@{index}] {{{command}}} {message}")]
    Ack {
        code: u32,
        index: u32,
        command: String,
        message: String,
    },

    /// A command argument that cannot be sent safely
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl MpdError {
    /// Parse the part of an `ACK` line after the `ACK ` prefix.
    ///
    /// Format: `[code@index] {command} message`.
    pub(crate) fn from_ack(line: &str) -> Self {
        let parsed = (|| {
            let rest = line.strip_prefix('[')?;
            let (location, rest) = rest.split_once(']')?;
            let (code, index) = location.split_once('@')?;
            let rest = rest.trim_start().strip_prefix('{')?;
            let (command, message) = rest.split_once('}')?;
            Some(MpdError::Ack {
                code: code.parse().ok()?,
                index: index.parse().ok()?,
                command: command.to_string(),
                message: message.trim_start().to_string(),
            })
        })();

        parsed.unwrap_or_else(|| MpdError::Protocol(format!("malformed ACK: {line}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ack() {
        let error = MpdError::from_ack("[50@0] {lsinfo} No such file or directory");
        match &error {
            MpdError::Ack {
                code,
                index,
                command,
                message,
            } => {
                assert_eq!(*code, 50);
                assert_eq!(*index, 0);
                assert_eq!(command, "lsinfo");
                assert_eq!(message, "No such file or directory");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            error.to_string(),
            "ACK [50@0] {lsinfo} No such file or directory"
        );
    }

    #[test]
    fn test_parse_malformed_ack() {
        let error = MpdError::from_ack("garbage");
        assert!(matches!(error, MpdError::Protocol(_)));
        assert_eq!(error.to_string(), "Protocol error: malformed ACK: garbage");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(MpdError::Closed.to_string(), "Connection closed by server");
        assert_eq!(
            MpdError::InvalidArgument("newline".to_string()).to_string(),
            "Invalid argument: newline"
        );
    }
}
