//! A single MPD protocol connection.

use std::fmt;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::address::MpdAddress;
use crate::error::MpdError;
use crate::response::Attrs;

trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

type BoxedTransport = Box<dyn Transport>;

struct Io {
    reader: BufReader<ReadHalf<BoxedTransport>>,
    writer: WriteHalf<BoxedTransport>,
}

/// An open, greeted MPD connection.
///
/// Commands are serialised through an internal lock, so the connection can
/// be shared behind an `Arc` and every call sees a complete response. A
/// command future that is dropped halfway leaves the stream out of sync; the
/// connection should then be discarded.
pub struct MpdConnection {
    io: Mutex<Io>,
    protocol_version: String,
}

impl MpdConnection {
    /// Open a socket to `address` and read the server greeting.
    pub async fn connect(address: &MpdAddress) -> Result<Self, MpdError> {
        tracing::debug!("Connecting to MPD at {}", address);
        match address {
            MpdAddress::Tcp(host) => {
                let stream = TcpStream::connect(host.as_str()).await?;
                stream.set_nodelay(true)?;
                Self::handshake(stream).await
            }
            #[cfg(unix)]
            MpdAddress::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Self::handshake(stream).await
            }
            #[cfg(not(unix))]
            MpdAddress::Unix(path) => Err(MpdError::InvalidArgument(format!(
                "Unix sockets are not supported on this platform: {}",
                path.display()
            ))),
        }
    }

    /// Wrap an already open stream and read the `OK MPD <version>` greeting.
    pub async fn handshake<S>(stream: S) -> Result<Self, MpdError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let stream: BoxedTransport = Box::new(stream);
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let greeting = read_line(&mut reader).await?;
        let protocol_version = greeting
            .strip_prefix("OK MPD ")
            .ok_or_else(|| MpdError::Protocol(format!("unexpected greeting: {greeting}")))?
            .to_string();

        tracing::debug!("MPD protocol version {}", protocol_version);

        Ok(Self {
            io: Mutex::new(Io { reader, writer }),
            protocol_version,
        })
    }

    /// Protocol version announced in the greeting.
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Send one command line and collect the response up to `OK`.
    pub async fn execute(&self, command: &str) -> Result<Attrs, MpdError> {
        if command.contains('\n') {
            return Err(MpdError::InvalidArgument(
                "command must be a single line".to_string(),
            ));
        }

        let mut io = self.io.lock().await;
        tracing::trace!("MPD command: {}", command);

        io.writer.write_all(command.as_bytes()).await?;
        io.writer.write_all(b"\n").await?;
        io.writer.flush().await?;

        let mut attrs = Attrs::new();
        loop {
            let line = read_line(&mut io.reader).await?;
            if line == "OK" {
                return Ok(attrs);
            }
            if let Some(ack) = line.strip_prefix("ACK ") {
                return Err(MpdError::from_ack(ack));
            }
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| MpdError::Protocol(format!("malformed response line: {line}")))?;
            attrs.push(key, value);
        }
    }

    /// No-op round trip.
    pub async fn ping(&self) -> Result<(), MpdError> {
        self.execute("ping").await.map(|_| ())
    }

    /// Player and queue status (`playlist`, `playlistlength`, `state`, ...).
    pub async fn status(&self) -> Result<Attrs, MpdError> {
        self.execute("status").await
    }

    /// Queue positions changed since playlist `version`, one record per
    /// position with `cpos` and `Id`.
    pub async fn changed_positions(&self, version: u32) -> Result<Vec<Attrs>, MpdError> {
        self.changed_positions_in(version, None, None).await
    }

    /// Like [`changed_positions`](Self::changed_positions), restricted to a
    /// window of the queue. `end` is exclusive and requires `start`.
    pub async fn changed_positions_in(
        &self,
        version: u32,
        start: Option<u32>,
        end: Option<u32>,
    ) -> Result<Vec<Attrs>, MpdError> {
        let command = match (start, end) {
            (None, None) => format!("plchangesposid {version}"),
            (Some(start), None) => format!("plchangesposid {version} {start}"),
            (Some(start), Some(end)) => format!("plchangesposid {version} {start}:{end}"),
            (None, Some(_)) => {
                return Err(MpdError::InvalidArgument(
                    "range end given without a start".to_string(),
                ))
            }
        };
        Ok(self.execute(&command).await?.split_records("cpos"))
    }

    /// Block until one or more subsystems change and return their names.
    ///
    /// The connection cannot serve other commands while this is pending.
    pub async fn idle(&self) -> Result<Vec<String>, MpdError> {
        let attrs = self.execute("idle").await?;
        Ok(attrs
            .iter()
            .filter(|(key, _)| *key == "changed")
            .map(|(_, value)| value.to_string())
            .collect())
    }

    /// Metadata for a single song path, or `None` if `path` names no song.
    pub async fn list_info(&self, path: &str) -> Result<Option<Attrs>, MpdError> {
        let command = format!("lsinfo {}", quote(path)?);
        let attrs = self.execute(&command).await?;
        Ok(attrs.split_records("file").into_iter().next())
    }
}

impl fmt::Debug for MpdConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpdConnection")
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

async fn read_line<R>(reader: &mut R) -> Result<String, MpdError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(MpdError::Closed);
    }
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

/// Quote a command argument, escaping `"` and `\`.
pub fn quote(arg: &str) -> Result<String, MpdError> {
    if arg.contains('\n') {
        return Err(MpdError::InvalidArgument(format!(
            "argument contains a newline: {arg:?}"
        )));
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Ok(quoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::task::JoinHandle;

    /// Plays the server side: sends the greeting, then for each expected
    /// command line answers with the scripted reply.
    fn scripted_server(
        stream: DuplexStream,
        script: Vec<(&'static str, &'static str)>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (reader, mut writer) = tokio::io::split(stream);
            let mut reader = BufReader::new(reader);
            writer.write_all(b"OK MPD 0.23.5\n").await.unwrap();
            for (expected, reply) in script {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                assert_eq!(line.trim_end(), expected);
                writer.write_all(reply.as_bytes()).await.unwrap();
            }
        })
    }

    async fn connect(script: Vec<(&'static str, &'static str)>) -> (MpdConnection, JoinHandle<()>) {
        let (client, server) = duplex(4096);
        let server = scripted_server(server, script);
        let connection = MpdConnection::handshake(client).await.unwrap();
        (connection, server)
    }

    #[tokio::test]
    async fn test_handshake_reads_version() {
        let (connection, server) = connect(vec![]).await;
        assert_eq!(connection.protocol_version(), "0.23.5");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_greeting() {
        let (client, mut server) = duplex(256);
        server.write_all(b"HELLO\n").await.unwrap();
        let err = MpdConnection::handshake(client).await.unwrap_err();
        assert!(matches!(err, MpdError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_status() {
        let (connection, server) = connect(vec![(
            "status",
            "volume: 40\nplaylist: 12\nplaylistlength: 9\nstate: play\nOK\n",
        )])
        .await;

        let status = connection.status().await.unwrap();
        assert_eq!(status.get("playlist"), Some("12"));
        assert_eq!(status.get("playlistlength"), Some("9"));
        assert_eq!(status.get("state"), Some("play"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_changed_positions() {
        let (connection, server) = connect(vec![(
            "plchangesposid 5",
            "cpos: 10\nId: 31\ncpos: 11\nId: 32\nOK\n",
        )])
        .await;

        let records = connection.changed_positions(5).await.unwrap();
        let positions: Vec<_> = records.iter().map(|r| r.get("cpos").unwrap()).collect();
        assert_eq!(positions, vec!["10", "11"]);
        server.await.unwrap();
    }

    #[rstest]
    #[case(Some(2), None, "plchangesposid 7 2")]
    #[case(Some(2), Some(9), "plchangesposid 7 2:9")]
    #[tokio::test]
    async fn test_changed_positions_window(
        #[case] start: Option<u32>,
        #[case] end: Option<u32>,
        #[case] expected: &'static str,
    ) {
        let (connection, server) = connect(vec![(expected, "OK\n")]).await;
        let records = connection.changed_positions_in(7, start, end).await.unwrap();
        assert!(records.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_changed_positions_rejects_open_start() {
        let (connection, _server) = connect(vec![]).await;
        let err = connection
            .changed_positions_in(7, None, Some(3))
            .await
            .unwrap_err();
        assert!(matches!(err, MpdError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_idle() {
        let (connection, server) = connect(vec![(
            "idle",
            "changed: playlist\nchanged: player\nOK\n",
        )])
        .await;

        assert_eq!(connection.idle().await.unwrap(), vec!["playlist", "player"]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_list_info_quotes_path() {
        let (connection, server) = connect(vec![(
            r#"lsinfo "Artist/Say \"Hi\".flac""#,
            "file: Artist/Say \"Hi\".flac\nTitle: Say \"Hi\"\nduration: 201.5\nOK\n",
        )])
        .await;

        let song = connection
            .list_info(r#"Artist/Say "Hi".flac"#)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(song.get("Title"), Some("Say \"Hi\""));
        assert_eq!(song.get("duration"), Some("201.5"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_list_info_of_directory_is_none() {
        let (connection, server) = connect(vec![(
            r#"lsinfo "Artist""#,
            "directory: Artist/Album\nOK\n",
        )])
        .await;

        assert_eq!(connection.list_info("Artist").await.unwrap(), None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_is_an_error() {
        let (connection, server) = connect(vec![(
            r#"lsinfo "missing""#,
            "ACK [50@0] {lsinfo} No such directory\n",
        )])
        .await;

        let err = connection.list_info("missing").await.unwrap_err();
        assert!(matches!(err, MpdError::Ack { code: 50, .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_after_server_hangup() {
        let (connection, server) = connect(vec![]).await;
        server.await.unwrap();
        assert!(matches!(connection.ping().await, Err(MpdError::Closed) | Err(MpdError::Io(_))));
    }

    #[rstest]
    #[case("plain", "\"plain\"")]
    #[case("with space", "\"with space\"")]
    #[case(r#"a"b"#, r#""a\"b""#)]
    #[case(r"a\b", r#""a\\b""#)]
    fn test_quote(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(quote(input).unwrap(), expected);
    }

    #[test]
    fn test_quote_rejects_newline() {
        assert!(matches!(quote("a\nb"), Err(MpdError::InvalidArgument(_))));
    }
}
