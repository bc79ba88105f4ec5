//! Transport-level fault injection.
//!
//! A fault replaces normal delivery entirely: nothing goes through the status,
//! header or body path of the transport. Faults never report errors back to
//! the caller; a failure while simulating one is only logged.

use crate::transport::RawConnection;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io;
use tracing::{debug, warn};

/// Head sent before the broken chunk. Declares chunked framing so the client
/// tries to parse what follows.
const CHUNKED_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";

/// Not a valid chunk: no hex size line, no CRLF framing.
const MALFORMED_CHUNK: &[u8] = b"lskdu018973t09sylgasjkfg1][]'./.sdlv";

const RANDOM_DATA_LEN: usize = 2000;

/// Injected transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Fault {
    /// Abort the connection so the client sees a reset.
    ConnectionResetByPeer,
    /// Close the connection without sending anything.
    EmptyResponse,
    /// Send a valid status line, then garbage where a chunk should be.
    MalformedResponseChunk,
    /// Send random bytes, then close.
    RandomDataThenClose,
}

impl Fault {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fault::ConnectionResetByPeer => "CONNECTION_RESET_BY_PEER",
            Fault::EmptyResponse => "EMPTY_RESPONSE",
            Fault::MalformedResponseChunk => "MALFORMED_RESPONSE_CHUNK",
            Fault::RandomDataThenClose => "RANDOM_DATA_THEN_CLOSE",
        }
    }

    /// Act out the fault on the raw connection.
    pub async fn apply(&self, connection: &mut dyn RawConnection) {
        debug!(fault = self.as_str(), "Injecting fault");
        if let Err(e) = self.try_apply(connection).await {
            warn!(fault = self.as_str(), error = %e, "Fault simulation failed");
        }
    }

    async fn try_apply(&self, connection: &mut dyn RawConnection) -> io::Result<()> {
        match self {
            Fault::ConnectionResetByPeer => connection.reset(),
            Fault::EmptyResponse => connection.close().await,
            Fault::MalformedResponseChunk => {
                connection.write_raw(CHUNKED_HEAD).await?;
                connection.write_raw(MALFORMED_CHUNK).await?;
                connection.close().await
            }
            Fault::RandomDataThenClose => {
                connection.write_raw(&random_bytes(RANDOM_DATA_LEN)).await?;
                connection.close().await
            }
        }
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::connected_pair;
    use crate::transport::TcpConnection;
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;

    /// Records raw calls and can be told to fail writes.
    #[derive(Default)]
    struct ScriptedConnection {
        written: Vec<u8>,
        closed: bool,
        reset: bool,
        fail_writes: bool,
    }

    #[async_trait]
    impl RawConnection for ScriptedConnection {
        async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.written.extend_from_slice(bytes);
            Ok(())
        }

        async fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }

        fn reset(&mut self) -> io::Result<()> {
            self.reset = true;
            Ok(())
        }
    }

    #[test]
    fn test_fault_wire_names() {
        let fault: Fault = serde_json::from_str("\"MALFORMED_RESPONSE_CHUNK\"").unwrap();
        assert_eq!(fault, Fault::MalformedResponseChunk);
        assert_eq!(
            serde_json::to_string(&Fault::ConnectionResetByPeer).unwrap(),
            "\"CONNECTION_RESET_BY_PEER\""
        );
        assert!(serde_json::from_str::<Fault>("\"TIMEOUT\"").is_err());
    }

    #[tokio::test]
    async fn test_empty_response_only_closes() {
        let mut conn = ScriptedConnection::default();
        Fault::EmptyResponse.apply(&mut conn).await;
        assert!(conn.closed);
        assert!(conn.written.is_empty());
        assert!(!conn.reset);
    }

    #[tokio::test]
    async fn test_malformed_chunk_writes_head_then_garbage() {
        let mut conn = ScriptedConnection::default();
        Fault::MalformedResponseChunk.apply(&mut conn).await;

        assert!(conn.written.starts_with(CHUNKED_HEAD));
        assert_eq!(&conn.written[CHUNKED_HEAD.len()..], MALFORMED_CHUNK);
        assert!(conn.closed);
    }

    #[tokio::test]
    async fn test_random_data_then_close() {
        let mut conn = ScriptedConnection::default();
        Fault::RandomDataThenClose.apply(&mut conn).await;
        assert_eq!(conn.written.len(), RANDOM_DATA_LEN);
        assert!(conn.closed);
    }

    #[tokio::test]
    async fn test_reset_does_not_write() {
        let mut conn = ScriptedConnection::default();
        Fault::ConnectionResetByPeer.apply(&mut conn).await;
        assert!(conn.reset);
        assert!(conn.written.is_empty());
        assert!(!conn.closed);
    }

    #[tokio::test]
    async fn test_failures_while_simulating_are_swallowed() {
        let mut conn = ScriptedConnection {
            fail_writes: true,
            ..Default::default()
        };
        // Must return normally even though every write fails.
        Fault::RandomDataThenClose.apply(&mut conn).await;
        assert!(!conn.closed);
    }

    #[tokio::test]
    async fn test_empty_response_over_tcp() {
        let (server, mut client) = connected_pair().await;
        let mut connection = TcpConnection::new(server);

        Fault::EmptyResponse.apply(&mut connection).await;

        let mut received = Vec::new();
        let n = client.read_to_end(&mut received).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_connection_reset_over_tcp() {
        let (server, mut client) = connected_pair().await;
        let mut connection = TcpConnection::new(server);

        Fault::ConnectionResetByPeer.apply(&mut connection).await;

        let mut buf = [0u8; 8];
        let err = client.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
