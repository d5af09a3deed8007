//! Framed reader and writer for one MRCP TCP connection.

use crate::message::codec::MrcpCodec;
use crate::message::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Receiver side of a connection. In the initiator role this forwards to
/// the single associated channel; the server role dispatches on the
/// `Channel-Identifier` header, which keeps multiplexing several channels
/// over one connection possible.
#[async_trait]
pub(crate) trait ConnectionHandler: Send + Sync {
    async fn on_message(&self, conn: &Arc<Connection>, msg: Message);
}

/// One TCP connection carrying MRCP frames.
pub(crate) struct Connection {
    write_half: tokio::sync::Mutex<OwnedWriteHalf>,
    peer_addr: Option<SocketAddr>,
    token: CancellationToken,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        token: CancellationToken,
    ) -> (Arc<Connection>, OwnedReadHalf) {
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let conn = Arc::new(Connection {
            write_half: tokio::sync::Mutex::new(write_half),
            peer_addr,
            token,
        });
        (conn, read_half)
    }

    pub(crate) async fn connect(
        addr: &str,
        token: CancellationToken,
    ) -> Result<(Arc<Connection>, OwnedReadHalf)> {
        let stream = TcpStream::connect(addr).await?;
        debug!(remote = addr, "mrcp connection established");
        Ok(Connection::new(stream, token))
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Reads frames until EOF, close, or an unframeable stream. A frame with
    /// a parseable length but malformed interior is dropped and the loop
    /// keeps going.
    pub(crate) async fn serve_loop(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        handler: Arc<dyn ConnectionHandler>,
    ) {
        let mut codec = MrcpCodec;
        let mut buffer = BytesMut::with_capacity(4096);
        let mut read_buf = [0u8; 4096];

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!(peer = ?self.peer_addr, "mrcp reader cancelled");
                    return;
                }
                read = read_half.read(&mut read_buf) => {
                    match read {
                        Ok(0) => {
                            debug!(peer = ?self.peer_addr, "mrcp connection closed by peer");
                            return;
                        }
                        Ok(n) => {
                            buffer.extend_from_slice(&read_buf[..n]);
                            loop {
                                match codec.decode(&mut buffer) {
                                    Ok(Some(msg)) => handler.on_message(&self, msg).await,
                                    Ok(None) => break,
                                    Err(Error::Message(e)) => {
                                        error!(peer = ?self.peer_addr, error = %e, "failed to parse mrcp message");
                                    }
                                    Err(e) => {
                                        error!(peer = ?self.peer_addr, error = %e, "unreadable mrcp stream");
                                        return;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            error!(peer = ?self.peer_addr, error = %e, "failed to read mrcp connection");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Writes the message as one whole frame. The write half is locked for
    /// the duration so concurrent producers never interleave frames.
    pub(crate) async fn send(&self, msg: &Message) -> Result<()> {
        let mut codec = MrcpCodec;
        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf)?;
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(&buf).await?;
        write_half.flush().await?;
        Ok(())
    }

    pub(crate) async fn close(&self) {
        self.token.cancel();
        let mut write_half = self.write_half.lock().await;
        let _ = write_half.shutdown().await;
    }
}
