//! Per-connection transport for accepted chat clients.
//!
//! Each accepted socket gets a `ClientConn` that owns a read task and a
//! write task. Neither task touches session state: the read task forwards
//! raw bytes to the event loop, and the write task drains this
//! connection's outbound queue, which is its pending-write buffer.
//!
//! The queue is bounded. A client that stops reading fills it, and the
//! event loop drops that client instead of buffering without limit.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender, UnboundedSender};
use tokio::task::JoinHandle;

use crate::constants::READ_BUFFER_SIZE;
use crate::protocol::encode_line;

use super::event_loop::LoopEvent;
use super::registry::ConnectionId;

/// Event-loop-side handle for one TCP client.
pub(crate) struct ClientConn {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    /// Encoded lines waiting for the write task.
    outbound_tx: Sender<Vec<u8>>,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl std::fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConn")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl ClientConn {
    /// Split the stream and spawn its read and write tasks.
    ///
    /// `queue_lines` bounds the outbound queue (at least one line).
    /// Must be called from within the server's runtime.
    pub(crate) fn new(
        id: ConnectionId,
        stream: TcpStream,
        events: UnboundedSender<LoopEvent>,
        queue_lines: usize,
    ) -> Self {
        let peer = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[Conn] Could not set TCP_NODELAY for {id}: {e}");
        }
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(queue_lines.max(1));

        let read_handle = tokio::spawn(Self::read_loop(id, read_half, events.clone()));
        let write_handle = tokio::spawn(Self::write_loop(id, write_half, outbound_rx, events));

        Self {
            id,
            peer,
            outbound_tx,
            read_handle,
            write_handle,
        }
    }

    /// Queue one line for this client.
    ///
    /// Never blocks. Returns `false` if the queue is full or the write task
    /// has already stopped; the caller should then drop the connection.
    pub(crate) fn send_line(&self, line: &str) -> bool {
        match self.outbound_tx.try_send(encode_line(line)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("[Conn] Outbound queue full for {}", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Remote address, if known.
    pub(crate) fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Abort both tasks, which drops and closes the socket.
    pub(crate) fn close(self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }

    /// Read loop: forwards every chunk to the event loop until EOF or error.
    async fn read_loop(
        id: ConnectionId,
        mut reader: OwnedReadHalf,
        events: UnboundedSender<LoopEvent>,
    ) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    log::debug!("[Conn] {id} reached end of stream");
                    let _ = events.send(LoopEvent::Closed { id });
                    break;
                }
                Ok(n) => {
                    let event = LoopEvent::Data {
                        id,
                        bytes: buf[..n].to_vec(),
                    };
                    if events.send(event).is_err() {
                        return; // Event loop gone
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::warn!("[Conn] Read error for {id}: {e}");
                    let _ = events.send(LoopEvent::Closed { id });
                    break;
                }
            }
        }
    }

    /// Write loop: drains the outbound queue into the socket.
    async fn write_loop(
        id: ConnectionId,
        mut writer: OwnedWriteHalf,
        mut outbound_rx: Receiver<Vec<u8>>,
        events: UnboundedSender<LoopEvent>,
    ) {
        while let Some(data) = outbound_rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                log::warn!("[Conn] Write error for {id}: {e}");
                let _ = events.send(LoopEvent::Closed { id });
                return;
            }
        }
        let _ = writer.shutdown().await;
    }
}
