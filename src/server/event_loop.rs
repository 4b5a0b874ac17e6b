//! Single-task event loop that owns every server-side session.
//!
//! Producers (the listener and each connection's read/write tasks) feed a
//! single unbounded channel. The loop waits on that channel, the listener
//! and the stop token with one `select!`, then handles whatever became
//! ready. The registry and the connection map live in this struct and
//! nothing else can reach them, so neither needs a lock.
//!
//! ```text
//!   TcpListener ──accept──┐
//!   read task  ──Data────►│
//!   read task  ──Closed──►│  EventLoop ──dispatch──► Effects ──► ClientConn queues
//!   write task ──Closed──►│
//!   stop token ──cancel──►┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::constants::SHUTDOWN_NOTICE;
use crate::observer::ServerObserver;
use crate::protocol::command::system_message;
use crate::protocol::user_list_frame;

use super::conn::ClientConn;
use super::dispatch::{self, Effect};
use super::registry::{ConnectionId, SessionRegistry};

/// Delay before retrying after a failed `accept()`.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Event from a connection task delivered to the event loop.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    /// Bytes read from a client socket.
    Data {
        /// Source connection.
        id: ConnectionId,
        /// Raw bytes, not yet framed.
        bytes: Vec<u8>,
    },
    /// The connection hit end-of-stream or an I/O error.
    Closed {
        /// Connection to reap.
        id: ConnectionId,
    },
}

/// Server state plus the loop that drives it.
pub(crate) struct EventLoop {
    registry: SessionRegistry,
    conns: HashMap<ConnectionId, ClientConn>,
    next_id: u64,
    events_tx: UnboundedSender<LoopEvent>,
    events_rx: UnboundedReceiver<LoopEvent>,
    observer: Arc<dyn ServerObserver>,
    shutdown_grace: Duration,
    queue_lines: usize,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("sessions", &self.registry.len())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl EventLoop {
    pub(crate) fn new(config: &ServerConfig, observer: Arc<dyn ServerObserver>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = if config.max_line_bytes == 0 {
            SessionRegistry::new()
        } else {
            SessionRegistry::with_line_limit(config.max_line_bytes)
        };
        Self {
            registry,
            conns: HashMap::new(),
            next_id: 1,
            events_tx,
            events_rx,
            observer,
            shutdown_grace: config.shutdown_grace(),
            queue_lines: config.max_queued_lines,
        }
    }

    /// Run until `stop` is cancelled, then shut every connection down.
    pub(crate) async fn run(mut self, listener: TcpListener, stop: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                () = stop.cancelled() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer),
                    Err(e) => {
                        log::error!("[Server] Accept error: {e}");
                        self.observer.on_error(&format!("Accept error: {e}"));
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },

                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        drop(listener);
        self.shutdown().await;
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let conn = ClientConn::new(id, stream, self.events_tx.clone(), self.queue_lines);
        self.conns.insert(id, conn);
        let effects = dispatch::on_connect(&mut self.registry, id, Some(peer));

        if let Some(session) = self.registry.lookup(id) {
            log::info!("[Server] {id} accepted from {peer} as {}", session.username);
            self.observer
                .on_log(&format!("New client connected: {session}"));
        }
        self.apply(effects);
    }

    fn handle_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Data { id, bytes } => self.on_data(id, &bytes),
            LoopEvent::Closed { id } => self.disconnect(id),
        }
    }

    fn on_data(&mut self, id: ConnectionId, bytes: &[u8]) {
        let Some(session) = self.registry.lookup_mut(id) else {
            // Late chunk from a connection that was already reaped.
            return;
        };

        match session.feed(bytes) {
            Ok(lines) => {
                for line in lines {
                    let effects = dispatch::on_line(&mut self.registry, id, &line);
                    self.apply(effects);
                }
            }
            Err(e) => {
                log::warn!("[Server] Dropping {id}: {e}");
                self.disconnect(id);
                return;
            }
        }

        // Complete lines ahead of an oversized one were dispatched above.
        if self.registry.lookup(id).is_some_and(|s| s.is_overflowed()) {
            log::warn!("[Server] Dropping {id}: line too long");
            self.disconnect(id);
        }
    }

    /// Close the transport and drop the session. Safe to call twice.
    fn disconnect(&mut self, id: ConnectionId) {
        if let Some(conn) = self.conns.remove(&id) {
            log::debug!("[Server] Closing {id} ({:?})", conn.peer());
            conn.close();
        }

        let description = self.registry.lookup(id).map(ToString::to_string);
        let effects = dispatch::on_disconnect(&mut self.registry, id);
        if let Some(description) = description {
            log::info!("[Server] {id} disconnected: {description}");
            self.observer
                .on_log(&format!("Client disconnected: {description}"));
        }
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut failed = Vec::new();
        for effect in effects {
            match effect {
                Effect::Unicast { to, line } => {
                    if self.conns.get(&to).is_some_and(|conn| !conn.send_line(&line)) {
                        failed.push(to);
                    }
                }
                Effect::Broadcast(line) => {
                    self.observer.on_log(&format!("Broadcasting: {line}"));
                    failed.extend(self.broadcast(&line));
                }
                Effect::BroadcastUserList => {
                    let frame = user_list_frame(&self.registry.roster());
                    failed.extend(self.broadcast(&frame));
                }
                Effect::RosterChanged => {
                    self.observer.on_roster_changed(&self.registry.roster());
                }
            }
        }

        failed.sort_unstable();
        failed.dedup();
        for id in failed {
            self.disconnect(id);
        }
    }

    /// Queue `line` for every session. A dead or stalled recipient is
    /// skipped, never aborting delivery to the rest.
    ///
    /// Returns the recipients whose queue refused the line.
    fn broadcast(&self, line: &str) -> Vec<ConnectionId> {
        let mut failed = Vec::new();
        for session in self.registry.all() {
            let id = session.id();
            match self.conns.get(&id) {
                Some(conn) if conn.send_line(line) => {}
                Some(_) => failed.push(id),
                None => log::debug!("[Server] Skipping broadcast to {id}: transport closed"),
            }
        }
        failed
    }

    async fn shutdown(&mut self) {
        log::info!("[Server] Shutting down {} connection(s)", self.conns.len());
        let notice = system_message(SHUTDOWN_NOTICE);
        self.observer.on_log(&notice);
        // Everyone is closed below regardless.
        let _ = self.broadcast(&notice);

        // Writer tasks run on this same runtime; give them time to flush.
        tokio::time::sleep(self.shutdown_grace).await;

        for (_, conn) in self.conns.drain() {
            conn.close();
        }
        self.registry.clear();
        self.observer.on_log("Server stopped");
    }
}
