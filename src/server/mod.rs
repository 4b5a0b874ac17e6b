//! Chat relay server.
//!
//! Binds a TCP listener and runs the [`event_loop`] on a dedicated thread
//! with a single-threaded tokio runtime. Every accept, read, dispatch and
//! broadcast happens on that one thread, so the session registry is never
//! shared.
//!
//! # Architecture
//!
//! ```text
//! Presentation                     Server thread (current_thread runtime)
//! ┌──────────────┐  stop token   ┌────────────────────────────────────┐
//! │ ChatServer   │──────────────►│ EventLoop                          │
//! │  start/stop  │               │  SessionRegistry   ClientConn × N  │
//! └──────▲───────┘               └───────────────┬────────────────────┘
//!        │ ServerObserver callbacks              │
//!        └───────────────────────────────────────┘
//! ```

// Rust guideline compliant 2026-02

pub mod dispatch;
pub mod registry;

mod conn;
mod event_loop;

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::observer::ServerObserver;

use event_loop::EventLoop;

pub use registry::{ConnectionId, Session, SessionRegistry};

/// Handle to a running chat server.
///
/// Dropping the handle stops the server.
#[derive(Debug)]
pub struct ChatServer {
    local_addr: SocketAddr,
    stop: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl ChatServer {
    /// Bind the listener and start the event loop thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the runtime
    /// cannot be created. Nothing is left running in that case.
    pub fn start(config: &ServerConfig, observer: Arc<dyn ServerObserver>) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = std::net::TcpListener::bind(&addr)
            .with_context(|| format!("Failed to bind chat server on {addr}"))?;
        listener
            .set_nonblocking(true)
            .context("Failed to make listener non-blocking")?;
        let local_addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build server runtime")?;

        let stop = CancellationToken::new();
        let event_loop = EventLoop::new(config, Arc::clone(&observer));
        let loop_stop = stop.clone();
        let loop_observer = Arc::clone(&observer);

        let thread = std::thread::Builder::new()
            .name("relaychat-server".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => event_loop.run(listener, loop_stop).await,
                        Err(e) => {
                            log::error!("[Server] Failed to register listener: {e}");
                            loop_observer.on_error(&format!("Failed to register listener: {e}"));
                        }
                    }
                });
            })
            .context("Failed to spawn server thread")?;

        log::info!("[Server] Listening on {local_addr}");
        observer.on_log(&format!(
            "Server started on port {}. Waiting for connections...",
            local_addr.port()
        ));

        Ok(Self {
            local_addr,
            stop,
            thread: Some(thread),
        })
    }

    /// Start with default settings on `port`.
    pub fn start_on_port(port: u16, observer: Arc<dyn ServerObserver>) -> Result<Self> {
        Self::start(&ServerConfig::with_port(port), observer)
    }

    /// Address the listener is bound to (useful when started on port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// True while the event loop thread is alive.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Broadcast the shutdown notice, close every connection, and wait for
    /// the event loop thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // Wakes the loop's select! immediately.
        self.stop.cancel();
        if thread.join().is_err() {
            log::error!("[Server] Event loop thread panicked");
        }
        log::info!("[Server] Stopped ({})", self.local_addr);
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ChannelObserver, ServerEvent};
    use crate::protocol::{parse_user_list, User};
    use std::collections::HashSet;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    /// Raw line-oriented test client.
    struct Peer {
        reader: BufReader<TcpStream>,
        writer: TcpStream,
    }

    impl Peer {
        fn connect(server: &ChatServer) -> Self {
            let stream = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let writer = stream.try_clone().unwrap();
            Self {
                reader: BufReader::new(stream),
                writer,
            }
        }

        fn send(&mut self, raw: &str) {
            self.writer.write_all(raw.as_bytes()).unwrap();
        }

        fn line(&mut self) -> String {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).expect("read timed out");
            assert!(n > 0, "connection closed");
            line.trim_end().to_string()
        }

        /// Read lines until one satisfies `pred`; returns everything read.
        fn until(&mut self, pred: impl Fn(&str) -> bool) -> Vec<String> {
            let mut seen = Vec::new();
            loop {
                let line = self.line();
                let done = pred(&line);
                seen.push(line);
                if done {
                    return seen;
                }
            }
        }

        fn register(&mut self, name: &str) {
            self.send(&format!("/register {name}\n"));
            let joined = format!("[System] {name} has joined the chat");
            self.until(|l| l == joined);
        }
    }

    fn start() -> (ChatServer, std::sync::mpsc::Receiver<ServerEvent>) {
        let (observer, rx) = ChannelObserver::<ServerEvent>::new();
        let mut config = ServerConfig::with_port(0);
        config.bind_address = "127.0.0.1".into();
        config.shutdown_grace_ms = 100;
        let server = ChatServer::start(&config, Arc::new(observer)).unwrap();
        (server, rx)
    }

    fn roster_names(frame: &str) -> HashSet<String> {
        parse_user_list(frame)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect()
    }

    #[test]
    fn test_accept_sends_user_list() {
        let (server, _rx) = start();
        let mut peer = Peer::connect(&server);
        assert_eq!(peer.line(), "/userlist");
    }

    #[test]
    fn test_chat_reaches_everyone_including_sender() {
        let (server, _rx) = start();
        let mut bob = Peer::connect(&server);
        bob.register("bob");
        let mut carol = Peer::connect(&server);
        carol.register("carol");

        bob.send("hi\n");
        bob.until(|l| l == "bob: hi");
        carol.until(|l| l == "bob: hi");
    }

    #[test]
    fn test_line_split_across_writes() {
        let (server, _rx) = start();
        let mut peer = Peer::connect(&server);
        peer.send("/regis");
        std::thread::sleep(Duration::from_millis(50));
        peer.send("ter dave\nhel");
        std::thread::sleep(Duration::from_millis(50));
        peer.send("lo\n");

        peer.until(|l| l == "[System] dave has joined the chat");
        peer.until(|l| l == "dave: hello");
    }

    #[test]
    fn test_duplicate_rejection_is_unicast() {
        let (server, _rx) = start();
        let mut first = Peer::connect(&server);
        first.register("alice");
        let mut second = Peer::connect(&server);
        second.send("/register Alice\n");
        second.until(|l| l == "Username already taken");

        // `first` must not see the rejection; the next thing after the
        // user-list refresh for the second accept is this chat line.
        second.send("still here\n");
        let seen = first.until(|l| l.ends_with(": still here"));
        assert!(!seen.iter().any(|l| l == "Username already taken"));
        assert!(seen.iter().any(|l| l.starts_with("Guest") && l.ends_with(": still here")));
    }

    #[test]
    fn test_guests_never_listed() {
        let (server, _rx) = start();
        let mut alice = Peer::connect(&server);
        alice.register("alice");
        let _guest = Peer::connect(&server);

        let frames = alice.until(|l| l.starts_with("/userlist"));
        let frame = frames.last().unwrap();
        assert!(!frame.contains("Guest"), "guest leaked into {frame}");
        assert_eq!(roster_names(frame), HashSet::from(["alice".to_string()]));
    }

    #[test]
    fn test_disconnect_announced_once() {
        let (server, rx) = start();
        let mut alice = Peer::connect(&server);
        alice.register("alice");
        let mut bob = Peer::connect(&server);
        bob.register("bob");
        alice.until(|l| l == "[System] bob has joined the chat");

        drop(bob);
        alice.until(|l| l == "[System] bob has left the chat");
        let frame = alice.line();
        assert_eq!(roster_names(&frame), HashSet::from(["alice".to_string()]));

        alice.send("ping\n");
        let seen = alice.until(|l| l == "alice: ping");
        assert!(!seen.iter().any(|l| l.contains("has left the chat")));

        let rosters: Vec<Vec<User>> = rx
            .try_iter()
            .filter_map(|e| match e {
                ServerEvent::Roster(users) => Some(users),
                _ => None,
            })
            .collect();
        assert_eq!(rosters.last().unwrap(), &vec![User::new("alice", "Online")]);
    }

    #[test]
    fn test_stop_notifies_and_closes_clients() {
        let (server, rx) = start();
        let mut alice = Peer::connect(&server);
        alice.register("alice");

        assert!(server.is_running());
        server.stop();

        alice.until(|l| l == "[System] Server is shutting down");
        let mut rest = String::new();
        assert_eq!(alice.reader.read_line(&mut rest).unwrap(), 0);

        let logs: Vec<String> = rx
            .try_iter()
            .filter_map(|e| match e {
                ServerEvent::Log(line) => Some(line),
                _ => None,
            })
            .collect();
        assert!(logs.iter().any(|l| l.starts_with("Server started on port")));
        assert_eq!(logs.last().map(String::as_str), Some("Server stopped"));
    }

    #[test]
    fn test_bind_failure_is_error() {
        let (server, _rx) = start();
        let mut config = ServerConfig::with_port(server.port());
        config.bind_address = "127.0.0.1".into();
        let (observer, _rx2) = ChannelObserver::<ServerEvent>::new();
        let result = ChatServer::start(&config, Arc::new(observer));
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_line_drops_connection() {
        let (observer, _rx) = ChannelObserver::<ServerEvent>::new();
        let mut config = ServerConfig::with_port(0);
        config.bind_address = "127.0.0.1".into();
        config.max_line_bytes = 16;
        let server = ChatServer::start(&config, Arc::new(observer)).unwrap();

        let mut peer = Peer::connect(&server);
        assert_eq!(peer.line(), "/userlist");
        peer.send(&"x".repeat(64));

        let mut rest = String::new();
        let closed = matches!(peer.reader.read_line(&mut rest), Ok(0) | Err(_));
        assert!(closed, "expected connection to be dropped, got {rest:?}");
    }

    #[test]
    fn test_lines_before_oversized_one_are_dispatched() {
        let (observer, rx) = ChannelObserver::<ServerEvent>::new();
        let mut config = ServerConfig::with_port(0);
        config.bind_address = "127.0.0.1".into();
        config.max_line_bytes = 16;
        let server = ChatServer::start(&config, Arc::new(observer)).unwrap();

        let mut peer = Peer::connect(&server);
        assert_eq!(peer.line(), "/userlist");
        let mut chunk = "/register dave\n".to_string();
        chunk.push_str(&"x".repeat(70));
        peer.send(&chunk);

        let mut logs = Vec::new();
        while !logs.iter().any(|l: &String| l.starts_with("Client disconnected")) {
            if let ServerEvent::Log(line) = rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                logs.push(line);
            }
        }
        assert!(logs.contains(&"Broadcasting: [System] dave has joined the chat".to_string()));
        assert!(logs.contains(&"Client disconnected: dave (Online)".to_string()));
    }
}
