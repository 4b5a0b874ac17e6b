//! Chat client with automatic reconnection.
//!
//! A [`ChatClient`] owns one blocking TCP link at a time. Outbound lines
//! are written directly from the caller's thread; inbound lines are read
//! by a background listener thread that frames them, hands them to the
//! [`ClientObserver`], and runs the [`ReconnectPolicy`] when the link
//! drops.
//!
//! # Link epochs
//!
//! Every successful connect bumps a link epoch and hands the new value to
//! its listener. `disconnect()` and `reconnect_now()` bump the epoch too.
//! A listener whose epoch is no longer current knows its socket was closed
//! on purpose (or superseded) and exits without retrying.
//!
//! ```text
//! caller ──send()──► writer (Mutex<Option<TcpStream>>) ──► server
//!                                                            │
//! observer ◄── on_message / on_roster_changed ◄── listener ◄─┘
//!                                                   │ EOF / error
//!                                                   ▼
//!                                            retry loop (bounded)
//! ```

// Rust guideline compliant 2026-02

pub mod reconnect;

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};

use crate::config::ClientConfig;
use crate::constants::{READ_BUFFER_SIZE, RECONNECT_POLL_INTERVAL, USERLIST_PREFIX};
use crate::observer::ClientObserver;
use crate::protocol::command::system_message;
use crate::protocol::{encode_line, parse_user_list, Command, LineFramer};

pub use reconnect::{ConnectionState, Presence, ReconnectPolicy};

/// Where to (re)connect and who to register as.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    username: String,
}

/// State shared between the caller-facing handle and listener threads.
struct Inner {
    observer: Arc<dyn ClientObserver>,
    policy: ReconnectPolicy,
    target: Mutex<Option<Target>>,
    /// Socket used by `send()`; held for the whole write.
    writer: Mutex<Option<TcpStream>>,
    /// Clone of the live socket used only to shut it down.
    shutdown_handle: Mutex<Option<TcpStream>>,
    state: Mutex<ConnectionState>,
    connected: AtomicBool,
    attempts: AtomicU32,
    auto_reconnect: AtomicBool,
    epoch: AtomicU64,
    /// Serializes link bookkeeping. Never held across blocking I/O.
    connect_lock: Mutex<()>,
}

/// Blocking chat client.
///
/// All methods take `&self`; the client can be shared with `Arc` between a
/// UI thread and anything else that needs to send.
pub struct ChatClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("state", &self.state())
            .field("attempts", &self.reconnect_attempts())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChatClient {
    /// Create an idle client. Nothing connects until [`connect`](Self::connect).
    pub fn new(config: &ClientConfig, observer: Arc<dyn ClientObserver>) -> Self {
        Self::with_policy(ReconnectPolicy::from(config), observer)
    }

    /// Create an idle client with an explicit retry policy.
    pub fn with_policy(policy: ReconnectPolicy, observer: Arc<dyn ClientObserver>) -> Self {
        Self {
            inner: Arc::new(Inner {
                observer,
                policy,
                target: Mutex::new(None),
                writer: Mutex::new(None),
                shutdown_handle: Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                connected: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                auto_reconnect: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
                connect_lock: Mutex::new(()),
            }),
        }
    }

    /// Connect to `host:port` and register as `username`.
    ///
    /// Any existing link is closed first. On failure the error is reported
    /// through [`ClientObserver::on_error`] and no retry is scheduled.
    pub fn connect(&self, host: &str, port: u16, username: &str) -> bool {
        let username = username.trim();
        let host = host.trim();
        if port == 0 {
            self.inner.observer.on_error("Invalid port number");
            return false;
        }
        if username.is_empty() {
            self.inner.observer.on_error("Username cannot be empty");
            return false;
        }
        if host.is_empty() {
            self.inner.observer.on_error("Host cannot be empty");
            return false;
        }

        self.disconnect();
        *lock(&self.inner.target) = Some(Target {
            host: host.to_string(),
            port,
            username: username.to_string(),
        });
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.dial()
    }

    /// Reconnect immediately with the last target.
    ///
    /// A no-op returning `true` while connected. Cancels any pending
    /// automatic retry and is allowed even after retries gave up.
    pub fn reconnect_now(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        if lock(&self.inner.target).is_none() {
            self.inner.observer.on_error("No server to reconnect to");
            return false;
        }
        // Stops a sleeping retry loop.
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.dial()
    }

    /// Send one chat line. Embedded newlines are flattened to spaces.
    pub fn send(&self, text: &str) -> Result<()> {
        self.inner.write_line(text)
    }

    /// Change this user's presence label.
    pub fn set_status(&self, value: &str) -> Result<()> {
        self.inner
            .write_line(&Command::SetStatus(value.trim().to_string()).to_line())
    }

    /// [`set_status`](Self::set_status) with a preset.
    pub fn set_presence(&self, presence: Presence) -> Result<()> {
        self.set_status(presence.as_str())
    }

    /// Close the link on purpose. Never triggers the retry policy.
    ///
    /// Returns promptly even while another thread is blocked in
    /// [`send`](Self::send) or a dial is in progress.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let was_connected = {
            let _guard = lock(&inner.connect_lock);
            inner.epoch.fetch_add(1, Ordering::SeqCst);
            inner.close_link();
            inner.set_state(ConnectionState::Disconnected);
            inner.connected.swap(false, Ordering::SeqCst)
        };

        if was_connected {
            log::info!("[Client] Disconnected");
            inner.observer.on_connection_status_changed(false);
        }
    }

    /// True while a link is up.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    /// Automatic attempts made since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Username of the last connect, if any.
    pub fn username(&self) -> Option<String> {
        lock(&self.inner.target).as_ref().map(|t| t.username.clone())
    }

    /// Stop automatic reconnection, including a retry already waiting.
    pub fn stop_reconnecting(&self) {
        self.set_auto_reconnect(false);
    }

    /// Enable or disable automatic reconnection.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.auto_reconnect.store(enabled, Ordering::SeqCst);
    }

    /// The retry policy in effect.
    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Manual connect: report failure through the observer.
    fn dial(self: &Arc<Self>) -> bool {
        self.set_state(ConnectionState::Connecting);
        match self.open_link(None) {
            Ok(true) => true,
            Ok(false) => false,
            Err(e) => {
                log::warn!("[Client] Connection failed: {e:#}");
                self.set_state(ConnectionState::Disconnected);
                self.observer.on_error(&format!("Connection failed: {e:#}"));
                false
            }
        }
    }

    /// Open a link to the current target, register, and start its listener.
    ///
    /// The dial runs without `connect_lock`, so `disconnect()` never waits
    /// on an unreachable host. Gives up with `Ok(false)` if the epoch moved
    /// on meanwhile (the retry or manual dial was cancelled).
    fn open_link(self: &Arc<Self>, expected: Option<u64>) -> Result<bool> {
        let (target, start_epoch) = {
            let _guard = lock(&self.connect_lock);
            let current = self.current_epoch();
            if expected.is_some_and(|e| e != current) {
                return Ok(false);
            }
            if self.connected.load(Ordering::SeqCst) {
                // A racing retry already brought the link back.
                self.set_state(ConnectionState::Connected);
                return Ok(true);
            }
            let target = lock(&self.target)
                .clone()
                .context("Not connected to a server")?;
            (target, current)
        };

        let mut stream = TcpStream::connect((target.host.as_str(), target.port))
            .with_context(|| format!("{}:{}", target.host, target.port))?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[Client] Could not set TCP_NODELAY: {e}");
        }
        let reader = stream.try_clone().context("Failed to clone socket")?;
        let shutdown_handle = stream.try_clone().context("Failed to clone socket")?;
        stream
            .write_all(&encode_line(
                &Command::Register(target.username.clone()).to_line(),
            ))
            .context("Failed to send registration")?;

        let epoch = {
            let _guard = lock(&self.connect_lock);
            if self.current_epoch() != start_epoch || self.connected.load(Ordering::SeqCst) {
                log::debug!("[Client] Dial superseded, dropping new link");
                let _ = shutdown_handle.shutdown(Shutdown::Both);
                let connected = self.connected.load(Ordering::SeqCst);
                if connected {
                    self.set_state(ConnectionState::Connected);
                }
                return Ok(connected);
            }

            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let inner = Arc::clone(self);
            if let Err(e) = thread::Builder::new()
                .name("relaychat-listener".to_string())
                .spawn(move || inner.listen(reader, epoch))
            {
                let _ = shutdown_handle.shutdown(Shutdown::Both);
                return Err(e).context("Failed to spawn listener thread");
            }

            *lock(&self.shutdown_handle) = Some(shutdown_handle);
            *lock(&self.writer) = Some(stream);
            self.connected.store(true, Ordering::SeqCst);
            self.attempts.store(0, Ordering::SeqCst);
            self.set_state(ConnectionState::Connected);
            epoch
        };

        log::info!(
            "[Client] Connected to {}:{} as {} (epoch {epoch})",
            target.host,
            target.port,
            target.username
        );
        self.observer.on_connection_status_changed(true);
        Ok(true)
    }

    /// Shut the live socket down through its dedicated handle.
    ///
    /// Never waits on `writer`: a send blocked on a full socket fails as
    /// soon as the socket is shut down, and the next link replaces the
    /// stale stream. Caller holds `connect_lock`.
    fn close_link(&self) {
        if let Some(stream) = lock(&self.shutdown_handle).take() {
            // Unblocks the listener's read and any send in progress.
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
    }

    fn write_line(&self, text: &str) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            bail!("Not connected to a server");
        }
        let mut writer = lock(&self.writer);
        let Some(stream) = writer.as_mut() else {
            bail!("Not connected to a server");
        };
        // The listener notices the broken link and starts recovery.
        stream
            .write_all(&encode_line(text))
            .context("Failed to send message")
    }

    /// Listener thread body: read until the link drops.
    fn listen(self: Arc<Self>, mut stream: TcpStream, epoch: u64) {
        let mut framer = LineFramer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    log::debug!("[Client] Server closed the connection");
                    break;
                }
                Ok(n) => match framer.feed(&buf[..n]) {
                    Ok(lines) => {
                        for line in lines {
                            self.deliver(&line);
                        }
                    }
                    Err(e) => {
                        log::warn!("[Client] Framing error: {e}");
                        break;
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("[Client] Read error: {e}");
                    break;
                }
            }
        }

        self.link_lost(epoch);
    }

    fn deliver(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        if line.starts_with(USERLIST_PREFIX) {
            if let Some(users) = parse_user_list(line) {
                self.observer.on_roster_changed(&users);
                return;
            }
        }
        self.observer.on_message(line);
    }

    /// The link for `epoch` ended. Retries unless it was closed on purpose.
    fn link_lost(self: &Arc<Self>, epoch: u64) {
        {
            let _guard = lock(&self.connect_lock);
            if self.current_epoch() != epoch {
                log::debug!("[Client] Listener for epoch {epoch} exiting quietly");
                return;
            }
            self.close_link();
            self.connected.store(false, Ordering::SeqCst);
            self.set_state(ConnectionState::Reconnecting);
        }

        log::warn!("[Client] Connection lost");
        self.observer.on_connection_status_changed(false);
        self.observer.on_message(&system_message("Connection lost"));
        self.retry(epoch);
    }

    /// Bounded retry loop run on the dead link's listener thread.
    fn retry(self: &Arc<Self>, epoch: u64) {
        loop {
            if !self.auto_reconnect.load(Ordering::SeqCst) {
                log::info!("[Client] Automatic reconnect disabled");
                self.settle(epoch, ConnectionState::Disconnected);
                return;
            }

            let made = self.attempts.load(Ordering::SeqCst);
            let Some(attempt) = self.policy.next_attempt(made) else {
                let message = self.policy.exhausted_message();
                log::error!("[Client] {message}");
                self.settle(epoch, ConnectionState::GaveUp);
                self.observer.on_error(&message);
                return;
            };
            self.attempts.store(attempt, Ordering::SeqCst);
            self.observer
                .on_message(&system_message(&self.policy.progress_message(attempt)));

            if !self.wait_before_retry(epoch) {
                self.settle(epoch, ConnectionState::Disconnected);
                return;
            }

            match self.open_link(Some(epoch)) {
                Ok(true) => {
                    log::info!("[Client] Reconnected after {attempt} attempt(s)");
                    self.observer
                        .on_message(&system_message("Reconnected successfully!"));
                    return;
                }
                // Someone else took over the link.
                Ok(false) => return,
                Err(e) => {
                    log::warn!("[Client] Reconnect attempt {attempt} failed: {e:#}");
                    self.observer
                        .on_message(&system_message(&format!("Reconnect failed: {e:#}")));
                }
            }
        }
    }

    /// Sleep out the retry delay in short slices.
    ///
    /// Returns `false` as soon as the epoch moves or auto-reconnect is
    /// switched off.
    fn wait_before_retry(&self, epoch: u64) -> bool {
        let deadline = Instant::now() + self.policy.delay;
        loop {
            if self.current_epoch() != epoch || !self.auto_reconnect.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(RECONNECT_POLL_INTERVAL));
        }
    }

    /// Record the retry loop's final state unless a newer link owns it.
    fn settle(&self, epoch: u64, state: ConnectionState) {
        let _guard = lock(&self.connect_lock);
        if self.current_epoch() == epoch {
            self.set_state(state);
        }
    }
}
