//! WebSocket channel for native platforms.
//!
//! Uses a background thread for non-blocking operation: commands go in over
//! one mpsc channel and decoded events come back over another.

use super::{ChannelEvent, ClientMessage, ConnectionState, SyncChannel, SyncError, decode_server_message};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, connect};
use url::Url;

/// Read timeout that keeps the socket loop responsive to outgoing commands.
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Work handed to the socket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// [`SyncChannel`] over a blocking tungstenite socket.
pub struct NativeChannel {
    url: String,
    state: ConnectionState,
    events: Vec<ChannelEvent>,
    cmd_tx: Option<Sender<WsCommand>>,
    event_rx: Option<Receiver<ChannelEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl NativeChannel {
    /// Create a disconnected channel for a `ws://` url.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: ConnectionState::Disconnected,
            events: Vec::new(),
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn run_socket(url: String, cmd_rx: Receiver<WsCommand>, event_tx: Sender<ChannelEvent>) {
    log::info!("Opening session socket to {}", url);

    let (mut socket, response) = match connect(url.as_str()) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("Could not open session socket: {}", e);
            let _ = event_tx.send(ChannelEvent::Error {
                message: format!("Connection failed: {}", e),
            });
            let _ = event_tx.send(ChannelEvent::Disconnected);
            return;
        }
    };

    log::info!("Session socket open ({})", response.status());
    let _ = event_tx.send(ChannelEvent::Connected);

    match socket.get_mut() {
        tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
            let _ = tcp.set_read_timeout(Some(READ_TIMEOUT));
            let _ = tcp.set_write_timeout(Some(WRITE_TIMEOUT));
        }
        #[allow(unreachable_patterns)]
        _ => log::warn!("Session socket is not plain TCP; reads may block sends"),
    }

    loop {
        match cmd_rx.try_recv() {
            Ok(WsCommand::Send(msg)) => {
                log::debug!("-> {} bytes", msg.len());
                if let Err(e) = socket.send(Message::Text(msg)) {
                    log::error!("Session socket write failed: {}", e);
                    break;
                }
                continue;
            }
            Ok(WsCommand::Close) => {
                log::debug!("Closing session socket");
                let _ = socket.close(None);
                break;
            }
            Err(TryRecvError::Disconnected) => {
                log::debug!("Channel handle dropped, closing socket");
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        match socket.read() {
            Ok(Message::Text(txt)) => {
                let Some(event) = decode_server_message(&txt) else { continue };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("Relay closed the session socket");
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::error!("Session socket read failed: {}", e);
                break;
            }
        }
    }

    log::debug!("Session socket thread done");
    let _ = event_tx.send(ChannelEvent::Disconnected);
}

impl SyncChannel for NativeChannel {
    fn connect(&mut self) -> Result<(), SyncError> {
        if self.cmd_tx.is_some() {
            return Err(SyncError::AlreadyConnected);
        }

        let parsed = Url::parse(&self.url).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        // Built without TLS; the socket loop also relies on plain-TCP timeouts.
        if parsed.scheme() != "ws" {
            return Err(SyncError::InvalidUrl(format!(
                "Unsupported scheme {} (only ws:// is supported)",
                parsed.scheme()
            )));
        }

        self.state = ConnectionState::Connecting;
        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<ChannelEvent>();
        let url = self.url.clone();
        let handle = thread::spawn(move || run_socket(url, cmd_rx, event_tx));

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    fn send(&mut self, message: &ClientMessage) -> Result<(), SyncError> {
        let tx = self.cmd_tx.as_ref().ok_or(SyncError::NotConnected)?;
        if self.state == ConnectionState::Disconnected || self.state == ConnectionState::Error {
            return Err(SyncError::NotConnected);
        }
        let json = serde_json::to_string(message)?;
        tx.send(WsCommand::Send(json))
            .map_err(|e| SyncError::Send(e.to_string()))
    }

    fn poll_events(&mut self) -> Vec<ChannelEvent> {
        let mut closed = false;
        if let Some(ref rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                match &event {
                    ChannelEvent::Connected => self.state = ConnectionState::Connected,
                    ChannelEvent::Disconnected => {
                        self.state = ConnectionState::Disconnected;
                        closed = true;
                    }
                    ChannelEvent::Error { .. } if self.state != ConnectionState::Connected => {
                        self.state = ConnectionState::Error
                    }
                    _ => {}
                }
                self.events.push(event);
            }
        }
        if closed {
            // The socket thread is gone; allow a fresh connect.
            self.cmd_tx = None;
            self.event_rx = None;
            self._thread = None;
        }
        std::mem::take(&mut self.events)
    }

    fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        self._thread = None;
        self.state = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

impl Drop for NativeChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}
