//! netsoul client.
//!
//! This is the main entry point for SDK consumers. It owns the TCP
//! connection, drives the [`Session`] state machine and emits events.
//!
//! One spawned task per connection multiplexes socket reads, consumer
//! commands, heartbeat ticks and location lookups onto a single
//! `tokio::select!` loop, so the session is never touched from two places.
//!
//! ## Reconnection
//!
//! The SDK does not reconnect on its own, and it never retries a rejected
//! login. Consumers listen for [`Event::Disconnected`] and decide. Call
//! [`ClientHandle::disconnect`] before connecting again: it only returns once
//! the previous connection task (and its heartbeat) is gone.

use std::sync::Arc;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::LineCodec;
use crate::error::{ConfigError, Error, TransportError};
use crate::event::Event;
use crate::message::{LOCATION_PLACEHOLDER, PresenceState};
use crate::session::{Phase, Session, WatchList};

/// Default netsoul server.
pub const DEFAULT_SERVER: &str = "ns-server.epita.fr:4242";

/// Configuration for connecting to a netsoul server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Account login.
    pub login: String,
    /// Account password. Only ever sent as a digest.
    pub password: String,
    /// Free-text location; `%L` asks the resolver to fill it in.
    pub location: String,
    /// Free-text comment shown to buddies.
    pub comment: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER.to_string(),
            login: String::new(),
            password: String::new(),
            location: LOCATION_PLACEHOLDER.to_string(),
            comment: String::new(),
        }
    }
}

impl ConnectConfig {
    /// Reject settings that can never produce a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.login.trim().is_empty() {
            return Err(ConfigError::MissingLogin);
        }
        if self.password.is_empty() {
            return Err(ConfigError::MissingPassword);
        }
        let port_ok = self.server_addr.rsplit_once(':').is_some_and(|(host, port)| {
            !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0)
        });
        if !port_ok {
            return Err(ConfigError::InvalidPort(self.server_addr.clone()));
        }
        Ok(())
    }
}

/// Commands the consumer can send to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetStatus(PresenceState),
    SendMessage { to: Vec<String>, text: String },
    Typing { to: Vec<String>, typing: bool },
    /// Resend the current watch list.
    Watch,
    Who(Vec<String>),
    /// The buddy left the contact list.
    RemoveBuddy(String),
    Ping,
    Disconnect,
}

/// Turns an unresolved location (empty or containing `%L`) into a real one.
///
/// Runs on the blocking pool; the handshake never waits for it.
pub trait LocationResolver: Send + Sync {
    fn resolve(&self, location: &str) -> Option<String>;
}

/// A handle to a running netsoul connection.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).await?;
        Ok(())
    }

    pub async fn set_status(&self, state: PresenceState) -> Result<()> {
        self.send(Command::SetStatus(state)).await
    }

    pub async fn send_message(&self, to: &[&str], text: &str) -> Result<()> {
        self.send(Command::SendMessage {
            to: to.iter().map(|s| s.to_string()).collect(),
            text: text.to_string(),
        })
        .await
    }

    /// Send a typing indicator start or stop.
    pub async fn typing(&self, to: &str, typing: bool) -> Result<()> {
        self.send(Command::Typing {
            to: vec![to.to_string()],
            typing,
        })
        .await
    }

    pub async fn watch(&self) -> Result<()> {
        self.send(Command::Watch).await
    }

    pub async fn who(&self, logins: &[&str]) -> Result<()> {
        self.send(Command::Who(logins.iter().map(|s| s.to_string()).collect()))
            .await
    }

    pub async fn remove_buddy(&self, login: &str) -> Result<()> {
        self.send(Command::RemoveBuddy(login.to_string())).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.send(Command::Ping).await
    }

    /// Close the connection and wait until the connection task has ended.
    pub async fn disconnect(&self) -> Result<()> {
        // Already gone is fine.
        let _ = self.cmd_tx.send(Command::Disconnect).await;
        self.cmd_tx.closed().await;
        Ok(())
    }

    /// Whether the connection task has ended.
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Validate the configuration and open the TCP connection.
///
/// Configuration problems are reported before any socket is opened.
pub async fn establish_connection(config: &ConnectConfig) -> Result<TcpStream, Error> {
    config.validate()?;
    tracing::debug!("Connecting to {}...", config.server_addr);
    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: config.server_addr.clone(),
            source,
        })?;
    tracing::debug!("TCP connected to {}", config.server_addr);
    Ok(tcp)
}

/// Connect to a netsoul server and run the client.
///
/// Returns a handle for sending commands and a receiver for events.
/// The connection runs in a spawned task.
pub async fn connect(
    config: ConnectConfig,
    watch_list: Arc<dyn WatchList>,
    resolver: Option<Arc<dyn LocationResolver>>,
) -> Result<(ClientHandle, mpsc::Receiver<Event>), Error> {
    let tcp = establish_connection(&config).await?;
    Ok(connect_with_stream(tcp, config, watch_list, resolver))
}

/// Run the client over an already-established byte stream.
pub fn connect_with_stream<S>(
    stream: S,
    config: ConnectConfig,
    watch_list: Arc<dyn WatchList>,
    resolver: Option<Arc<dyn LocationResolver>>,
) -> (ClientHandle, mpsc::Receiver<Event>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    let handle = ClientHandle { cmd_tx };
    let session = Session::new(config, watch_list);

    tokio::spawn(async move {
        if let Err(e) = run_session(stream, session, resolver, event_tx, cmd_rx).await {
            tracing::warn!(error = %e, "Connection ended with error");
        }
    });

    (handle, event_rx)
}

async fn run_session<S>(
    stream: S,
    mut session: Session,
    resolver: Option<Arc<dyn LocationResolver>>,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = FramedRead::new(reader, LineCodec::new());
    let mut writer = FramedWrite::new(writer, LineCodec::new());
    let (resolved_tx, mut resolved_rx) = mpsc::channel::<String>(4);

    session.begin_connect();
    session.connected();

    loop {
        if let Err(e) = flush(&mut session, &mut writer, &event_tx, &resolver, &resolved_tx).await {
            session.disconnect(&format!("write failed: {e}"));
            forward_events(&mut session, &event_tx).await;
            return Err(e.into());
        }
        if session.phase() == Phase::Disconnected {
            break;
        }

        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(record)) => {
                    tracing::trace!(%record, "<-");
                    session.handle_record(&record);
                }
                Some(Err(e)) => {
                    session.disconnect(&format!("read failed: {e}"));
                    forward_events(&mut session, &event_tx).await;
                    return Err(e.into());
                }
                None => session.disconnect(&TransportError::Eof.to_string()),
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => session.handle_command(cmd),
                None => session.disconnect("client handle dropped"),
            },
            _ = session.heartbeat_mut().tick() => session.heartbeat_elapsed(),
            Some(location) = resolved_rx.recv() => session.location_resolved(location),
        }
    }

    Ok(())
}

/// Write everything the session queued, hand events to the consumer and
/// start any pending location lookup.
async fn flush<W>(
    session: &mut Session,
    writer: &mut FramedWrite<W, LineCodec>,
    event_tx: &mpsc::Sender<Event>,
    resolver: &Option<Arc<dyn LocationResolver>>,
    resolved_tx: &mpsc::Sender<String>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut wrote = false;
    while let Some(cmd) = session.poll_outbound() {
        tracing::trace!(%cmd, "->");
        writer.feed(cmd).await?;
        wrote = true;
    }
    if wrote {
        writer.flush().await?;
    }

    if let Some(location) = session.take_location_request() {
        match resolver {
            Some(resolver) => spawn_resolution(resolver.clone(), location, resolved_tx.clone()),
            None => tracing::debug!(%location, "No location resolver configured"),
        }
    }

    forward_events(session, event_tx).await;
    Ok(())
}

async fn forward_events(session: &mut Session, event_tx: &mpsc::Sender<Event>) {
    while let Some(event) = session.poll_event() {
        let _ = event_tx.send(event).await;
    }
}

fn spawn_resolution(
    resolver: Arc<dyn LocationResolver>,
    location: String,
    resolved_tx: mpsc::Sender<String>,
) {
    tokio::spawn(async move {
        let lookup = tokio::task::spawn_blocking(move || resolver.resolve(&location)).await;
        match lookup {
            Ok(Some(resolved)) => {
                let _ = resolved_tx.send(resolved).await;
            }
            Ok(None) => tracing::debug!("Location resolver had no answer"),
            Err(e) => tracing::warn!(error = %e, "Location resolver panicked"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectConfig {
        ConnectConfig {
            server_addr: "localhost:4242".into(),
            login: "me_x".into(),
            password: "secret".into(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn missing_login_is_reported_first() {
        let cfg = ConnectConfig {
            login: " ".into(),
            password: String::new(),
            ..config()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::MissingLogin));
    }

    #[test]
    fn missing_password_is_reported() {
        let cfg = ConnectConfig {
            password: String::new(),
            ..config()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::MissingPassword));
    }

    #[test]
    fn bad_ports_are_rejected() {
        for addr in [
            "localhost",
            "localhost:",
            "localhost:99999",
            "localhost:http",
            ":4242",
            "localhost:0",
        ] {
            let cfg = ConnectConfig {
                server_addr: addr.into(),
                ..config()
            };
            assert_eq!(cfg.validate(), Err(ConfigError::InvalidPort(addr.into())), "{addr}");
        }
    }

    #[tokio::test]
    async fn connect_fails_fast_on_bad_config() {
        let cfg = ConnectConfig {
            login: String::new(),
            ..config()
        };
        let err = connect(cfg, Arc::new(Vec::<String>::new()), None).await.err().unwrap();
        assert!(matches!(err, Error::Config(ConfigError::MissingLogin)));
    }
}
