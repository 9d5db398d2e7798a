//! The netsoul session state machine.
//!
//! `Session` performs no I/O. The client loop feeds it decoded records,
//! consumer commands and heartbeat ticks, then drains what it produced:
//! outbound commands ([`Session::poll_outbound`]), events
//! ([`Session::poll_event`]) and location lookups
//! ([`Session::take_location_request`]).
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingChallenge -> Authenticating -> Online
//!      ^                                                  |              |
//!      +----------------- AuthFailed <--------------------+              |
//!      +-----------------------------------------------------------------+
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;

use crate::auth;
use crate::client::{Command, ConnectConfig};
use crate::codec::{self, CommandRecord};
use crate::error::AuthenticationError;
use crate::event::Event;
use crate::heartbeat::Heartbeat;
use crate::message::{
    Challenge, Inbound, LOCATION_PLACEHOLDER, Outbound, PresenceState, UserEvent, UserHeader,
};
use crate::presence::{PresenceRegistry, PresenceUpdate};

/// Where the session stands in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Disconnected,
    Connecting,
    AwaitingChallenge,
    Authenticating,
    Online,
    /// Credentials rejected; immediately followed by `Disconnected`.
    AuthFailed,
}

/// One step of the authentication handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Step 0: server greeting with the digest inputs.
    Challenge(Challenge),
    /// Step 1: server is ready for our identity.
    Identify,
    /// Step 2: identity accepted.
    Accepted,
    /// Step -1: identity rejected.
    Rejected { code: u16, reason: String },
}

impl HandshakeStep {
    /// The numeric step discriminant used by the protocol.
    pub fn code(&self) -> i8 {
        match self {
            HandshakeStep::Challenge(_) => 0,
            HandshakeStep::Identify => 1,
            HandshakeStep::Accepted => 2,
            HandshakeStep::Rejected { .. } => -1,
        }
    }
}

/// Source of the logins the server should report on.
///
/// Queried once per successful authentication and after a buddy removal.
pub trait WatchList: Send + Sync {
    fn logins(&self) -> Vec<String>;
}

impl WatchList for Vec<String> {
    fn logins(&self) -> Vec<String> {
        self.clone()
    }
}

impl WatchList for parking_lot::RwLock<Vec<String>> {
    fn logins(&self) -> Vec<String> {
        self.read().clone()
    }
}

/// Commands kept while the handshake is in progress; later ones are dropped.
pub const MAX_PENDING_COMMANDS: usize = 64;

/// Comment sent when the user configured none.
pub fn default_comment() -> String {
    format!("netsoul-sdk {}", env!("CARGO_PKG_VERSION"))
}

pub struct Session {
    config: ConnectConfig,
    watch_list: Arc<dyn WatchList>,
    phase: Phase,
    /// Digest for the in-flight handshake. Cleared on every teardown.
    digest: Option<String>,
    /// Timestamp from the server greeting.
    server_timestamp: Option<String>,
    identity_sent: bool,
    heartbeat: Heartbeat,
    presence: PresenceRegistry,
    /// Commands issued before the session was online.
    pending: Vec<Command>,
    outbox: VecDeque<Outbound>,
    events: VecDeque<Event>,
    location_request: Option<String>,
}

impl Session {
    pub fn new(config: ConnectConfig, watch_list: Arc<dyn WatchList>) -> Self {
        Self {
            config,
            watch_list,
            phase: Phase::Disconnected,
            digest: None,
            server_timestamp: None,
            identity_sent: false,
            heartbeat: Heartbeat::default(),
            presence: PresenceRegistry::new(),
            pending: Vec::new(),
            outbox: VecDeque::new(),
            events: VecDeque::new(),
            location_request: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn heartbeat_mut(&mut self) -> &mut Heartbeat {
        &mut self.heartbeat
    }

    /// Whether a digest is currently cached.
    pub fn holds_secret(&self) -> bool {
        self.digest.is_some()
    }

    pub fn server_timestamp(&self) -> Option<&str> {
        self.server_timestamp.as_deref()
    }

    pub fn poll_outbound(&mut self) -> Option<Outbound> {
        self.outbox.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Location string waiting for the resolver, if the handshake asked for one.
    pub fn take_location_request(&mut self) -> Option<String> {
        self.location_request.take()
    }

    /// Start a new connection attempt, tearing down whatever came before.
    pub fn begin_connect(&mut self) {
        if self.phase != Phase::Disconnected {
            self.disconnect("reconnecting");
        }
        self.reset();
        self.set_phase(Phase::Connecting);
    }

    /// The transport is up; wait for the server greeting.
    pub fn connected(&mut self) {
        if self.phase == Phase::Connecting {
            self.set_phase(Phase::AwaitingChallenge);
        } else {
            tracing::warn!(phase = ?self.phase, "Transport connected outside of a connect attempt");
        }
    }

    /// Feed one decoded record.
    pub fn handle_record(&mut self, record: &CommandRecord) {
        match Inbound::parse(record) {
            Ok(inbound) => self.handle_inbound(inbound),
            Err(e) => tracing::warn!(error = %e, record = %record, "Ignoring malformed record"),
        }
    }

    pub fn handle_inbound(&mut self, inbound: Inbound) {
        if self.phase == Phase::Disconnected {
            tracing::debug!(?inbound, "Ignoring record while disconnected");
            return;
        }
        if let Some(step) = self.handshake_step(&inbound) {
            self.apply_step(step);
            return;
        }
        match inbound {
            Inbound::Ping(token) => self.outbox.push_back(Outbound::Ping(token)),
            Inbound::User { from, event } => {
                if self.phase == Phase::Online {
                    self.dispatch_user(from, event);
                } else {
                    tracing::debug!(
                        phase = ?self.phase,
                        login = %from.login,
                        "Ignoring user record before authentication"
                    );
                }
            }
            Inbound::Reply { code, text } => {
                tracing::trace!(code, %text, "Server reply");
            }
            Inbound::Salut(_) => {
                tracing::warn!(phase = ?self.phase, "Unexpected greeting");
            }
        }
    }

    /// Map an inbound record to a handshake step, given the current phase.
    fn handshake_step(&self, inbound: &Inbound) -> Option<HandshakeStep> {
        match (self.phase, inbound) {
            (Phase::AwaitingChallenge, Inbound::Salut(challenge)) => {
                Some(HandshakeStep::Challenge(challenge.clone()))
            }
            (Phase::Authenticating, Inbound::Reply { code: 2, .. }) => Some(if self.identity_sent {
                HandshakeStep::Accepted
            } else {
                HandshakeStep::Identify
            }),
            (Phase::Authenticating, Inbound::Reply { code, text }) => Some(HandshakeStep::Rejected {
                code: *code,
                reason: text.clone(),
            }),
            _ => None,
        }
    }

    /// Drive the handshake by one step.
    pub fn apply_step(&mut self, step: HandshakeStep) {
        tracing::debug!(step = step.code(), phase = ?self.phase, "Handshake step");
        match step {
            HandshakeStep::Challenge(challenge) => self.on_challenge(challenge),
            HandshakeStep::Identify => self.on_identify(),
            HandshakeStep::Accepted => self.on_accepted(),
            HandshakeStep::Rejected { code, reason } => {
                self.heartbeat.stop();
                self.set_phase(Phase::AuthFailed);
                let reason = if reason.is_empty() {
                    format!("server replied {code:03}")
                } else {
                    reason
                };
                let err = AuthenticationError { reason };
                tracing::warn!(code, error = %err, "Authentication rejected");
                let detail = err.to_string();
                self.events.push_back(Event::AuthFailed { reason: err.reason });
                self.disconnect(&detail);
            }
        }
    }

    fn on_challenge(&mut self, challenge: Challenge) {
        if self.phase != Phase::AwaitingChallenge {
            tracing::debug!(phase = ?self.phase, "Ignoring challenge outside of AwaitingChallenge");
            return;
        }
        self.server_timestamp = Some(challenge.timestamp.clone());
        if self.config.password.is_empty() {
            tracing::warn!("Server challenge received but no password is configured");
            self.pending.clear();
            self.events.push_back(Event::CredentialsMissing);
            return;
        }
        self.digest = Some(auth::digest_for(&challenge, &self.config.password));
        self.outbox.push_back(Outbound::AuthAg);
        self.set_phase(Phase::Authenticating);
    }

    fn on_identify(&mut self) {
        if self.phase != Phase::Authenticating || self.identity_sent {
            tracing::debug!(phase = ?self.phase, "Ignoring identify step");
            return;
        }
        let Some(digest) = self.digest.clone() else {
            tracing::warn!("Identify step without a cached digest");
            return;
        };
        let location = self.config.location.clone();
        if location.is_empty() || location.contains(LOCATION_PLACEHOLDER) {
            self.location_request = Some(location.clone());
        }
        let comment = if self.config.comment.is_empty() {
            default_comment()
        } else {
            self.config.comment.clone()
        };
        self.outbox.push_back(Outbound::ExtUserLog {
            login: self.config.login.clone(),
            digest,
            location: codec::url_encode(&location),
            comment: codec::url_encode(&comment),
        });
        self.identity_sent = true;
    }

    fn on_accepted(&mut self) {
        if self.phase != Phase::Authenticating || !self.identity_sent {
            tracing::debug!(phase = ?self.phase, "Ignoring accepted step");
            return;
        }
        self.outbox.push_back(Outbound::State {
            state: PresenceState::Active,
            timestamp: chrono::Utc::now().timestamp(),
        });
        self.send_watch_list();
        if let Err(e) = self.heartbeat.start() {
            tracing::warn!(error = %e, "Heartbeat not restarted");
        }
        self.set_phase(Phase::Online);
        tracing::info!(login = %self.config.login, "Authenticated");

        for cmd in std::mem::take(&mut self.pending) {
            self.handle_command(cmd);
        }
    }

    fn send_watch_list(&mut self) {
        let logins = self.watch_list.logins();
        if logins.is_empty() {
            return;
        }
        self.outbox.push_back(Outbound::WatchLogUser(logins));
    }

    fn dispatch_user(&mut self, from: UserHeader, event: UserEvent) {
        let update = PresenceUpdate::from_header(&from);
        match event {
            UserEvent::State(state) => {
                if state.is_none() {
                    tracing::debug!(
                        login = %from.login,
                        "Unknown presence state, keeping previous one"
                    );
                }
                let buddy = self.presence.upsert(from.id, update.with_state(state));
                self.events.push_back(Event::PresenceChanged { buddy });
            }
            UserEvent::Login => {
                let buddy = self
                    .presence
                    .upsert(from.id, update.with_state(Some(PresenceState::Login)));
                // Login carries no comment; ask for it.
                self.outbox.push_back(Outbound::Who(vec![buddy.login.clone()]));
                self.events.push_back(Event::PresenceChanged { buddy });
            }
            UserEvent::Logout => {
                let buddy = self
                    .presence
                    .upsert(from.id, update.with_state(Some(PresenceState::Logout)));
                self.events.push_back(Event::PresenceChanged { buddy });
            }
            UserEvent::Message { text, recipients } => {
                let from = self.presence.upsert(from.id, update);
                self.events.push_back(Event::Message {
                    from,
                    text,
                    recipients,
                });
            }
            UserEvent::Typing(typing) => {
                self.events.push_back(Event::Typing {
                    id: from.id,
                    login: from.login,
                    typing,
                });
            }
            UserEvent::Who(entry) => {
                let buddy = self.presence.upsert(entry.id, PresenceUpdate::from_who(&entry));
                self.events.push_back(Event::ContactUpdated { buddy });
            }
            UserEvent::WhoEnd => tracing::trace!("End of who reply"),
        }
    }

    /// Apply a consumer command. Commands issued while the handshake is in
    /// progress are queued and replayed once online.
    pub fn handle_command(&mut self, cmd: Command) {
        // Local commands apply in every phase.
        if matches!(cmd, Command::Disconnect | Command::RemoveBuddy(_)) {
            return self.execute(cmd);
        }
        match self.phase {
            Phase::Online => self.execute(cmd),
            Phase::Disconnected | Phase::AuthFailed => {
                tracing::debug!(?cmd, "Dropping command, not connected");
            }
            _ if self.pending.len() >= MAX_PENDING_COMMANDS => {
                tracing::warn!(?cmd, "Dropping command, too many queued before authentication");
            }
            _ => self.pending.push(cmd),
        }
    }

    fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::SetStatus(state) => self.outbox.push_back(Outbound::State {
                state,
                timestamp: chrono::Utc::now().timestamp(),
            }),
            Command::SendMessage { to, text } => {
                if to.is_empty() {
                    tracing::debug!("Message without recipients dropped");
                    return;
                }
                self.outbox.push_back(Outbound::Message {
                    to,
                    text: codec::url_encode(&text),
                });
            }
            Command::Typing { to, typing } => {
                self.outbox.push_back(Outbound::Typing { to, typing })
            }
            Command::Watch => self.send_watch_list(),
            Command::Who(logins) => {
                if !logins.is_empty() {
                    self.outbox.push_back(Outbound::Who(logins));
                }
            }
            Command::Ping => self.outbox.push_back(Outbound::Ping(None)),
            Command::RemoveBuddy(login) => self.remove_buddy(login),
            Command::Disconnect => self.disconnect("disconnect requested"),
        }
    }

    fn remove_buddy(&mut self, login: String) {
        let removed = self.presence.remove_login(&login);
        tracing::debug!(%login, connections = removed.len(), "Buddy removed");
        self.events.push_back(Event::ConversationClosed { login });
        if self.phase == Phase::Online {
            self.send_watch_list();
        }
    }

    /// The heartbeat deadline passed.
    pub fn heartbeat_elapsed(&mut self) {
        if self.phase == Phase::Online && self.heartbeat.is_running() {
            self.outbox.push_back(Outbound::Ping(None));
        }
    }

    /// The resolver produced a concrete location.
    pub fn location_resolved(&mut self, location: String) {
        tracing::debug!(%location, "Location resolved");
        self.config.location = location.clone();
        self.events.push_back(Event::LocationResolved { location });
    }

    /// Tear the session down. Safe from any phase; a no-op when already
    /// disconnected.
    pub fn disconnect(&mut self, reason: &str) {
        if self.phase == Phase::Disconnected {
            return;
        }
        self.heartbeat.stop();
        self.reset();
        self.presence.mark_all_offline();
        self.set_phase(Phase::Disconnected);
        tracing::info!(%reason, "Disconnected");
        self.events.push_back(Event::Disconnected {
            reason: reason.to_string(),
        });
    }

    fn reset(&mut self) {
        self.digest = None;
        self.server_timestamp = None;
        self.identity_sent = false;
        self.pending.clear();
        self.outbox.clear();
        self.location_request = None;
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        tracing::debug!(from = ?self.phase, to = ?phase, "Phase change");
        self.phase = phase;
        self.events.push_back(Event::StateChanged { phase });
    }
}
