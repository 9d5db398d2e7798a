//! Application state for the CLI: input parsing, roster and event rendering.

use std::collections::BTreeMap;
use std::sync::Arc;

use netsoul_sdk::client::{self, ClientHandle, ConnectConfig, LocationResolver};
use netsoul_sdk::event::Event;
use netsoul_sdk::message::{LOCATION_PLACEHOLDER, PresenceState};
use netsoul_sdk::presence::BuddyPresence;
use netsoul_sdk::session::Phase;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::config::{Config, Resolved};

pub const HELP: &str = "\
commands:
  /connect                     connect (or reconnect)
  /disconnect                  close the connection
  /status <actif|away|idle|lock>
  /msg <login>[,login..] <text>
  /typing <login> <on|off>
  /who <login> [login..]
  /watch <login>               add to contacts
  /unwatch <login>             remove from contacts
  /buddies                     list contacts and their state
  /save                        write settings to the config file
  /quit";

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Connect,
    Disconnect,
    Status(PresenceState),
    Msg { to: Vec<String>, text: String },
    Typing { to: String, typing: bool },
    Who(Vec<String>),
    Watch(String),
    Unwatch(String),
    Buddies,
    Save,
    Help,
    Quit,
}

/// Parse a line typed by the user. Blank lines give `Ok(None)`.
pub fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Err("commands start with '/', try /help".to_string());
    };
    let (cmd, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();
    let words: Vec<&str> = args.split_whitespace().collect();

    let input = match cmd {
        "connect" => Input::Connect,
        "disconnect" => Input::Disconnect,
        "status" => {
            let state = match args {
                "actif" | "active" => PresenceState::Active,
                "away" => PresenceState::Away,
                "idle" => PresenceState::Idle,
                "lock" => PresenceState::Lock,
                _ => return Err("usage: /status <actif|away|idle|lock>".to_string()),
            };
            Input::Status(state)
        }
        "msg" => {
            let (to, text) = args.split_once(' ').ok_or("usage: /msg <login> <text>")?;
            let to: Vec<String> = to
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            let text = text.trim();
            if to.is_empty() || text.is_empty() {
                return Err("usage: /msg <login> <text>".to_string());
            }
            Input::Msg {
                to,
                text: text.to_string(),
            }
        }
        "typing" => match words.as_slice() {
            [to, "on"] => Input::Typing {
                to: to.to_string(),
                typing: true,
            },
            [to, "off"] => Input::Typing {
                to: to.to_string(),
                typing: false,
            },
            _ => return Err("usage: /typing <login> <on|off>".to_string()),
        },
        "who" => {
            if words.is_empty() {
                return Err("usage: /who <login> [login..]".to_string());
            }
            Input::Who(words.iter().map(|s| s.to_string()).collect())
        }
        "watch" | "unwatch" => {
            let [login] = words.as_slice() else {
                return Err(format!("usage: /{cmd} <login>"));
            };
            if cmd == "watch" {
                Input::Watch(login.to_string())
            } else {
                Input::Unwatch(login.to_string())
            }
        }
        "buddies" => Input::Buddies,
        "save" => Input::Save,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => return Err(format!("unknown command /{other}, try /help")),
    };
    Ok(Some(input))
}

/// Replaces `%L` (or an empty location) with the machine host name.
pub struct HostnameResolver;

impl LocationResolver for HostnameResolver {
    fn resolve(&self, location: &str) -> Option<String> {
        let host = whoami::fallible::hostname().ok()?;
        if location.is_empty() {
            Some(host)
        } else {
            Some(location.replace(LOCATION_PLACEHOLDER, &host))
        }
    }
}

pub struct App {
    pub settings: Resolved,
    /// Config as loaded from disk.
    pub file_config: Config,
    /// Shared with the session, which reads it on every watch-list send.
    pub contacts: Arc<RwLock<Vec<String>>>,
    /// Latest known presence per login.
    pub roster: BTreeMap<String, BuddyPresence>,
    pub phase: Phase,
    /// What the resolver made of a `%L` location. Never saved.
    pub resolved_location: Option<String>,
    pub json: bool,
    handle: Option<ClientHandle>,
}

impl App {
    pub fn new(settings: Resolved, file_config: Config, json: bool) -> Self {
        let contacts = Arc::new(RwLock::new(settings.contacts.clone()));
        Self {
            settings,
            file_config,
            contacts,
            roster: BTreeMap::new(),
            phase: Phase::Disconnected,
            resolved_location: None,
            json,
            handle: None,
        }
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            server_addr: self.settings.server.clone(),
            login: self.settings.login.clone(),
            password: self.settings.password.clone(),
            location: self
                .resolved_location
                .clone()
                .unwrap_or_else(|| self.settings.location.clone()),
            comment: self.settings.comment.clone(),
        }
    }

    /// Connect, tearing down any previous connection first.
    pub async fn connect(&mut self) -> anyhow::Result<mpsc::Receiver<Event>> {
        self.disconnect().await?;
        let config = self.connect_config();
        config.validate()?;
        tracing::info!(server = %config.server_addr, login = %config.login, "Connecting");
        let (handle, events) =
            client::connect(config, self.contacts.clone(), Some(Arc::new(HostnameResolver))).await?;
        self.handle = Some(handle);
        Ok(events)
    }

    /// Close the connection and wait for its task to finish.
    pub async fn disconnect(&mut self) -> anyhow::Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.disconnect().await?;
        }
        Ok(())
    }

    fn online(&self) -> anyhow::Result<&ClientHandle> {
        match &self.handle {
            Some(handle) if !handle.is_closed() => Ok(handle),
            _ => anyhow::bail!("not connected, use /connect"),
        }
    }

    /// Run one input. Returns a line to show the user, if any.
    pub async fn run(&mut self, input: Input) -> anyhow::Result<Option<String>> {
        match input {
            Input::Status(state) => self.online()?.set_status(state).await?,
            Input::Msg { to, text } => {
                let to: Vec<&str> = to.iter().map(String::as_str).collect();
                self.online()?.send_message(&to, &text).await?;
            }
            Input::Typing { to, typing } => self.online()?.typing(&to, typing).await?,
            Input::Who(logins) => {
                let logins: Vec<&str> = logins.iter().map(String::as_str).collect();
                self.online()?.who(&logins).await?;
            }
            Input::Watch(login) => {
                {
                    let mut contacts = self.contacts.write();
                    if contacts.contains(&login) {
                        return Ok(Some(format!("{login} is already a contact")));
                    }
                    contacts.push(login.clone());
                }
                self.settings.contacts = self.contacts.read().clone();
                if let Ok(handle) = self.online() {
                    handle.watch().await?;
                    handle.who(&[login.as_str()]).await?;
                }
                return Ok(Some(format!("watching {login}")));
            }
            Input::Unwatch(login) => {
                self.contacts.write().retain(|c| c != &login);
                self.settings.contacts = self.contacts.read().clone();
                match self.online() {
                    Ok(handle) => handle.remove_buddy(&login).await?,
                    Err(_) => {
                        self.roster.remove(&login);
                    }
                }
                return Ok(Some(format!("stopped watching {login}")));
            }
            Input::Buddies => return Ok(Some(self.buddies())),
            Input::Save => {
                let config = self.settings.to_config(&self.file_config);
                let path = config.save()?;
                self.file_config = config;
                return Ok(Some(format!("saved {}", path.display())));
            }
            Input::Help => return Ok(Some(HELP.to_string())),
            Input::Connect | Input::Disconnect | Input::Quit => {}
        }
        Ok(None)
    }

    /// Fold an event into the roster and render it.
    pub fn apply_event(&mut self, event: &Event) -> Option<String> {
        match event {
            Event::StateChanged { phase } => self.phase = *phase,
            Event::PresenceChanged { buddy } | Event::ContactUpdated { buddy } => {
                self.roster.insert(buddy.login.clone(), buddy.clone());
            }
            Event::Message { from, .. } => {
                self.roster.insert(from.login.clone(), from.clone());
            }
            Event::ConversationClosed { login } => {
                self.roster.remove(login);
            }
            Event::LocationResolved { location } => {
                self.resolved_location = Some(location.clone());
            }
            Event::Disconnected { .. } => {
                for buddy in self.roster.values_mut() {
                    buddy.state = PresenceState::Logout;
                }
            }
            _ => {}
        }
        if self.json {
            return serde_json::to_string(event).ok();
        }
        describe(event)
    }

    /// Follow-up work for an event. Once online, ask for every contact's
    /// details: the watch list only reports changes from now on.
    pub async fn after_event(&self, event: &Event) -> anyhow::Result<()> {
        if !matches!(event, Event::StateChanged { phase: Phase::Online }) {
            return Ok(());
        }
        let contacts = self.contacts.read().clone();
        if contacts.is_empty() {
            return Ok(());
        }
        let logins: Vec<&str> = contacts.iter().map(String::as_str).collect();
        self.online()?.who(&logins).await
    }

    pub fn buddies(&self) -> String {
        let contacts = self.contacts.read();
        if contacts.is_empty() {
            return "no contacts, add one with /watch <login>".to_string();
        }
        contacts
            .iter()
            .map(|login| match self.roster.get(login) {
                Some(b) if b.comment.is_empty() => {
                    format!("{login:<12} {:<8} {}", b.state, b.location)
                }
                Some(b) => format!("{login:<12} {:<8} {} ({})", b.state, b.location, b.comment),
                None => format!("{login:<12} {}", PresenceState::Logout),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Human-readable rendering of an event; `None` for events not worth a line.
pub fn describe(event: &Event) -> Option<String> {
    let line = match event {
        Event::StateChanged { phase } => match phase {
            Phase::Online => "* online".to_string(),
            Phase::Connecting => "* connecting...".to_string(),
            _ => return None,
        },
        Event::CredentialsMissing => "! no password configured (set NETSOUL_PASSWORD)".to_string(),
        Event::AuthFailed { reason } => format!("! authentication failed: {reason}"),
        Event::PresenceChanged { buddy } => {
            format!("* {} is now {} ({})", buddy.login, buddy.state, buddy.location)
        }
        Event::ContactUpdated { .. } => return None,
        Event::Message { from, text, .. } => format!("<{}> {text}", from.login),
        Event::Typing { login, typing, .. } => {
            if *typing {
                format!("* {login} is typing...")
            } else {
                return None;
            }
        }
        Event::ConversationClosed { login } => format!("* conversation with {login} closed"),
        Event::LocationResolved { location } => format!("* location: {location}"),
        Event::Disconnected { reason } => format!("* disconnected: {reason}"),
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buddy(login: &str, state: PresenceState) -> BuddyPresence {
        BuddyPresence {
            id: 3,
            login: login.into(),
            ip: "10.0.0.9".into(),
            promo: "epita_2026".into(),
            state,
            location: "lab".into(),
            comment: String::new(),
        }
    }

    fn app() -> App {
        let settings = Resolved {
            server: "localhost:4242".into(),
            login: "me_x".into(),
            password: "pw".into(),
            location: "%L".into(),
            comment: String::new(),
            contacts: vec!["amy".into()],
        };
        App::new(settings, Config::default(), false)
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_input("  "), Ok(None));
        assert_eq!(parse_input("/connect"), Ok(Some(Input::Connect)));
        assert_eq!(
            parse_input("/status away"),
            Ok(Some(Input::Status(PresenceState::Away)))
        );
        assert_eq!(
            parse_input("/msg amy,bob see you at 5"),
            Ok(Some(Input::Msg {
                to: vec!["amy".into(), "bob".into()],
                text: "see you at 5".into()
            }))
        );
        assert_eq!(
            parse_input("/typing amy off"),
            Ok(Some(Input::Typing {
                to: "amy".into(),
                typing: false
            }))
        );
        assert_eq!(
            parse_input("/who amy bob"),
            Ok(Some(Input::Who(vec!["amy".into(), "bob".into()])))
        );
        assert_eq!(parse_input("/unwatch amy"), Ok(Some(Input::Unwatch("amy".into()))));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_input("hello").is_err());
        assert!(parse_input("/status login").is_err());
        assert!(parse_input("/msg amy").is_err());
        assert!(parse_input("/typing amy maybe").is_err());
        assert!(parse_input("/watch").is_err());
        assert!(parse_input("/frobnicate").is_err());
    }

    #[test]
    fn roster_follows_presence_events() {
        let mut app = app();
        let line = app.apply_event(&Event::PresenceChanged {
            buddy: buddy("amy", PresenceState::Away),
        });
        assert_eq!(line.as_deref(), Some("* amy is now away (lab)"));
        assert!(app.buddies().contains("away"));

        app.apply_event(&Event::Disconnected {
            reason: "bye".into(),
        });
        assert_eq!(app.roster["amy"].state, PresenceState::Logout);

        app.apply_event(&Event::ConversationClosed { login: "amy".into() });
        assert!(app.roster.is_empty());
    }

    #[test]
    fn json_mode_serializes_events() {
        let mut app = app();
        app.json = true;
        let line = app
            .apply_event(&Event::Disconnected {
                reason: "bye".into(),
            })
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "disconnected");
        assert_eq!(value["data"]["reason"], "bye");
    }

    #[tokio::test]
    async fn watch_and_unwatch_update_contacts_offline() {
        let mut app = app();
        app.run(Input::Watch("bob".into())).await.unwrap();
        assert_eq!(*app.contacts.read(), vec!["amy".to_string(), "bob".to_string()]);
        app.run(Input::Unwatch("amy".into())).await.unwrap();
        assert_eq!(app.settings.contacts, vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn network_commands_need_a_connection() {
        let mut app = app();
        let err = app.run(Input::Status(PresenceState::Away)).await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn resolved_location_is_used_but_not_saved() {
        let mut app = app();
        app.apply_event(&Event::LocationResolved {
            location: "pc-42".into(),
        });
        assert_eq!(app.connect_config().location, "pc-42");
        let saved = app.settings.to_config(&app.file_config);
        assert_eq!(saved.location.as_deref(), Some("%L"));
    }

    #[tokio::test]
    async fn going_online_requests_every_contact() {
        use netsoul_sdk::client::connect_with_stream;
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let mut app = app();
        app.contacts.write().push("bob".into());
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (handle, mut events) = connect_with_stream(
            client_io,
            app.connect_config(),
            app.contacts.clone(),
            None,
        );
        app.handle = Some(handle);

        let (reader, mut writer) = tokio::io::split(server_io);
        let mut lines = BufReader::new(reader).lines();
        writer
            .write_all(b"salut 12 0123abcd 10.0.0.1 4242 1285000000\n")
            .await
            .unwrap();
        lines.next_line().await.unwrap();
        writer.write_all(b"rep 002 -- cmd end\n").await.unwrap();
        lines.next_line().await.unwrap();
        writer.write_all(b"rep 002 -- cmd end\n").await.unwrap();

        while let Some(event) = events.recv().await {
            app.apply_event(&event);
            app.after_event(&event).await.unwrap();
            if app.phase == Phase::Online {
                break;
            }
        }

        let mut sent = Vec::new();
        for _ in 0..3 {
            sent.push(lines.next_line().await.unwrap().unwrap());
        }
        assert!(sent[0].starts_with("state actif:"));
        assert_eq!(sent[1], "user_cmd watch_log_user {amy,bob}");
        assert_eq!(sent[2], "user_cmd who {amy,bob}");
    }

    #[tokio::test]
    async fn other_events_send_nothing() {
        let app = app();
        app.after_event(&Event::StateChanged {
            phase: Phase::Connecting,
        })
        .await
        .unwrap();
    }

    #[test]
    fn hostname_resolver_replaces_placeholder() {
        let Ok(host) = whoami::fallible::hostname() else {
            return;
        };
        assert_eq!(HostnameResolver.resolve("%L"), Some(host.clone()));
        assert_eq!(HostnameResolver.resolve(""), Some(host.clone()));
        assert_eq!(HostnameResolver.resolve("at %L"), Some(format!("at {host}")));
    }
}
