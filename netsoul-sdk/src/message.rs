//! Typed netsoul messages.
//!
//! [`Inbound::parse`] turns a [`CommandRecord`] into named fields so nothing
//! downstream indexes into raw field lists. [`Outbound`] is the closed set of
//! commands the client ever writes.

use serde::{Deserialize, Serialize};

use crate::codec::{self, CommandRecord};
use crate::error::ProtocolError;

/// Numeric session id the server assigns to every connected client.
pub type BuddyId = u32;

/// Placeholder in the configured location asking for local resolution.
pub const LOCATION_PLACEHOLDER: &str = "%L";

/// A buddy's connectivity/activity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Login,
    Logout,
    Active,
    Away,
    Idle,
    Lock,
    Server,
}

impl PresenceState {
    /// Parse a wire state, ignoring a trailing `:<timestamp>`.
    pub fn from_wire(raw: &str) -> Option<Self> {
        let name = raw.split(':').next().unwrap_or(raw);
        match name {
            "login" => Some(Self::Login),
            "logout" => Some(Self::Logout),
            "actif" => Some(Self::Active),
            "away" => Some(Self::Away),
            "idle" => Some(Self::Idle),
            "lock" => Some(Self::Lock),
            "server" => Some(Self::Server),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Active => "actif",
            Self::Away => "away",
            Self::Idle => "idle",
            Self::Lock => "lock",
            Self::Server => "server",
        }
    }

    pub fn is_online(self) -> bool {
        self != Self::Logout
    }
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Login => "login",
            Self::Logout => "offline",
            Self::Active => "online",
            Self::Away => "away",
            Self::Idle => "idle",
            Self::Lock => "locked",
            Self::Server => "server",
        };
        f.pad(label)
    }
}

/// Parameters of the server greeting (`salut`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub socket: String,
    pub hash: String,
    pub host: String,
    pub port: String,
    pub timestamp: String,
}

/// Sender block of a `user_cmd` record:
/// `<id>:user:<trust>:<login>@<ip>:<workstation>:<location>:<promo>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserHeader {
    pub id: BuddyId,
    pub login: String,
    pub ip: String,
    pub location: String,
    pub promo: String,
}

impl UserHeader {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedHeader(raw.to_string());
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() < 7 {
            return Err(malformed());
        }
        let id = parse_id(parts[0])?;
        let (login, ip) = parts[3].split_once('@').ok_or_else(malformed)?;
        Ok(Self {
            id,
            login: login.to_string(),
            ip: ip.to_string(),
            location: codec::url_decode(parts[5]),
            promo: parts[6].to_string(),
        })
    }
}

/// One entry of a `who` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoEntry {
    pub id: BuddyId,
    pub login: String,
    pub ip: String,
    pub location: String,
    pub promo: String,
    pub state: Option<PresenceState>,
    pub comment: String,
}

/// What a `user_cmd` record carries after the `|` separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    /// `state <status>[:<ts>]`. `None` when the status is not one we know.
    State(Option<PresenceState>),
    Login,
    Logout,
    Message { text: String, recipients: Vec<String> },
    Typing(bool),
    Who(WhoEntry),
    WhoEnd,
}

/// A typed inbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Salut(Challenge),
    /// `rep <code> -- <text>`; acknowledgement or handshake verdict.
    Reply { code: u16, text: String },
    /// Server-initiated keepalive, echoed back verbatim.
    Ping(Option<String>),
    User { from: UserHeader, event: UserEvent },
}

impl Inbound {
    pub fn parse(record: &CommandRecord) -> Result<Self, ProtocolError> {
        let verb = record.verb();
        let missing = |field: &'static str| ProtocolError::MissingField {
            verb: verb.to_string(),
            field,
        };
        match verb {
            "" => Err(ProtocolError::Empty),
            "salut" => {
                let args = record.args();
                if args.len() < 5 {
                    return Err(missing("timestamp"));
                }
                Ok(Inbound::Salut(Challenge {
                    socket: args[0].clone(),
                    hash: args[1].clone(),
                    host: args[2].clone(),
                    port: args[3].clone(),
                    timestamp: args[4].clone(),
                }))
            }
            "rep" => {
                let raw = record.field(1).ok_or_else(|| missing("code"))?;
                let code = raw
                    .parse()
                    .map_err(|_| ProtocolError::Unsupported(record.to_string()))?;
                let text = record
                    .args()
                    .iter()
                    .skip(1)
                    .skip_while(|f| f.as_str() == "--")
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" ");
                Ok(Inbound::Reply { code, text })
            }
            "ping" => Ok(Inbound::Ping(record.field(1).map(str::to_string))),
            "user_cmd" => parse_user_cmd(record),
            _ => Err(ProtocolError::Unsupported(record.to_string())),
        }
    }
}

fn parse_id(raw: &str) -> Result<BuddyId, ProtocolError> {
    raw.parse().map_err(|_| ProtocolError::InvalidId(raw.to_string()))
}

fn parse_user_cmd(record: &CommandRecord) -> Result<Inbound, ProtocolError> {
    let header = record.field(1).ok_or_else(|| ProtocolError::MissingField {
        verb: "user_cmd".to_string(),
        field: "header",
    })?;
    let from = UserHeader::parse(header)?;

    // Body starts after the `|` separator.
    let body: Vec<&str> = record
        .fields()
        .iter()
        .skip(2)
        .skip_while(|f| f.as_str() == "|")
        .map(String::as_str)
        .collect();
    let Some((&kind, rest)) = body.split_first() else {
        return Err(ProtocolError::MissingField {
            verb: "user_cmd".to_string(),
            field: "body",
        });
    };

    let event = match kind {
        "state" => {
            let raw = rest.first().ok_or_else(|| ProtocolError::MissingField {
                verb: "state".to_string(),
                field: "status",
            })?;
            UserEvent::State(PresenceState::from_wire(raw))
        }
        "login" => UserEvent::Login,
        "logout" => UserEvent::Logout,
        "msg" => {
            let text = rest.first().ok_or_else(|| ProtocolError::MissingField {
                verb: "msg".to_string(),
                field: "text",
            })?;
            let recipients = rest
                .iter()
                .find_map(|f| f.strip_prefix("dst="))
                .map(|dst| dst.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default();
            UserEvent::Message {
                text: codec::url_decode(text),
                recipients,
            }
        }
        "typing_start" | "dotnetSoul_UserTyping" => UserEvent::Typing(true),
        "typing_end" | "dotnetSoul_UserCancelledTyping" => UserEvent::Typing(false),
        "who" => {
            if rest.first() == Some(&"rep") {
                UserEvent::WhoEnd
            } else {
                UserEvent::Who(parse_who(rest)?)
            }
        }
        other => return Err(ProtocolError::Unsupported(format!("user_cmd {other}"))),
    };
    Ok(Inbound::User { from, event })
}

// who <id> <login> <ip> <login-ts> <last-ts> <trust> <trust> <workstation>
//     <location> <group> <state> <comment>
fn parse_who(rest: &[&str]) -> Result<WhoEntry, ProtocolError> {
    if rest.len() < 11 {
        return Err(ProtocolError::MissingField {
            verb: "who".to_string(),
            field: "state",
        });
    }
    Ok(WhoEntry {
        id: parse_id(rest[0])?,
        login: rest[1].to_string(),
        ip: rest[2].to_string(),
        location: codec::url_decode(rest[8]),
        promo: rest[9].to_string(),
        state: PresenceState::from_wire(rest[10]),
        comment: rest.get(11).map(|c| codec::url_decode(c)).unwrap_or_default(),
    })
}

/// Commands written to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// `auth_ag ext_user none none`
    AuthAg,
    /// `ext_user_log <login> <digest> <location> <comment>`, fields already URL-encoded.
    ExtUserLog {
        login: String,
        digest: String,
        location: String,
        comment: String,
    },
    /// `state <status>:<unix-ts>`
    State { state: PresenceState, timestamp: i64 },
    /// `user_cmd watch_log_user {a,b}`
    WatchLogUser(Vec<String>),
    /// `user_cmd who {a,b}`
    Who(Vec<String>),
    /// `user_cmd msg_user {a,b} msg <text>`, text already URL-encoded.
    Message { to: Vec<String>, text: String },
    /// `user_cmd msg_user {a} dotnetSoul_UserTyping null`
    Typing { to: Vec<String>, typing: bool },
    /// `ping`, or `ping <n>` when echoing the server.
    Ping(Option<String>),
}

fn login_set(logins: &[String]) -> String {
    format!("{{{}}}", logins.join(","))
}

impl Outbound {
    pub fn to_line(&self) -> Vec<u8> {
        match self {
            Outbound::AuthAg => codec::encode("auth_ag", &["ext_user", "none", "none"]),
            Outbound::ExtUserLog {
                login,
                digest,
                location,
                comment,
            } => codec::encode("ext_user_log", &[login, digest, location, comment]),
            Outbound::State { state, timestamp } => {
                codec::encode("state", &[format!("{}:{timestamp}", state.as_wire())])
            }
            Outbound::WatchLogUser(logins) => {
                codec::encode("user_cmd", &["watch_log_user".to_string(), login_set(logins)])
            }
            Outbound::Who(logins) => {
                codec::encode("user_cmd", &["who".to_string(), login_set(logins)])
            }
            Outbound::Message { to, text } => codec::encode(
                "user_cmd",
                &["msg_user".to_string(), login_set(to), "msg".to_string(), text.clone()],
            ),
            Outbound::Typing { to, typing } => {
                let verb = if *typing {
                    "dotnetSoul_UserTyping"
                } else {
                    "dotnetSoul_UserCancelledTyping"
                };
                codec::encode(
                    "user_cmd",
                    &["msg_user".to_string(), login_set(to), verb.to_string(), "null".to_string()],
                )
            }
            Outbound::Ping(Some(token)) => codec::encode("ping", &[token]),
            Outbound::Ping(None) => codec::encode::<&str>("ping", &[]),
        }
    }
}

impl std::fmt::Display for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let line = self.to_line();
        f.write_str(String::from_utf8_lossy(&line).trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Inbound, ProtocolError> {
        let (record, _) = codec::decode(line.as_bytes());
        Inbound::parse(&record.expect("line"))
    }

    #[test]
    fn parses_salut() {
        let msg = parse("salut 12 0123abcd 10.0.0.1 4242 1285000000\n").unwrap();
        assert_eq!(
            msg,
            Inbound::Salut(Challenge {
                socket: "12".into(),
                hash: "0123abcd".into(),
                host: "10.0.0.1".into(),
                port: "4242".into(),
                timestamp: "1285000000".into(),
            })
        );
    }

    #[test]
    fn short_salut_is_a_protocol_error() {
        assert!(matches!(
            parse("salut 12 abc\n"),
            Err(ProtocolError::MissingField { field: "timestamp", .. })
        ));
    }

    #[test]
    fn parses_reply_codes() {
        assert_eq!(
            parse("rep 002 -- cmd end\n").unwrap(),
            Inbound::Reply { code: 2, text: "cmd end".into() }
        );
        assert!(matches!(
            parse("rep 033 -- ext user identification fail\n").unwrap(),
            Inbound::Reply { code: 33, .. }
        ));
    }

    #[test]
    fn parses_state_change() {
        let msg = parse(
            "user_cmd 441:user:1/3:bob_s@10.0.0.2:~:at%20home:epitech_2012 | state away:1285000001\n",
        )
        .unwrap();
        let Inbound::User { from, event } = msg else {
            panic!("expected user_cmd");
        };
        assert_eq!(from.id, 441);
        assert_eq!(from.login, "bob_s");
        assert_eq!(from.ip, "10.0.0.2");
        assert_eq!(from.location, "at home");
        assert_eq!(from.promo, "epitech_2012");
        assert_eq!(event, UserEvent::State(Some(PresenceState::Away)));
    }

    #[test]
    fn unknown_state_is_kept_as_none() {
        let msg = parse("user_cmd 1:user:1/3:a@1.1.1.1:~:x:p | state sleeping:1\n").unwrap();
        assert!(matches!(msg, Inbound::User { event: UserEvent::State(None), .. }));
    }

    #[test]
    fn parses_message_with_recipients() {
        let msg =
            parse("user_cmd 9:user:1/3:amy@1.2.3.4:~:lab:2013 | msg hello%20there dst=me,you\n")
                .unwrap();
        let Inbound::User { event, .. } = msg else {
            panic!("expected user_cmd");
        };
        assert_eq!(
            event,
            UserEvent::Message {
                text: "hello there".into(),
                recipients: vec!["me".into(), "you".into()],
            }
        );
    }

    #[test]
    fn parses_typing_variants() {
        let start = parse("user_cmd 9:user:1/3:amy@1.2.3.4:~:lab:2013 | typing_start\n").unwrap();
        let stop = parse(
            "user_cmd 9:user:1/3:amy@1.2.3.4:~:lab:2013 | dotnetSoul_UserCancelledTyping null dst=me\n",
        )
        .unwrap();
        assert!(matches!(start, Inbound::User { event: UserEvent::Typing(true), .. }));
        assert!(matches!(stop, Inbound::User { event: UserEvent::Typing(false), .. }));
    }

    #[test]
    fn parses_who_entry_and_terminator() {
        let entry = parse(
            "user_cmd 1:user:1/3:me@1.1.1.1:~:x:p | who 77 bob 10.0.0.9 1285000000 1285000100 3 1 ~ lab%201 2012 lock:1285000100 gone%20fishing\n",
        )
        .unwrap();
        let Inbound::User { event: UserEvent::Who(who), .. } = entry else {
            panic!("expected who entry");
        };
        assert_eq!(who.id, 77);
        assert_eq!(who.login, "bob");
        assert_eq!(who.location, "lab 1");
        assert_eq!(who.state, Some(PresenceState::Lock));
        assert_eq!(who.comment, "gone fishing");

        let end = parse("user_cmd 1:user:1/3:me@1.1.1.1:~:x:p | who rep 002 -- cmd end\n").unwrap();
        assert!(matches!(end, Inbound::User { event: UserEvent::WhoEnd, .. }));
    }

    #[test]
    fn non_numeric_id_is_rejected() {
        assert_eq!(
            parse("user_cmd abc:user:1/3:a@1.1.1.1:~:x:p | login\n"),
            Err(ProtocolError::InvalidId("abc".into()))
        );
    }

    #[test]
    fn outbound_lines_match_wire_format() {
        assert_eq!(Outbound::AuthAg.to_string(), "auth_ag ext_user none none");
        assert_eq!(
            Outbound::State { state: PresenceState::Active, timestamp: 1285000000 }.to_string(),
            "state actif:1285000000"
        );
        assert_eq!(
            Outbound::WatchLogUser(vec!["a".into(), "b".into()]).to_string(),
            "user_cmd watch_log_user {a,b}"
        );
        assert_eq!(
            Outbound::Typing { to: vec!["a".into()], typing: true }.to_string(),
            "user_cmd msg_user {a} dotnetSoul_UserTyping null"
        );
        assert_eq!(Outbound::Ping(None).to_line(), b"ping\n");
    }
}
