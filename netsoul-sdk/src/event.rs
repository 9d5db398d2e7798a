//! Events emitted by the netsoul client for the UI layer to consume.

use serde::Serialize;

use crate::message::BuddyId;
use crate::presence::BuddyPresence;
use crate::session::Phase;

/// Events that the SDK emits to the consumer (CLI, GUI, bot, etc.)
///
/// Serialized with `#[serde(tag = "type", content = "data")]` so JSON
/// consumers can switch on `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// The session moved to a new phase.
    StateChanged {
        phase: Phase,
    },

    /// The server sent its challenge but no password is configured.
    CredentialsMissing,

    /// The server rejected our credentials. The session is torn down.
    AuthFailed {
        reason: String,
    },

    /// A buddy's state changed (`state`, `login`, `logout`).
    PresenceChanged {
        buddy: BuddyPresence,
    },

    /// Refreshed buddy details from a `who` reply. No notification semantics.
    ContactUpdated {
        buddy: BuddyPresence,
    },

    /// An instant message, with the sender's presence at reception time.
    Message {
        from: BuddyPresence,
        text: String,
        recipients: Vec<String>,
    },

    /// A buddy started or stopped typing.
    Typing {
        id: BuddyId,
        login: String,
        typing: bool,
    },

    /// A buddy was removed from the watch list; any conversation with them is over.
    ConversationClosed {
        login: String,
    },

    /// The location placeholder was resolved.
    LocationResolved {
        location: String,
    },

    /// Connection was closed.
    Disconnected {
        reason: String,
    },
}
