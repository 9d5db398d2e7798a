//! In-memory buddy presence, keyed by server session id.
//!
//! The session is the only writer. Everything handed out to event consumers
//! is a clone, so readers never observe a half-applied update.

use std::collections::HashMap;

use serde::Serialize;

use crate::message::{BuddyId, PresenceState, UserHeader, WhoEntry};

/// Last known state of one connection of a buddy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuddyPresence {
    pub id: BuddyId,
    pub login: String,
    pub ip: String,
    pub promo: String,
    pub state: PresenceState,
    pub location: String,
    pub comment: String,
}

/// Partial update. `None` fields keep their previous value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub login: Option<String>,
    pub ip: Option<String>,
    pub promo: Option<String>,
    pub state: Option<PresenceState>,
    pub location: Option<String>,
    pub comment: Option<String>,
}

impl PresenceUpdate {
    pub fn from_header(header: &UserHeader) -> Self {
        Self {
            login: Some(header.login.clone()),
            ip: Some(header.ip.clone()),
            promo: Some(header.promo.clone()),
            location: Some(header.location.clone()),
            ..Default::default()
        }
    }

    pub fn from_who(entry: &WhoEntry) -> Self {
        Self {
            login: Some(entry.login.clone()),
            ip: Some(entry.ip.clone()),
            promo: Some(entry.promo.clone()),
            state: entry.state,
            location: Some(entry.location.clone()),
            comment: Some(entry.comment.clone()),
        }
    }

    pub fn with_state(mut self, state: Option<PresenceState>) -> Self {
        self.state = state;
        self
    }
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    buddies: HashMap<BuddyId, BuddyPresence>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update the entry for `id` and return a snapshot of it.
    ///
    /// A new entry without a known state starts as [`PresenceState::Login`].
    pub fn upsert(&mut self, id: BuddyId, update: PresenceUpdate) -> BuddyPresence {
        let entry = self.buddies.entry(id).or_insert_with(|| BuddyPresence {
            id,
            login: String::new(),
            ip: String::new(),
            promo: String::new(),
            state: PresenceState::Login,
            location: String::new(),
            comment: String::new(),
        });
        if let Some(login) = update.login {
            entry.login = login;
        }
        if let Some(ip) = update.ip {
            entry.ip = ip;
        }
        if let Some(promo) = update.promo {
            entry.promo = promo;
        }
        if let Some(state) = update.state {
            entry.state = state;
        }
        if let Some(location) = update.location {
            entry.location = location;
        }
        if let Some(comment) = update.comment {
            entry.comment = comment;
        }
        entry.clone()
    }

    pub fn get(&self, id: BuddyId) -> Option<&BuddyPresence> {
        self.buddies.get(&id)
    }

    /// All connections of `login`, in id order.
    pub fn find_login(&self, login: &str) -> Vec<&BuddyPresence> {
        let mut found: Vec<_> = self.buddies.values().filter(|b| b.login == login).collect();
        found.sort_by_key(|b| b.id);
        found
    }

    pub fn mark_all_offline(&mut self) {
        for buddy in self.buddies.values_mut() {
            buddy.state = PresenceState::Logout;
        }
    }

    pub fn remove(&mut self, id: BuddyId) -> Option<BuddyPresence> {
        self.buddies.remove(&id)
    }

    /// Drop every connection of `login`; returns what was removed.
    pub fn remove_login(&mut self, login: &str) -> Vec<BuddyPresence> {
        let ids: Vec<BuddyId> = self
            .buddies
            .values()
            .filter(|b| b.login == login)
            .map(|b| b.id)
            .collect();
        ids.into_iter().filter_map(|id| self.buddies.remove(&id)).collect()
    }

    pub fn len(&self) -> usize {
        self.buddies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buddies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuddyPresence> {
        self.buddies.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(s: PresenceState) -> PresenceUpdate {
        PresenceUpdate {
            state: Some(s),
            ..Default::default()
        }
    }

    #[test]
    fn upsert_same_id_keeps_one_entry_with_latest_state() {
        let mut reg = PresenceRegistry::new();
        reg.upsert(4, state(PresenceState::Active));
        let snap = reg.upsert(4, state(PresenceState::Away));
        assert_eq!(reg.len(), 1);
        assert_eq!(snap.state, PresenceState::Away);
        assert_eq!(reg.get(4).unwrap().state, PresenceState::Away);
    }

    #[test]
    fn upsert_unknown_id_creates_entry() {
        let mut reg = PresenceRegistry::new();
        assert!(reg.get(9).is_none());
        let snap = reg.upsert(
            9,
            PresenceUpdate {
                login: Some("bob".into()),
                ..Default::default()
            },
        );
        assert_eq!(snap.login, "bob");
        assert_eq!(snap.state, PresenceState::Login);
    }

    #[test]
    fn partial_update_keeps_comment() {
        let mut reg = PresenceRegistry::new();
        reg.upsert(
            1,
            PresenceUpdate {
                comment: Some("busy".into()),
                ..Default::default()
            },
        );
        let snap = reg.upsert(1, state(PresenceState::Idle));
        assert_eq!(snap.comment, "busy");
    }

    #[test]
    fn mark_all_offline_touches_every_entry() {
        let mut reg = PresenceRegistry::new();
        reg.upsert(1, state(PresenceState::Active));
        reg.upsert(2, state(PresenceState::Lock));
        reg.mark_all_offline();
        assert!(reg.iter().all(|b| b.state == PresenceState::Logout));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn remove_login_drops_all_connections() {
        let mut reg = PresenceRegistry::new();
        for id in [1, 2] {
            reg.upsert(
                id,
                PresenceUpdate {
                    login: Some("amy".into()),
                    ..Default::default()
                },
            );
        }
        reg.upsert(
            3,
            PresenceUpdate {
                login: Some("bob".into()),
                ..Default::default()
            },
        );
        assert_eq!(reg.find_login("amy").len(), 2);
        let removed = reg.remove_login("amy");
        assert_eq!(removed.len(), 2);
        assert_eq!(reg.len(), 1);
        assert!(reg.remove(3).is_some());
        assert!(reg.is_empty());
    }
}
