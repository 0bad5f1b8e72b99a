//! Conversation state per participant
//!
//! The roster maps each participant name to its picture, its message history
//! and, once a handshake has completed, its public key. All mutation goes
//! through the three methods on [`RosterStore`]; each one is synchronous and
//! cannot fail.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::AvatarBase;
use crate::crypto::PeerPublicKey;

/// Who wrote a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Written locally and sent to the peer
    Sent,
    /// Received from the peer
    Received,
}

/// One chat line
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Plaintext body
    pub text: String,
    /// When the message was recorded locally
    pub timestamp: DateTime<Utc>,
    /// Sent or received
    pub direction: Direction,
}

impl Message {
    /// A message we just sent
    pub fn sent(text: impl Into<String>) -> Self {
        Self::now(text.into(), Direction::Sent)
    }

    /// A message we just received
    pub fn received(text: impl Into<String>) -> Self {
        Self::now(text.into(), Direction::Received)
    }

    fn now(text: String, direction: Direction) -> Self {
        Message {
            text,
            timestamp: Utc::now(),
            direction,
        }
    }
}

/// Everything known about one participant
#[derive(Clone, Debug)]
pub struct ConversationEntry {
    display_name: String,
    picture_ref: String,
    history: Vec<Message>,
    peer_key: Option<PeerPublicKey>,
}

impl ConversationEntry {
    fn new(name: &str, avatars: &AvatarBase) -> Self {
        ConversationEntry {
            display_name: name.to_string(),
            picture_ref: avatars.picture_for(name),
            history: Vec::new(),
            peer_key: None,
        }
    }

    /// Participant name
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Avatar reference
    pub fn picture_ref(&self) -> &str {
        &self.picture_ref
    }

    /// Messages in the order they were recorded
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// The peer's key, present once their handshake reply arrived
    pub fn peer_public_key(&self) -> Option<&PeerPublicKey> {
        self.peer_key.as_ref()
    }

    /// Whether messages can be sealed for this peer
    pub fn is_secured(&self) -> bool {
        self.peer_key.is_some()
    }
}

/// Participant name → conversation state
#[derive(Clone, Debug)]
pub struct RosterStore {
    avatars: AvatarBase,
    entries: HashMap<String, ConversationEntry>,
}

impl RosterStore {
    /// An empty roster resolving pictures against `avatars`
    pub fn new(avatars: AvatarBase) -> Self {
        RosterStore {
            avatars,
            entries: HashMap::new(),
        }
    }

    /// Rebuild the roster to exactly `names`
    ///
    /// Entries for names that stay keep their history and key. New names get
    /// an empty entry, and names not listed are removed. Duplicate names
    /// collapse into one entry.
    pub fn replace_roster<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut previous = std::mem::take(&mut self.entries);

        for name in names {
            let name = name.into();
            if name.is_empty() || self.entries.contains_key(&name) {
                continue;
            }

            let entry = match previous.remove(&name) {
                Some(mut kept) => {
                    kept.picture_ref = self.avatars.picture_for(&name);
                    kept
                }
                None => ConversationEntry::new(&name, &self.avatars),
            };
            self.entries.insert(name, entry);
        }

        debug!(
            present = self.entries.len(),
            dropped = previous.len(),
            "Roster replaced"
        );
    }

    /// Attach a peer's imported key, creating the entry if needed
    pub fn record_peer_key(&mut self, name: &str, key: PeerPublicKey) {
        self.entry_mut(name).peer_key = Some(key);
    }

    /// Append to a participant's history, creating the entry if needed
    pub fn append_message(&mut self, name: &str, message: Message) {
        self.entry_mut(name).history.push(message);
    }

    /// Look up one participant
    pub fn get(&self, name: &str) -> Option<&ConversationEntry> {
        self.entries.get(name)
    }

    /// A participant's key, if the handshake completed
    pub fn peer_key(&self, name: &str) -> Option<&PeerPublicKey> {
        self.entries.get(name).and_then(ConversationEntry::peer_public_key)
    }

    /// Whether a participant is present
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All participant names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConversationEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the roster is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, name: &str) -> &mut ConversationEntry {
        let avatars = &self.avatars;
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| ConversationEntry::new(name, avatars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keypair::test_keys;

    fn store() -> RosterStore {
        RosterStore::new(AvatarBase::parse("https://avatars.example.com").unwrap())
    }

    #[test]
    fn test_replace_creates_entries() {
        let mut roster = store();
        roster.replace_roster(["alice", "bob"]);

        assert_eq!(roster.names(), vec!["alice", "bob"]);
        let bob = roster.get("bob").unwrap();
        assert_eq!(bob.display_name(), "bob");
        assert_eq!(bob.picture_ref(), "https://avatars.example.com/bob.png&size=20");
        assert!(bob.history().is_empty());
        assert!(!bob.is_secured());
    }

    #[test]
    fn test_replace_preserves_history_and_key() {
        let mut roster = store();
        let key = test_keys::bob().peer_public_key();

        roster.replace_roster(["alice", "bob"]);
        roster.record_peer_key("bob", key.clone());
        roster.append_message("bob", Message::sent("hi"));
        roster.append_message("bob", Message::received("hey"));
        let before = roster.get("bob").unwrap().history().to_vec();

        roster.replace_roster(["bob", "carol"]);

        let bob = roster.get("bob").unwrap();
        assert_eq!(bob.history(), before.as_slice());
        assert_eq!(bob.peer_public_key(), Some(&key));
    }

    #[test]
    fn test_replace_drops_absentees() {
        let mut roster = store();
        roster.replace_roster(["alice", "bob"]);
        roster.append_message("alice", Message::received("bye"));

        roster.replace_roster(["bob"]);

        assert!(!roster.contains("alice"));
        assert_eq!(roster.len(), 1);

        // Returning participant starts fresh
        roster.replace_roster(["alice", "bob"]);
        assert!(roster.get("alice").unwrap().history().is_empty());
    }

    #[test]
    fn test_replace_with_same_snapshot_is_noop() {
        let mut roster = store();
        roster.replace_roster(["alice", "bob"]);
        roster.append_message("alice", Message::sent("one"));
        roster.append_message("alice", Message::sent("two"));
        let before = roster.get("alice").unwrap().history().to_vec();

        roster.replace_roster(["alice", "bob"]);
        roster.replace_roster(["alice", "bob"]);

        assert_eq!(roster.get("alice").unwrap().history(), before.as_slice());
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_duplicate_and_empty_names_collapse() {
        let mut roster = store();
        roster.append_message("alice", Message::received("first"));

        roster.replace_roster(vec!["alice", "alice", "", "bob"]);

        assert_eq!(roster.names(), vec!["alice", "bob"]);
        assert_eq!(roster.get("alice").unwrap().history().len(), 1);
    }

    #[test]
    fn test_replace_with_empty_set_clears() {
        let mut roster = store();
        roster.replace_roster(["alice"]);
        roster.replace_roster(Vec::<String>::new());

        assert!(roster.is_empty());
    }

    #[test]
    fn test_record_key_creates_entry() {
        let mut roster = store();
        roster.record_peer_key("dave", test_keys::alice().peer_public_key());

        let dave = roster.get("dave").unwrap();
        assert!(dave.is_secured());
        assert!(dave.history().is_empty());
        assert!(roster.peer_key("dave").is_some());
    }

    #[test]
    fn test_append_creates_entry_and_keeps_order() {
        let mut roster = store();
        roster.append_message("erin", Message::received("1"));
        roster.append_message("erin", Message::sent("2"));
        roster.append_message("erin", Message::received("3"));

        let texts: Vec<&str> = roster
            .get("erin")
            .unwrap()
            .history()
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
        assert!(roster.peer_key("erin").is_none());
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::sent("a").direction, Direction::Sent);
        assert_eq!(Message::received("b").direction, Direction::Received);
    }
}
