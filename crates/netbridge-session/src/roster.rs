//! Who is in the current station, and who has left it.

use std::collections::BTreeSet;

/// Two disjoint sets of display names.
///
/// A name is in at most one of the sets at any time: connecting moves it
/// out of `disconnected`, disconnecting moves it out of `connected`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    connected: BTreeSet<String>,
    disconnected: BTreeSet<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player_connected(&mut self, name: &str) {
        self.disconnected.remove(name);
        self.connected.insert(name.to_owned());
    }

    pub fn player_disconnected(&mut self, name: &str) {
        self.connected.remove(name);
        self.disconnected.insert(name.to_owned());
    }

    /// Forgets everyone currently connected. Used when we leave a station.
    pub fn clear_connected(&mut self) {
        self.connected.clear();
    }

    pub fn clear(&mut self) {
        self.connected.clear();
        self.disconnected.clear();
    }

    pub fn connected(&self) -> impl Iterator<Item = &str> {
        self.connected.iter().map(String::as_str)
    }

    pub fn disconnected(&self) -> impl Iterator<Item = &str> {
        self.disconnected.iter().map(String::as_str)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.connected.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.disconnected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disjoint(roster: &Roster) -> bool {
        roster.connected().all(|name| !roster.disconnected().any(|d| d == name))
    }

    #[test]
    fn test_player_connected_removes_from_disconnected() {
        let mut roster = Roster::new();
        roster.player_disconnected("Alice");
        roster.player_connected("Alice");

        assert!(roster.is_connected("Alice"));
        assert_eq!(roster.disconnected().count(), 0);
    }

    #[test]
    fn test_player_disconnected_moves_name_across() {
        let mut roster = Roster::new();
        roster.player_connected("Alice");
        roster.player_disconnected("Alice");

        assert!(!roster.is_connected("Alice"));
        assert_eq!(roster.disconnected().collect::<Vec<_>>(), vec!["Alice"]);
    }

    #[test]
    fn test_roster_sets_stay_disjoint_over_mixed_sequence() {
        let mut roster = Roster::new();
        let steps = [
            ("Alice", true),
            ("Bob", true),
            ("Alice", false),
            ("Carol", false),
            ("Alice", true),
            ("Bob", false),
            ("Bob", false),
            ("Carol", true),
            ("Alice", true),
        ];
        for (name, joined) in steps {
            if joined {
                roster.player_connected(name);
            } else {
                roster.player_disconnected(name);
            }
            assert!(disjoint(&roster), "overlap after {name} {joined}");
        }

        assert_eq!(roster.connected().collect::<Vec<_>>(), vec!["Alice", "Carol"]);
        assert_eq!(roster.disconnected().collect::<Vec<_>>(), vec!["Bob"]);
    }

    #[test]
    fn test_repeated_connect_is_set_semantics() {
        let mut roster = Roster::new();
        roster.player_connected("Alice");
        roster.player_connected("Alice");
        assert_eq!(roster.connected().count(), 1);
    }

    #[test]
    fn test_clear_connected_keeps_departures() {
        let mut roster = Roster::new();
        roster.player_connected("Alice");
        roster.player_disconnected("Bob");

        roster.clear_connected();

        assert_eq!(roster.connected().count(), 0);
        assert_eq!(roster.disconnected().collect::<Vec<_>>(), vec!["Bob"]);
        roster.clear();
        assert!(roster.is_empty());
    }
}
