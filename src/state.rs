use std::collections::{BTreeMap, BTreeSet};

/// Members of one state group and which of them is active
#[derive(Debug, Default)]
struct Group {
    members: BTreeSet<String>,
    active: Option<String>,
    previous: Option<String>,
}

/// Activity of every declared state group
///
/// A group starts unset and then always has exactly one active member.
#[derive(Debug, Default)]
pub struct StateModel {
    groups: BTreeMap<String, Group>,
}

impl StateModel {
    pub fn declare(&mut self, group: &str, member: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .members
            .insert(member.to_string());
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    pub fn has_member(&self, group: &str, member: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|g| g.members.contains(member))
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn active(&self, group: &str) -> Option<&str> {
        self.groups.get(group).and_then(|g| g.active.as_deref())
    }

    /// The member that was active before the current one
    pub fn previous(&self, group: &str) -> Option<&str> {
        self.groups.get(group).and_then(|g| g.previous.as_deref())
    }

    /// Make `member` the active member of `group`, returning the member it replaced
    pub fn activate(&mut self, group: &str, member: &str) -> Option<String> {
        let g = self.groups.entry(group.to_string()).or_default();
        g.members.insert(member.to_string());
        let replaced = g.active.replace(member.to_string());
        g.previous = replaced.clone();
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_start_unset() {
        let mut states = StateModel::default();
        states.declare("power", "cool");
        states.declare("power", "hot");

        assert!(states.has_group("power"));
        assert!(states.has_member("power", "hot"));
        assert!(!states.has_member("power", "battery"));
        assert_eq!(states.active("power"), None);
        assert_eq!(states.groups().collect::<Vec<_>>(), vec!["power"]);
    }

    #[test]
    fn test_activate_tracks_previous_member() {
        let mut states = StateModel::default();
        assert_eq!(states.activate("power", "hot"), None);
        assert_eq!(states.activate("power", "cool"), Some("hot".to_string()));
        assert_eq!(states.active("power"), Some("cool"));
        assert_eq!(states.previous("power"), Some("hot"));

        // groups are independent
        states.activate("nvidia", "poweroff");
        assert_eq!(states.active("power"), Some("cool"));
        assert_eq!(states.previous("nvidia"), None);
    }
}
