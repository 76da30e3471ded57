//! Turns watch events into ADD / UPDATE / REMOVE records

use ovsk_core::{ChangePredicate, Update};
use std::collections::{HashMap, HashSet};

/// Last known view of every object of one kind
#[derive(Debug)]
pub struct ChangeTracker<T> {
    known: HashMap<String, T>,
    /// Keys seen since the current relist started
    relisting: Option<HashSet<String>>,
}

impl<T> Default for ChangeTracker<T> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisting: None,
        }
    }
}

impl<T: ChangePredicate + Clone> ChangeTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// ADD on first sight, UPDATE only when the predicate fires
    pub fn observe(&mut self, key: &str, info: T) -> Option<Update<T>> {
        if let Some(seen) = self.relisting.as_mut() {
            seen.insert(key.to_string());
        }
        match self.known.insert(key.to_string(), info.clone()) {
            None => Some(Update::add(info)),
            Some(old) if T::has_changed(&old, &info) => Some(Update::update(info)),
            Some(_) => None,
        }
    }

    pub fn forget(&mut self, key: &str) -> Option<Update<T>> {
        self.known.remove(key).map(Update::remove)
    }

    pub fn begin_relist(&mut self) {
        self.relisting = Some(HashSet::new());
    }

    /// REMOVE for everything the relist did not return
    pub fn finish_relist(&mut self) -> Vec<Update<T>> {
        let Some(seen) = self.relisting.take() else {
            return Vec::new();
        };
        let gone: Vec<String> = self
            .known
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        gone.iter().filter_map(|key| self.forget(key)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsk_core::{NodeInfo, Operation};
    use std::net::Ipv4Addr;

    fn node(ip: [u8; 4]) -> NodeInfo {
        NodeInfo::new("node-b", Some("node-b"), Some(Ipv4Addr::from(ip)))
    }

    #[test]
    fn test_add_then_unchanged_then_update() {
        let mut tracker = ChangeTracker::new();
        let first = tracker.observe("node-b", node([10, 0, 0, 2])).unwrap();
        assert_eq!(first.op, Operation::Add);
        assert!(tracker.observe("node-b", node([10, 0, 0, 2])).is_none());
        let changed = tracker.observe("node-b", node([10, 0, 0, 3])).unwrap();
        assert_eq!(changed.op, Operation::Update);
        assert_eq!(changed.resource.internal_ip, Some(Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[test]
    fn test_forget_unknown_is_silent() {
        let mut tracker: ChangeTracker<NodeInfo> = ChangeTracker::new();
        assert!(tracker.forget("ghost").is_none());
        tracker.observe("node-b", node([10, 0, 0, 2]));
        let removed = tracker.forget("node-b").unwrap();
        assert_eq!(removed.op, Operation::Remove);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_relist_removes_vanished_objects() {
        let mut tracker = ChangeTracker::new();
        tracker.observe("a", NodeInfo::new("a", Some("a"), None));
        tracker.observe("b", NodeInfo::new("b", Some("b"), None));

        tracker.begin_relist();
        assert!(tracker.observe("a", NodeInfo::new("a", Some("a"), None)).is_none());
        let removed = tracker.finish_relist();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].op, Operation::Remove);
        assert_eq!(removed[0].resource.name, "b");
        assert_eq!(tracker.len(), 1);
        assert!(tracker.finish_relist().is_empty());
    }
}
