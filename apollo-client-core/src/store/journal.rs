use std::collections::HashMap;
use std::collections::HashSet;

use serde_json_bytes::ByteString;

use crate::store::entity::EntityId;

/// The `(entity, storage key)` slots dirtied by a single write transaction.
///
/// Produced synchronously by the writer and consumed by the watch dispatch
/// before the write call returns.
#[derive(Clone, Debug, Default)]
pub(crate) struct ChangeJournal {
    changed: HashMap<EntityId, HashSet<ByteString>>,
}

impl ChangeJournal {
    pub(crate) fn record(&mut self, id: &EntityId, key: &ByteString) {
        self.changed
            .entry(id.clone())
            .or_default()
            .insert(key.clone());
    }

    pub(crate) fn contains(&self, id: &EntityId, key: &ByteString) -> bool {
        self.changed
            .get(id)
            .is_some_and(|keys| keys.contains(key))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub(crate) fn slots(&self) -> usize {
        self.changed.values().map(HashSet::len).sum()
    }
}

/// The `(entity, storage key)` slots a read actually consumed.
///
/// A watcher re-reads when a write's journal intersects its plan. A slot
/// found absent aborts the read and is not recorded; the successfully
/// visited prefix is retained.
#[derive(Clone, Debug, Default)]
pub(crate) struct ReadPlan {
    visited: HashMap<EntityId, HashSet<ByteString>>,
}

impl ReadPlan {
    pub(crate) fn record(&mut self, id: &EntityId, key: &ByteString) {
        self.visited
            .entry(id.clone())
            .or_default()
            .insert(key.clone());
    }

    pub(crate) fn intersects(&self, journal: &ChangeJournal) -> bool {
        self.visited
            .iter()
            .any(|(id, keys)| keys.iter().any(|key| journal.contains(id, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: &str, key: &str) -> (EntityId, ByteString) {
        (EntityId::from(id), ByteString::from(key))
    }

    #[test]
    fn plan_intersects_journal_on_shared_slot() {
        let mut journal = ChangeJournal::default();
        let (hero, name) = slot("query.hero", "name");
        journal.record(&hero, &name);

        let mut plan = ReadPlan::default();
        let (query, hero_key) = slot("query", "hero");
        plan.record(&query, &hero_key);
        assert!(!plan.intersects(&journal));

        plan.record(&hero, &name);
        assert!(plan.intersects(&journal));
    }

    #[test]
    fn same_key_on_another_entity_does_not_intersect() {
        let mut journal = ChangeJournal::default();
        let (hero, name) = slot("query.hero", "name");
        journal.record(&hero, &name);

        let mut plan = ReadPlan::default();
        let (villain, villain_name) = slot("query.villain", "name");
        plan.record(&villain, &villain_name);
        assert!(!plan.intersects(&journal));
    }

    #[test]
    fn journal_slot_count() {
        let mut journal = ChangeJournal::default();
        assert!(journal.is_empty());
        let (hero, name) = slot("query.hero", "name");
        journal.record(&hero, &name);
        journal.record(&hero, &name);
        assert_eq!(journal.slots(), 1);
    }
}
