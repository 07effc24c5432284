//! Membership roster and diff reconciliation.
//!
//! The engine reports membership two ways: a full snapshot (after a Welcome)
//! or an incremental diff (after a Commit). Inside a diff, empty key material
//! is a tombstone meaning "removed". The store itself never holds empty
//! material.

use std::collections::{BTreeMap, TryReserveError};

use tracing::debug;

/// Member identifier within a group.
pub type MemberId = u64;

/// Key-identifying material for one member.
pub type KeyMaterial = Vec<u8>;

/// Member id to key material.
pub type RosterMap = BTreeMap<MemberId, KeyMaterial>;

/// Incremental roster update produced by an accepted commit.
///
/// Keys are unique by construction. Empty material removes the member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    entries: RosterMap,
}

impl RosterDiff {
    /// Empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff from a raw map (empty values are removals).
    pub fn from_map(entries: RosterMap) -> Self {
        Self { entries }
    }

    /// Add a member or replace its key material.
    pub fn upsert(&mut self, member_id: MemberId, material: KeyMaterial) -> &mut Self {
        self.entries.insert(member_id, material);
        self
    }

    /// Mark a member as removed.
    pub fn remove(&mut self, member_id: MemberId) -> &mut Self {
        self.entries.insert(member_id, KeyMaterial::new());
        self
    }

    /// Entries in member id order.
    pub fn iter(&self) -> impl Iterator<Item = (MemberId, &[u8])> {
        self.entries.iter().map(|(id, material)| (*id, material.as_slice()))
    }

    /// Number of entries, removals included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the diff has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Underlying map.
    pub fn into_map(self) -> RosterMap {
        self.entries
    }
}

impl FromIterator<(MemberId, KeyMaterial)> for RosterDiff {
    fn from_iter<I: IntoIterator<Item = (MemberId, KeyMaterial)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

/// What happened to one member during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChange {
    /// Member joined
    Added(MemberId),
    /// Member rotated its key material
    Updated(MemberId),
    /// Member left or was removed
    Removed(MemberId),
}

impl RosterChange {
    /// Member this change concerns.
    pub fn member_id(&self) -> MemberId {
        match *self {
            Self::Added(id) | Self::Updated(id) | Self::Removed(id) => id,
        }
    }
}

/// Outcome of applying a diff or snapshot to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Store was empty (or replaced by a snapshot) and installed wholesale
    pub replaced: bool,
    /// Per-member changes, in member id order
    pub changes: Vec<RosterChange>,
}

impl ReconcileReport {
    /// Members added.
    pub fn added(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.changes.iter().filter_map(|c| match c {
            RosterChange::Added(id) => Some(*id),
            _ => None,
        })
    }

    /// Members whose key material changed.
    pub fn updated(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.changes.iter().filter_map(|c| match c {
            RosterChange::Updated(id) => Some(*id),
            _ => None,
        })
    }

    /// Members removed.
    pub fn removed(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.changes.iter().filter_map(|c| match c {
            RosterChange::Removed(id) => Some(*id),
            _ => None,
        })
    }

    /// Whether any member gained or changed key material, i.e. decryptors
    /// must be re-bound.
    pub fn needs_resync(&self) -> bool {
        self.changes.iter().any(|c| !matches!(c, RosterChange::Removed(_)))
    }
}

/// One member in an exported snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Member identifier
    pub member_id: MemberId,
    /// Key-identifying material (never empty)
    pub key: KeyMaterial,
}

/// Owned copy of the roster, flattened for export across a boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    entries: Vec<RosterEntry>,
}

impl RosterSnapshot {
    /// Entries in member id order.
    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot has no members.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key material for `member_id`.
    pub fn get(&self, member_id: MemberId) -> Option<&[u8]> {
        self.entries.iter().find(|e| e.member_id == member_id).map(|e| e.key.as_slice())
    }

    /// Convert back into a map.
    pub fn into_map(self) -> RosterMap {
        self.entries.into_iter().map(|e| (e.member_id, e.key)).collect()
    }
}

/// Authoritative roster.
///
/// # Invariants
///
/// - No entry has empty key material
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterStore {
    members: RosterMap,
}

impl RosterStore {
    /// Empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster wholesale with a full snapshot.
    ///
    /// Empty entries carry no meaning in a snapshot and are dropped.
    pub fn replace(&mut self, snapshot: RosterMap) -> ReconcileReport {
        self.members = snapshot.into_iter().filter(|(_, material)| !material.is_empty()).collect();

        let changes = self
            .members
            .keys()
            .map(|&member_id| {
                debug!(member_id, "installed member");
                RosterChange::Added(member_id)
            })
            .collect();
        debug!(members = self.members.len(), "installed full roster");

        ReconcileReport { replaced: true, changes }
    }

    /// Merge a commit diff.
    ///
    /// An empty store takes the diff as a full roster (its removals are
    /// meaningless there). Otherwise each entry adds, updates or removes one
    /// member. Applying the same diff twice leaves the same store.
    pub fn apply_diff(&mut self, diff: RosterDiff) -> ReconcileReport {
        if self.members.is_empty() {
            return self.replace(diff.into_map());
        }

        let mut changes = Vec::with_capacity(diff.len());

        for (member_id, material) in diff.into_map() {
            if material.is_empty() {
                self.members.remove(&member_id);
                debug!(member_id, "removed member from group");
                changes.push(RosterChange::Removed(member_id));
                continue;
            }

            if self.members.insert(member_id, material).is_some() {
                debug!(member_id, "updated member key");
                changes.push(RosterChange::Updated(member_id));
            } else {
                debug!(member_id, "added member to group");
                changes.push(RosterChange::Added(member_id));
            }
        }

        ReconcileReport { replaced: false, changes }
    }

    /// Key material for `member_id`.
    pub fn get(&self, member_id: MemberId) -> Option<&[u8]> {
        self.members.get(&member_id).map(Vec::as_slice)
    }

    /// Whether `member_id` is in the group.
    pub fn contains(&self, member_id: MemberId) -> bool {
        self.members.contains_key(&member_id)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member ids in ascending order.
    pub fn member_ids(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.members.keys().copied()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &RosterMap {
        &self.members
    }

    /// Drop every member.
    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Owned copy for export. Allocation failure is reported, not aborted on.
    pub fn try_snapshot(&self) -> Result<RosterSnapshot, TryReserveError> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(self.members.len())?;

        for (member_id, material) in &self.members {
            let mut key = KeyMaterial::new();
            key.try_reserve_exact(material.len())?;
            key.extend_from_slice(material);
            entries.push(RosterEntry { member_id: *member_id, key });
        }

        Ok(RosterSnapshot { entries })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn store(entries: &[(MemberId, &str)]) -> RosterStore {
        let mut store = RosterStore::new();
        store.replace(entries.iter().map(|(id, k)| (*id, k.as_bytes().to_vec())).collect());
        store
    }

    #[test]
    fn empty_store_installs_diff_verbatim() {
        let mut roster = RosterStore::new();
        let diff: RosterDiff = [(1, b"k1".to_vec()), (2, Vec::new()), (3, b"k3".to_vec())]
            .into_iter()
            .collect();

        let report = roster.apply_diff(diff);

        assert!(report.replaced);
        assert_eq!(report.added().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(roster.member_ids().collect::<Vec<_>>(), vec![1, 3]);
        assert!(!roster.contains(2));
    }

    #[test]
    fn removal_of_last_member_empties_store() {
        let mut roster = store(&[(1, "key1")]);
        let mut diff = RosterDiff::new();
        diff.remove(1);

        let report = roster.apply_diff(diff);

        assert!(roster.is_empty());
        assert_eq!(report.changes, vec![RosterChange::Removed(1)]);
        assert!(!report.needs_resync());
    }

    #[test]
    fn diff_reports_added_updated_removed() {
        let mut roster = store(&[(1, "a"), (2, "b")]);
        let mut diff = RosterDiff::new();
        diff.upsert(1, b"a2".to_vec()).remove(2).upsert(3, b"c".to_vec());

        let report = roster.apply_diff(diff);

        assert!(!report.replaced);
        assert_eq!(
            report.changes,
            vec![RosterChange::Updated(1), RosterChange::Removed(2), RosterChange::Added(3)]
        );
        assert!(report.needs_resync());
        assert_eq!(roster.get(1), Some(&b"a2"[..]));
        assert_eq!(roster.get(3), Some(&b"c"[..]));
    }

    #[test]
    fn snapshot_drops_empty_entries() {
        let mut roster = RosterStore::new();
        let report = roster.replace(RosterMap::from([(1, b"a".to_vec()), (2, Vec::new())]));

        assert_eq!(report.changes, vec![RosterChange::Added(1)]);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn try_snapshot_copies_entries_in_order() {
        let roster = store(&[(9, "nine"), (4, "four")]);
        let snapshot = roster.try_snapshot().unwrap();

        let ids: Vec<_> = snapshot.entries().iter().map(|e| e.member_id).collect();
        assert_eq!(ids, vec![4, 9]);
        assert_eq!(snapshot.get(9), Some(&b"nine"[..]));
        assert_eq!(snapshot.into_map(), *roster.as_map());
    }

    fn diff_strategy() -> impl Strategy<Value = RosterMap> {
        prop::collection::btree_map(0u64..16, prop::collection::vec(any::<u8>(), 0..4), 0..12)
    }

    proptest! {
        #[test]
        fn diff_on_empty_store_keeps_non_empty_entries(diff in diff_strategy()) {
            let mut roster = RosterStore::new();
            roster.apply_diff(RosterDiff::from_map(diff.clone()));

            let expected: RosterMap = diff.into_iter().filter(|(_, k)| !k.is_empty()).collect();
            prop_assert_eq!(roster.as_map(), &expected);
        }

        #[test]
        fn applying_diff_twice_equals_once(initial in diff_strategy(), diff in diff_strategy()) {
            let mut once = RosterStore::new();
            once.replace(initial);
            prop_assume!(!once.is_empty());
            let mut twice = once.clone();

            once.apply_diff(RosterDiff::from_map(diff.clone()));
            twice.apply_diff(RosterDiff::from_map(diff.clone()));
            twice.apply_diff(RosterDiff::from_map(diff));

            prop_assert_eq!(once, twice);
        }

        #[test]
        fn store_never_holds_empty_material(initial in diff_strategy(), diff in diff_strategy()) {
            let mut roster = RosterStore::new();
            roster.apply_diff(RosterDiff::from_map(initial));
            roster.apply_diff(RosterDiff::from_map(diff));

            prop_assert!(roster.as_map().values().all(|k| !k.is_empty()));
        }
    }
}
