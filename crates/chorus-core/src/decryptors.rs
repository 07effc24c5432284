//! Member-keyed decryptor table.

use std::collections::{BTreeMap, btree_map::Entry};

use chorus_crypto::Decryptor;

use crate::roster::MemberId;

/// One [`Decryptor`] per remote member.
///
/// Entries are inserted by decryptor sync and removed by roster
/// reconciliation the moment a member leaves. The table never holds the local
/// member.
#[derive(Debug)]
pub struct DecryptorTable {
    entries: BTreeMap<MemberId, Decryptor>,
    retain_previous_ratchet: bool,
}

impl DecryptorTable {
    /// Empty table; new decryptors use the given ratchet retention policy.
    pub fn new(retain_previous_ratchet: bool) -> Self {
        Self { entries: BTreeMap::new(), retain_previous_ratchet }
    }

    /// Decryptor for `member_id`, creating an unbound one if missing.
    ///
    /// The flag is `true` when the decryptor was just created.
    pub fn get_or_create(&mut self, member_id: MemberId) -> (&mut Decryptor, bool) {
        let retain = self.retain_previous_ratchet;

        match self.entries.entry(member_id) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(Decryptor::with_ratchet_retention(retain)), true),
        }
    }

    /// Decryptor for `member_id`.
    pub fn get(&self, member_id: MemberId) -> Option<&Decryptor> {
        self.entries.get(&member_id)
    }

    /// Mutable decryptor for `member_id`.
    pub fn get_mut(&mut self, member_id: MemberId) -> Option<&mut Decryptor> {
        self.entries.get_mut(&member_id)
    }

    /// Remove and return the decryptor for `member_id`.
    pub fn remove(&mut self, member_id: MemberId) -> Option<Decryptor> {
        self.entries.remove(&member_id)
    }

    /// Keep only members for which `keep` returns true. Returns the removed
    /// member ids.
    pub fn retain(&mut self, mut keep: impl FnMut(MemberId) -> bool) -> Vec<MemberId> {
        let mut removed = Vec::new();
        self.entries.retain(|member_id, _| {
            let kept = keep(*member_id);
            if !kept {
                removed.push(*member_id);
            }
            kept
        });
        removed
    }

    /// Whether a decryptor exists for `member_id`.
    pub fn contains(&self, member_id: MemberId) -> bool {
        self.entries.contains_key(&member_id)
    }

    /// Number of decryptors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Members with a decryptor, ascending.
    pub fn member_ids(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.entries.keys().copied()
    }

    /// Drop every decryptor.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for DecryptorTable {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_creates_once() {
        let mut table = DecryptorTable::default();

        let (_, created) = table.get_or_create(5);
        assert!(created);
        let (_, created) = table.get_or_create(5);
        assert!(!created);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn new_decryptors_start_unbound() {
        let mut table = DecryptorTable::new(false);
        let (decryptor, _) = table.get_or_create(1);
        assert!(decryptor.key_ratchet().is_none());
    }

    #[test]
    fn retain_reports_removed_members() {
        let mut table = DecryptorTable::default();
        for id in [1, 2, 3, 4] {
            table.get_or_create(id);
        }

        let removed = table.retain(|id| id % 2 == 0);

        assert_eq!(removed, vec![1, 3]);
        assert_eq!(table.member_ids().collect::<Vec<_>>(), vec![2, 4]);
    }

    #[test]
    fn remove_drops_entry() {
        let mut table = DecryptorTable::default();
        table.get_or_create(7);

        assert!(table.remove(7).is_some());
        assert!(table.remove(7).is_none());
        assert!(table.is_empty());
    }
}
