//! The partition list.
//!
//! Spec §9 calls out the original's doubly-linked list with manual link
//! surgery and says to model it as "an ordered sequence with an
//! `insert_unique_by_start` operation; no consumer relies on
//! prev-pointer stability across insertions." A `Vec` gives us that:
//! insertion order is preserved for the duration of a scan (spec §5's
//! "partitions appear in the good list in discovery order"), and
//! `sort_by_start` is a separate, explicit step taken once scanning
//! finishes.

use partscan_core::Partition;

#[derive(Debug, Default, Clone)]
pub struct PartitionList {
    entries: Vec<Partition>,
}

impl PartitionList {
    pub fn new() -> Self {
        PartitionList { entries: Vec::new() }
    }

    /// Inserts `partition` unless an entry with the same
    /// `(start, size, kind)` identity is already present, in which case
    /// the insert is silently dropped (spec §7, "insertion collision").
    /// Returns whether the partition was actually inserted.
    pub fn insert_unique(&mut self, partition: Partition) -> bool {
        if self.entries.iter().any(|p| p.identity() == partition.identity()) {
            return false;
        }
        self.entries.push(partition);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<Partition> {
        self.entries
    }

    pub fn as_slice(&self) -> &[Partition] {
        &self.entries
    }

    /// Sorts the list ascending by `start`, in place. Ties (equal
    /// `start`) keep their relative discovery order (`sort_by_key` is
    /// stable).
    pub fn sort_by_start(&mut self) {
        self.entries.sort_by_key(|p| p.start);
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Partition) -> bool) {
        self.entries.retain(|p| keep(p));
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Partition>) {
        for p in other {
            self.insert_unique(p);
        }
    }
}

impl FromIterator<Partition> for PartitionList {
    fn from_iter<T: IntoIterator<Item = Partition>>(iter: T) -> Self {
        let mut list = PartitionList::new();
        list.extend(iter);
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partscan_core::FsKind;

    #[test]
    fn rejects_exact_duplicate() {
        let mut list = PartitionList::new();
        let mut p = Partition::new(1024, FsKind::Ntfs);
        p.size = 2048;
        assert!(list.insert_unique(p.clone()));
        assert!(!list.insert_unique(p));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn allows_overlap_when_not_exact_duplicate() {
        let mut list = PartitionList::new();
        let mut a = Partition::new(0, FsKind::Fat32);
        a.size = 100;
        let mut b = Partition::new(50, FsKind::Fat32);
        b.size = 100;
        assert!(list.insert_unique(a));
        assert!(list.insert_unique(b));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn sort_by_start_is_stable_and_ascending() {
        let mut list = PartitionList::new();
        for start in [300, 100, 200] {
            let mut p = Partition::new(start, FsKind::Fat32);
            p.size = 10;
            list.insert_unique(p);
        }
        list.sort_by_start();
        let starts: Vec<u64> = list.iter().map(|p| p.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }
}
