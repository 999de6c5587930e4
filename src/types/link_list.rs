//! Link reference counts
//!
//! Counts live in a flat slot table indexed by (link, partition), so the
//! sharded and unsharded cases share one representation. A count that drops
//! to zero is removed.

use std::collections::HashMap;

use crate::db::schemas::LinkTrackerDoc;
use crate::types::Partition;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    link: String,
    partition: Partition,
    count: u32,
}

/// Reference counts, mutated in the owning partition
#[derive(Debug, Clone, Default)]
pub struct LinkList {
    partition: Partition,
    slots: Vec<Slot>,
    index: HashMap<(String, Partition), usize>,
}

impl LinkList {
    /// Empty list whose mutations target `partition`
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Load durable records
    pub fn from_docs(partition: Partition, docs: &[LinkTrackerDoc]) -> Self {
        let mut list = Self::new(partition);
        for doc in docs {
            list.set(&doc.link, doc.count, doc.shard);
        }
        list
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Count in this list's partition
    pub fn get(&self, link: &str) -> Option<u32> {
        self.get_in(self.partition, link)
    }

    pub fn get_in(&self, partition: Partition, link: &str) -> Option<u32> {
        self.index
            .get(&(link.to_string(), partition))
            .map(|&i| self.slots[i].count)
    }

    /// Sum across every partition
    pub fn global_count(&self, link: &str) -> u32 {
        self.slots
            .iter()
            .filter(|slot| slot.link == link)
            .map(|slot| slot.count)
            .sum()
    }

    /// Set a count directly. Zero removes the entry.
    pub fn set(&mut self, link: &str, count: u32, partition: Partition) {
        let key = (link.to_string(), partition);
        if count == 0 {
            self.remove_key(&key);
            return;
        }
        match self.index.get(&key) {
            Some(&i) => self.slots[i].count = count,
            None => {
                self.index.insert(key, self.slots.len());
                self.slots.push(Slot {
                    link: link.to_string(),
                    partition,
                    count,
                });
            }
        }
    }

    /// Add one reference, starting from 1 when absent
    pub fn increment(&mut self, link: &str) -> u32 {
        let count = self.get(link).unwrap_or(0) + 1;
        self.set(link, count, self.partition);
        count
    }

    /// Drop one reference. Returns `None` when the link was not tracked,
    /// otherwise the new count; zero means the entry was removed.
    pub fn decrement(&mut self, link: &str) -> Option<u32> {
        let count = self.get(link)?.saturating_sub(1);
        self.set(link, count, self.partition);
        Some(count)
    }

    /// Distinct links across all partitions, in first-seen order
    pub fn links(&self) -> Vec<String> {
        let mut links: Vec<String> = Vec::new();
        for slot in &self.slots {
            if !links.contains(&slot.link) {
                links.push(slot.link.clone());
            }
        }
        links
    }

    pub fn to_docs(&self) -> Vec<LinkTrackerDoc> {
        self.slots
            .iter()
            .map(|slot| LinkTrackerDoc::new(slot.link.clone(), slot.count, slot.partition))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn remove_key(&mut self, key: &(String, Partition)) {
        let Some(i) = self.index.remove(key) else {
            return;
        };
        self.slots.swap_remove(i);
        if let Some(moved) = self.slots.get(i) {
            self.index.insert((moved.link.clone(), moved.partition), i);
        }
    }
}
