//! Registry of live guarded blocks.
//!
//! A slab of slots threaded into a doubly linked list (allocation order) plus
//! an address index. Insertion appends at the tail in O(1); removal unlinks a
//! slot in O(1) once the index has located it. Freed slots are recycled.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::panic::Location;
use std::ptr::NonNull;

/// Bookkeeping for one live block.
#[derive(Debug)]
pub struct BlockRecord {
    /// User-visible address (the key).
    pub addr: usize,
    /// Requested size in bytes.
    pub size: usize,
    /// Epoch the block was allocated in.
    pub epoch: u64,
    /// Heap-wide allocation serial number.
    pub serial: u64,
    /// Call site that allocated (or last grew) the block.
    pub origin: &'static Location<'static>,
    /// Stack captured at allocation time when backtrace tracking is on.
    pub backtrace: Option<Backtrace>,
    /// Start of the provider region (the header).
    pub(crate) base: NonNull<u8>,
}

#[derive(Debug)]
struct Slot {
    record: Option<BlockRecord>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked, address-indexed set of live blocks.
#[derive(Debug, Default)]
pub struct BlockRegistry {
    slots: Vec<Slot>,
    free_slots: Vec<usize>,
    index: HashMap<usize, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl BlockRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a block at the tail. A record already registered under the
    /// same address is replaced and returned.
    pub fn insert(&mut self, record: BlockRecord) -> Option<BlockRecord> {
        let stale = self.remove(record.addr);
        let addr = record.addr;
        let slot = Slot {
            record: Some(record),
            prev: self.tail,
            next: None,
        };
        let idx = if let Some(free_idx) = self.free_slots.pop() {
            self.slots[free_idx] = slot;
            free_idx
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        };
        match self.tail {
            Some(tail) => self.slots[tail].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.index.insert(addr, idx);
        self.len += 1;
        stale
    }

    /// Look up a live block by user address.
    #[must_use]
    pub fn get(&self, addr: usize) -> Option<&BlockRecord> {
        let idx = *self.index.get(&addr)?;
        self.slots[idx].record.as_ref()
    }

    /// Mutable lookup by user address.
    pub fn get_mut(&mut self, addr: usize) -> Option<&mut BlockRecord> {
        let idx = *self.index.get(&addr)?;
        self.slots[idx].record.as_mut()
    }

    /// Unlink and return the block registered at `addr`.
    pub fn remove(&mut self, addr: usize) -> Option<BlockRecord> {
        let idx = self.index.remove(&addr)?;
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        let slot = &mut self.slots[idx];
        slot.prev = None;
        slot.next = None;
        let record = slot.record.take();
        self.free_slots.push(idx);
        self.len -= 1;
        record
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            registry: self,
            cursor: self.head,
        }
    }

    /// Remove every block born in `epoch`, oldest first.
    pub fn drain_epoch(&mut self, epoch: u64) -> Vec<BlockRecord> {
        let doomed: Vec<usize> = self
            .iter()
            .filter(|record| record.epoch == epoch)
            .map(|record| record.addr)
            .collect();
        doomed
            .into_iter()
            .filter_map(|addr| self.remove(addr))
            .collect()
    }

    /// Remove every block, oldest first.
    pub fn drain_all(&mut self) -> Vec<BlockRecord> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(head) = self.head {
            let Some(addr) = self.slots[head].record.as_ref().map(|r| r.addr) else {
                break;
            };
            if let Some(record) = self.remove(addr) {
                out.push(record);
            }
        }
        out
    }
}

/// Oldest-to-newest iterator over a [`BlockRegistry`].
pub struct Iter<'a> {
    registry: &'a BlockRegistry,
    cursor: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a BlockRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let slot = &self.registry.slots[idx];
        self.cursor = slot.next;
        slot.record.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(addr: usize, epoch: u64) -> BlockRecord {
        BlockRecord {
            addr,
            size: addr / 16,
            epoch,
            serial: addr as u64,
            origin: Location::caller(),
            backtrace: None,
            base: NonNull::dangling(),
        }
    }

    fn addrs(registry: &BlockRegistry) -> Vec<usize> {
        registry.iter().map(|r| r.addr).collect()
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut registry = BlockRegistry::new();
        for addr in [0x100, 0x200, 0x300] {
            assert!(registry.insert(record(addr, 1)).is_none());
        }
        assert_eq!(registry.len(), 3);
        assert_eq!(addrs(&registry), vec![0x100, 0x200, 0x300]);
    }

    #[test]
    fn removal_unlinks_head_middle_and_tail() {
        let mut registry = BlockRegistry::new();
        for addr in [0x10, 0x20, 0x30, 0x40] {
            registry.insert(record(addr, 1));
        }
        assert_eq!(registry.remove(0x20).map(|r| r.addr), Some(0x20));
        assert_eq!(addrs(&registry), vec![0x10, 0x30, 0x40]);
        registry.remove(0x10);
        assert_eq!(addrs(&registry), vec![0x30, 0x40]);
        registry.remove(0x40);
        assert_eq!(addrs(&registry), vec![0x30]);
        registry.remove(0x30);
        assert!(registry.is_empty());
        assert_eq!(registry.iter().count(), 0);
        assert!(registry.remove(0x30).is_none());
    }

    #[test]
    fn freed_slots_are_recycled_at_the_tail() {
        let mut registry = BlockRegistry::new();
        registry.insert(record(0x10, 1));
        registry.insert(record(0x20, 1));
        registry.remove(0x10);
        registry.insert(record(0x30, 1));
        assert_eq!(registry.slots.len(), 2, "slot of 0x10 should be reused");
        assert_eq!(addrs(&registry), vec![0x20, 0x30]);
    }

    #[test]
    fn drain_epoch_leaves_other_epochs_linked() {
        let mut registry = BlockRegistry::new();
        registry.insert(record(0x10, 1));
        registry.insert(record(0x20, 2));
        registry.insert(record(0x30, 1));
        registry.insert(record(0x40, 2));

        let drained: Vec<usize> = registry.drain_epoch(2).iter().map(|r| r.addr).collect();
        assert_eq!(drained, vec![0x20, 0x40]);
        assert_eq!(addrs(&registry), vec![0x10, 0x30]);
        assert!(registry.get(0x20).is_none());
        assert!(registry.get(0x30).is_some());
    }

    #[test]
    fn drain_all_empties_in_order() {
        let mut registry = BlockRegistry::new();
        for addr in [0x30, 0x10, 0x20] {
            registry.insert(record(addr, 1));
        }
        let drained: Vec<usize> = registry.drain_all().iter().map(|r| r.addr).collect();
        assert_eq!(drained, vec![0x30, 0x10, 0x20]);
        assert!(registry.is_empty());
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut registry = BlockRegistry::new();
        registry.insert(record(0x10, 1));
        registry.get_mut(0x10).expect("registered").size = 99;
        assert_eq!(registry.get(0x10).map(|r| r.size), Some(99));
    }
}
