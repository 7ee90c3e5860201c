//! Per-connection resource tables.
//!
//! Nothing a client sends is trusted as a native handle. Device pointers
//! are checked against the allocations this connection made; streams,
//! events, modules and functions are opaque tagged values mapped to native
//! handles here.
//!
//! ```text
//! handle = tag << 56 | counter        'S' streams  'E' events
//!                                     'M' modules  'F' functions
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::protocol::{AllocKind, HipError, HipResult};

pub const STREAM_TAG: u8 = b'S';
pub const EVENT_TAG: u8 = b'E';
pub const MODULE_TAG: u8 = b'M';
pub const FUNCTION_TAG: u8 = b'F';

/// One live device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub size: u64,
    pub kind: AllocKind,
}

/// Device allocations owned by one connection, keyed by base address.
#[derive(Debug, Default)]
pub struct ResourceTable {
    allocations: BTreeMap<u64, Allocation>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ptr: u64, size: u64, kind: AllocKind) {
        self.allocations.insert(ptr, Allocation { size, kind });
    }

    /// Remove by exact base address.
    pub fn remove(&mut self, ptr: u64) -> HipResult<Allocation> {
        self.allocations
            .remove(&ptr)
            .ok_or(HipError::InvalidDevicePointer)
    }

    /// Check that `len` bytes at `ptr` lie inside one live allocation.
    ///
    /// Interior pointers are fine. A pointer outside every allocation is
    /// `InvalidDevicePointer`; a range running past its allocation is
    /// `InvalidValue`.
    pub fn check(&self, ptr: u64, len: u64) -> HipResult<()> {
        let (base, alloc) = self
            .allocations
            .range(..=ptr)
            .next_back()
            .ok_or(HipError::InvalidDevicePointer)?;
        let offset = ptr - base;
        if offset >= alloc.size {
            return Err(HipError::InvalidDevicePointer);
        }
        match offset.checked_add(len) {
            Some(end) if end <= alloc.size => Ok(()),
            _ => Err(HipError::InvalidValue),
        }
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Take every base address, leaving the table empty.
    pub fn drain(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.allocations).into_keys().collect()
    }
}

/// Tagged client handles mapped to values of `T`.
#[derive(Debug)]
pub struct HandleTable<T> {
    tag: u8,
    next: u64,
    entries: HashMap<u64, T>,
}

impl<T> HandleTable<T> {
    pub fn new(tag: u8) -> Self {
        Self {
            tag,
            next: 1,
            entries: HashMap::new(),
        }
    }

    /// Store `value` under a fresh handle. Handles are never reused.
    pub fn insert(&mut self, value: T) -> u64 {
        let handle = (u64::from(self.tag) << 56) | self.next;
        self.next += 1;
        self.entries.insert(handle, value);
        handle
    }

    pub fn get(&self, handle: u64) -> HipResult<&T> {
        self.entries.get(&handle).ok_or(HipError::InvalidHandle)
    }

    pub fn remove(&mut self, handle: u64) -> HipResult<T> {
        self.entries.remove(&handle).ok_or(HipError::InvalidHandle)
    }

    /// Keep only entries matching `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.entries.retain(|_, value| keep(value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every value, leaving the table empty.
    pub fn drain(&mut self) -> Vec<T> {
        self.entries.drain().map(|(_, value)| value).collect()
    }
}
