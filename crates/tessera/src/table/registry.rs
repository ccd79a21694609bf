//! Dense-id arenas for registered descriptors.

use crate::log::MonologExp2;
use std::marker::PhantomData;

/// Base shift for registry backing logs: bucket 0 holds 16 entries.
const REGISTRY_BASE_SHIFT: u32 = 4;

/// An append-only arena of owned descriptors addressed by dense id.
///
/// Ids equal insertion order, starting at zero, and are the public
/// handles for filters, triggers, and indexes. Entries live until the
/// registry is dropped; readers acquire-load the committed length once
/// and then access entries without further synchronization.
pub struct Registry<T> {
    log: MonologExp2<REGISTRY_BASE_SHIFT>,
    _owned: PhantomData<T>,
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("len", &self.len()).finish()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            log: MonologExp2::new(),
            _owned: PhantomData,
        }
    }

    /// Registers `value`, returning its dense id.
    pub fn push(&self, value: Box<T>) -> usize {
        let raw = Box::into_raw(value) as usize as u64;
        self.log.push(raw) as usize
    }

    /// Number of committed registrations (acquire).
    pub fn len(&self) -> usize {
        self.log.size() as usize
    }

    /// Whether nothing is registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The descriptor registered under `id`, if committed.
    pub fn get(&self, id: usize) -> Option<&T> {
        if id < self.len() {
            let raw = self.log.get(id as u64) as usize as *const T;
            // Safety: the pointer was produced by Box::into_raw and stays
            // alive until drop.
            Some(unsafe { &*raw })
        } else {
            None
        }
    }
}

impl<T> Drop for Registry<T> {
    fn drop(&mut self) {
        for id in 0..self.log.size() {
            let raw = self.log.get(id) as usize as *mut T;
            // Safety: each committed entry owns exactly one Box.
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}
