//! The process-wide host-context registry.
//!
//! Bytecode engines whose imported functions carry only a numeric context
//! id resolve it through this registry to identify the dispatch they are
//! re-entering. Entries are allocated from a slab (vector arena plus free
//! list); generation counters make stale ids resolve to nothing instead of
//! to a recycled slot. Registration is scoped: [`register`] returns a
//! guard that releases the slot when dropped, which covers every exit path
//! of the dispatch code.

use alder_core::Address;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// What a registered dispatch exposes to engine trampolines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostContextEntry {
    /// Hash of the transaction that started the dispatch.
    pub original_tx_hash: Vec<u8>,
    /// The contract the dispatch is executing.
    pub sc_address: Address,
}

/// An id handed to the engine; resolves through [`lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostContextId {
    index: usize,
    generation: u64,
}

impl HostContextId {
    /// Packs the id into a single integer for transport through an engine
    /// that only carries scalars.
    pub fn as_u64(&self) -> u64 {
        ((self.generation & 0xffff_ffff) << 32) | (self.index as u64 & 0xffff_ffff)
    }
}

struct Slot {
    generation: u64,
    entry: Option<HostContextEntry>,
}

#[derive(Default)]
struct Registry {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl Registry {
    fn register(&mut self, entry: HostContextEntry) -> HostContextId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.entry = Some(entry);
                HostContextId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                HostContextId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    fn remove(&mut self, id: HostContextId) {
        if let Some(slot) = self.slots.get_mut(id.index) {
            if slot.generation == id.generation && slot.entry.is_some() {
                slot.entry = None;
                self.free.push(id.index);
            }
        }
    }

    fn lookup(&self, id: HostContextId) -> Option<HostContextEntry> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.clone())
    }

    fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));

/// Registers a dispatch and returns the releasing guard.
pub fn register(entry: HostContextEntry) -> HostContextGuard {
    let id = REGISTRY.lock().register(entry);
    HostContextGuard { id }
}

/// Resolves an id to its entry, if still registered.
pub fn lookup(id: HostContextId) -> Option<HostContextEntry> {
    REGISTRY.lock().lookup(id)
}

/// Number of currently registered dispatches.
pub fn active_count() -> usize {
    REGISTRY.lock().active_count()
}

/// Holds a registry slot for the duration of a dispatch scope.
#[derive(Debug)]
pub struct HostContextGuard {
    id: HostContextId,
}

impl HostContextGuard {
    /// The id the engine should be handed.
    pub fn id(&self) -> HostContextId {
        self.id
    }
}

impl Drop for HostContextGuard {
    fn drop(&mut self) {
        REGISTRY.lock().remove(self.id);
    }
}

impl HostContextEntry {
    /// Convenience constructor used by the dispatcher.
    pub fn new(original_tx_hash: &[u8], sc_address: &Address) -> Self {
        Self {
            original_tx_hash: original_tx_hash.to_vec(),
            sc_address: sc_address.clone(),
        }
    }
}
