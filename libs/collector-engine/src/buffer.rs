use std::collections::HashMap;
use std::collections::hash_map::Entry;

use collector_api::Entity;

/// Pending entity state keyed by id, folded since the last hand-off.
///
/// Owned by a single accumulator task; never shared.
#[derive(Debug)]
pub struct MergeBuffer<R> {
    entries: HashMap<String, R>,
}

impl<R> Default for MergeBuffer<R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<R: Entity> MergeBuffer<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record`, or merge it into the entry already buffered under
    /// its id. Returns `true` on merge.
    pub fn absorb(&mut self, record: R) -> bool {
        match self.entries.entry(record.id()) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().merge(record);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&R> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Swap out every entry, leaving an empty buffer behind.
    pub fn take(&mut self) -> HashMap<String, R> {
        std::mem::take(&mut self.entries)
    }
}
