use rustc_hash::FxHashMap;
use tracing::trace;

use crate::block::BlockStore;
use crate::types::{DataLocation, DocumentPart, Result};

/// Memoizes block copies between two stores for one document part.
///
/// Source slots sharing a block keep sharing a single copy in the destination.
pub struct DataLocationMap {
    part: DocumentPart,
    copies: FxHashMap<DataLocation, DataLocation>,
}

impl DataLocationMap {
    /// Creates an empty map for `part`.
    pub fn new(part: DocumentPart) -> Self {
        Self {
            part,
            copies: FxHashMap::default(),
        }
    }

    /// Part this map copies.
    pub fn part(&self) -> DocumentPart {
        self.part
    }

    /// Number of distinct blocks copied so far.
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    /// Returns `true` if nothing has been copied.
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Returns the destination copy of `source_loc`, copying it on first use.
    /// Empty locations map to themselves without touching either store.
    pub fn get_or_create(
        &mut self,
        dest: &dyn BlockStore,
        source: &dyn BlockStore,
        source_loc: DataLocation,
    ) -> Result<DataLocation> {
        if source_loc.is_empty() {
            return Ok(DataLocation::empty());
        }
        if let Some(existing) = self.copies.get(&source_loc) {
            return Ok(*existing);
        }
        let copied = dest.copy_cache(source, self.part, source_loc)?;
        trace!(part = %self.part, from = %source_loc, to = %copied, "slot.location_map.copy");
        self.copies.insert(source_loc, copied);
        Ok(copied)
    }
}
