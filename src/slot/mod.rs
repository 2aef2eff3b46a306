#![forbid(unsafe_code)]

//! Slot entries: one record per stored document version.

use std::fmt;

use crate::types::checksum::slot_checksum;
use crate::types::{DataLocation, DocumentPart, GlobalId, Timestamp};

mod location_map;

pub use location_map::DataLocationMap;

/// Slot status bits.
pub mod flags {
    /// Slot holds a live entry.
    pub const IN_USE: u16 = 0x0001;
    /// Slot is a remove entry (tombstone).
    pub const DELETED: u16 = 0x0002;
    /// Remove that can not be reverted; implies [`DELETED`].
    pub const DELETED_IN_PLACE: u16 = 0x0004;
    /// Flags written to persistent slot metadata.
    pub const PERSISTED: u16 = IN_USE | DELETED | DELETED_IN_PLACE;
    /// Stored checksum no longer matches the slot fields.
    pub const CHECKSUM_OUTDATED: u16 = 0x0100;
    /// Slot metadata changed since it was last persisted.
    pub const ALTERED_IN_MEMORY: u16 = 0x0200;
    /// Every flag a slot may carry.
    pub const LEGAL: u16 = PERSISTED | CHECKSUM_OUTDATED | ALTERED_IN_MEMORY;
}

/// Cache-related slot state that may change while the slot's identity does not.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct SlotState {
    /// Bits from [`flags`].
    pub flags: u16,
    /// Checksum over the persisted fields.
    pub checksum: u16,
}

/// One document version held by a store.
///
/// Timestamp, global id and locations form the identity of the entry; flags
/// and checksum live in [`SlotState`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SlotEntry {
    timestamp: Timestamp,
    gid: GlobalId,
    header: DataLocation,
    body: DataLocation,
    state: SlotState,
}

impl SlotEntry {
    /// Creates a slot.
    pub fn new(
        timestamp: Timestamp,
        gid: GlobalId,
        header: DataLocation,
        body: DataLocation,
        flags: u16,
        checksum: u16,
    ) -> Self {
        Self {
            timestamp,
            gid,
            header,
            body,
            state: SlotState { flags, checksum },
        }
    }

    /// Write time.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Global id of the document.
    pub fn global_id(&self) -> GlobalId {
        self.gid
    }

    /// Location of the given part.
    pub fn location(&self, part: DocumentPart) -> DataLocation {
        match part {
            DocumentPart::Header => self.header,
            DocumentPart::Body => self.body,
        }
    }

    /// Header location.
    pub fn header_location(&self) -> DataLocation {
        self.header
    }

    /// Body location; empty for tombstones.
    pub fn body_location(&self) -> DataLocation {
        self.body
    }

    /// Replaces the location of one part.
    pub fn set_location(&mut self, part: DocumentPart, loc: DataLocation) {
        match part {
            DocumentPart::Header => self.header = loc,
            DocumentPart::Body => self.body = loc,
        }
    }

    /// Mutable cache state.
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Raw flags.
    pub fn flags(&self) -> u16 {
        self.state.flags
    }

    /// Stored checksum.
    pub fn checksum(&self) -> u16 {
        self.state.checksum
    }

    /// Returns `true` if every bit in `mask` is set.
    pub fn has_flags(&self, mask: u16) -> bool {
        self.state.flags & mask == mask
    }

    /// Sets the bits in `mask`.
    pub fn set_flags(&mut self, mask: u16) {
        self.state.flags |= mask;
    }

    /// Clears the bits in `mask`.
    pub fn clear_flags(&mut self, mask: u16) {
        self.state.flags &= !mask;
    }

    /// Replaces the checksum.
    pub fn set_checksum(&mut self, checksum: u16) {
        self.state.checksum = checksum;
    }

    /// Slot is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.has_flags(flags::DELETED)
    }

    /// Slot is an unrevertable tombstone.
    pub fn is_deleted_in_place(&self) -> bool {
        self.has_flags(flags::DELETED_IN_PLACE)
    }

    /// Slot has a body block.
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Checksum the slot should carry given its current fields.
    pub fn calculate_checksum(&self) -> u16 {
        slot_checksum(
            self.timestamp,
            &self.gid,
            self.header,
            self.body,
            self.state.flags & flags::PERSISTED,
        )
    }

    /// Recomputes the checksum if it is marked outdated.
    pub fn refresh_checksum(&mut self) -> bool {
        if !self.has_flags(flags::CHECKSUM_OUTDATED) {
            return false;
        }
        self.state.checksum = self.calculate_checksum();
        self.clear_flags(flags::CHECKSUM_OUTDATED);
        true
    }
}

impl fmt::Display for SlotEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Slot({}, {}, header {}, body {}, flags 0x{:04x}, checksum 0x{:04x})",
            self.timestamp, self.gid, self.header, self.body, self.state.flags, self.state.checksum
        )?;
        if self.is_deleted_in_place() {
            f.write_str(" [deleted in place]")
        } else if self.is_deleted() {
            f.write_str(" [deleted]")
        } else {
            Ok(())
        }
    }
}

/// Returns a description of the first flag rule `slot` breaks, if any.
pub fn legal_flags_violation(slot: &SlotEntry) -> Option<&'static str> {
    if slot.flags() & !flags::LEGAL != 0 {
        return Some("slot carries unknown flag bits");
    }
    if !slot.has_flags(flags::IN_USE) {
        return Some("slot is not marked in use");
    }
    if slot.is_deleted_in_place() && !slot.is_deleted() {
        return Some("deleted-in-place slot is not marked deleted");
    }
    if slot.is_deleted() && slot.has_body() {
        return Some("tombstone references a body block");
    }
    None
}
