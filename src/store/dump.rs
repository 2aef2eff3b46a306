use std::fmt::{self, Write as _};

use serde::Serialize;

use super::{store_flags, DocumentSlotStore};
use crate::slot::legal_flags_violation;
use crate::types::Timestamp;

/// A broken invariant reported by [`DocumentSlotStore::verify_consistency`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SlotFinding {
    /// Timestamp of the offending slot, if the finding concerns one.
    pub timestamp: Option<u64>,
    /// What is wrong.
    pub message: String,
}

impl SlotFinding {
    fn at(timestamp: Timestamp, message: impl Into<String>) -> Self {
        Self {
            timestamp: Some(timestamp.0),
            message: message.into(),
        }
    }
}

impl fmt::Display for SlotFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "slot {ts}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl DocumentSlotStore {
    /// Checks the slot invariants without halting and without I/O.
    ///
    /// Containment is only checked on the global id, so slots of documents
    /// that rewrite their global id may be reported here while still
    /// passing [`DocumentSlotStore::assert_contained_in_bucket`].
    pub fn verify_consistency(&self) -> Vec<SlotFinding> {
        let mut findings = Vec::new();
        for pair in self.slots.windows(2) {
            if pair[0].timestamp() >= pair[1].timestamp() {
                findings.push(SlotFinding::at(
                    pair[1].timestamp(),
                    format!("not after previous slot at {}", pair[0].timestamp()),
                ));
            }
        }
        for slot in &self.slots {
            let ts = slot.timestamp();
            if let Some(reason) = legal_flags_violation(slot) {
                findings.push(SlotFinding::at(ts, reason));
            }
            if !slot.header_location().is_valid() || !slot.body_location().is_valid() {
                findings.push(SlotFinding::at(ts, "invalid data location"));
            }
            if slot.header_location().is_empty() {
                findings.push(SlotFinding::at(ts, "empty header location"));
            }
            if !self.bucket.contains_key(slot.global_id().bucket_key()) {
                findings.push(SlotFinding::at(
                    ts,
                    format!("global id {} outside {}", slot.global_id(), self.bucket),
                ));
            }
        }
        findings
    }

    /// Human-readable listing of the store.
    pub fn dump(&self, verbose: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} slots={} generation={} flags=0x{:02x}",
            self.bucket,
            self.slots.len(),
            self.generation,
            self.flags
        );
        let _ = writeln!(
            out,
            "  file_exists={} altered={} header_cached={} body_cached={}",
            self.has_flags(store_flags::FILE_EXISTS),
            self.has_flags(store_flags::SLOTS_ALTERED),
            self.has_flags(store_flags::HEADER_BLOCK_CACHED),
            self.has_flags(store_flags::BODY_BLOCK_CACHED)
        );
        if !self.has_flags(store_flags::BUCKET_INFO_OUTDATED) {
            let s = &self.summary;
            let _ = writeln!(
                out,
                "  checksum=0x{:08x} unique={} unique_size={} used_size={}",
                s.checksum, s.unique_count, s.unique_size, s.used_size
            );
        }
        if verbose {
            for slot in &self.slots {
                let _ = writeln!(out, "  {slot}");
            }
        }
        out
    }
}
