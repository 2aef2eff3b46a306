#![forbid(unsafe_code)]

//! Environment collaborator: clock, configuration, disk usage and the
//! document type repository shared by all stores on a node.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::document::DocumentTypeRepo;
use crate::types::Timestamp;

mod options;

pub use options::{CompactionCfg, StoreOptions};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time in microseconds.
    fn now(&self) -> Timestamp;
}

/// Wall clock, microseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or(0);
        Timestamp(u64::try_from(micros).unwrap_or(u64::MAX))
    }
}

/// Settable clock for tests and replay tools.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now.0),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now.0, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::Relaxed))
    }
}

/// Reports how full the volume backing the block stores is.
pub trait DiskMonitor: Send + Sync {
    /// Used fraction of the volume in `[0, 1]`.
    fn fill_ratio(&self) -> io::Result<f64>;
}

/// Disk monitor for volumes without usage reporting; never full.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnmonitoredDisk;

impl DiskMonitor for UnmonitoredDisk {
    fn fill_ratio(&self) -> io::Result<f64> {
        Ok(0.0)
    }
}

/// Disk monitor returning a settable ratio.
#[derive(Debug, Default)]
pub struct FixedDiskMonitor {
    bits: AtomicU64,
}

impl FixedDiskMonitor {
    /// Creates a monitor reporting `ratio`.
    pub fn new(ratio: f64) -> Self {
        Self {
            bits: AtomicU64::new(ratio.to_bits()),
        }
    }

    /// Changes the reported ratio.
    pub fn set(&self, ratio: f64) {
        self.bits.store(ratio.to_bits(), Ordering::Relaxed);
    }
}

impl DiskMonitor for FixedDiskMonitor {
    fn fill_ratio(&self) -> io::Result<f64> {
        Ok(f64::from_bits(self.bits.load(Ordering::Relaxed)))
    }
}

/// Services a slot store needs from its surroundings.
pub struct StoreEnv {
    clock: Arc<dyn Clock>,
    options: RwLock<StoreOptions>,
    repo: DocumentTypeRepo,
    disk: Arc<dyn DiskMonitor>,
}

impl StoreEnv {
    /// Creates an environment with a system clock and an unmonitored disk.
    pub fn new(options: StoreOptions, repo: DocumentTypeRepo) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            options: RwLock::new(options),
            repo,
            disk: Arc::new(UnmonitoredDisk),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the disk monitor.
    pub fn with_disk_monitor(mut self, disk: Arc<dyn DiskMonitor>) -> Self {
        self.disk = disk;
        self
    }

    /// Current time.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Read-locked view of the current options.
    pub fn options(&self) -> RwLockReadGuard<'_, StoreOptions> {
        self.options.read()
    }

    /// Applies `f` to the options under the write lock.
    pub fn update_options(&self, f: impl FnOnce(&mut StoreOptions)) {
        let mut guard = self.options.write();
        f(&mut guard);
    }

    /// Document type repository.
    pub fn type_repo(&self) -> &DocumentTypeRepo {
        &self.repo
    }

    /// Current fill ratio of the backing volume.
    pub fn disk_fill_ratio(&self) -> io::Result<f64> {
        self.disk.fill_ratio()
    }
}

impl std::fmt::Debug for StoreEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEnv")
            .field("options", &*self.options.read())
            .finish_non_exhaustive()
    }
}
