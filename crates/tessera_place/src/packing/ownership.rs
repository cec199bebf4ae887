//! Per-unit claims on packing sites.

use crate::ids::UnitId;
use std::sync::atomic::{AtomicU32, Ordering};

/// Which packing site owns each unit.
///
/// Sites read the table concurrently during the update step; claims are
/// made with compare-and-swap so a unit can never be owned twice.
#[derive(Debug)]
pub struct OwnershipTable {
    owners: Vec<AtomicU32>,
}

impl OwnershipTable {
    const NONE: u32 = u32::MAX;

    /// Creates a table with every unit unowned.
    pub fn new(units: usize) -> Self {
        Self {
            owners: (0..units).map(|_| AtomicU32::new(Self::NONE)).collect(),
        }
    }

    /// The site index owning `unit`.
    pub fn owner(&self, unit: UnitId) -> Option<usize> {
        let raw = self.owners.get(unit.index())?.load(Ordering::Acquire);
        (raw != Self::NONE).then_some(raw as usize)
    }

    /// Returns `true` if `unit` is unowned or owned by `site`.
    pub fn is_available(&self, unit: UnitId, site: usize) -> bool {
        self.owner(unit).map_or(true, |s| s == site)
    }

    /// Claims `unit` for `site`. Fails if another site owns it.
    pub fn claim(&self, unit: UnitId, site: usize) -> bool {
        let Some(slot) = self.owners.get(unit.index()) else {
            return false;
        };
        match slot.compare_exchange(Self::NONE, site as u32, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => true,
            Err(current) => current == site as u32,
        }
    }

    /// Releases `unit` if `site` owns it.
    pub fn release(&self, unit: UnitId, site: usize) {
        if let Some(slot) = self.owners.get(unit.index()) {
            let _ = slot.compare_exchange(site as u32, Self::NONE, Ordering::AcqRel, Ordering::Acquire);
        }
    }
}
