//! Mutable per-site occupancy.

use crate::ids::UnitId;
use crate::model::ClbSlots;
use crate::packing::SlotAssignment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_device::SiteId;

/// Which units sit on each site and, after packing, in which slots.
///
/// The device itself is immutable; this table is the only place site usage
/// is recorded. Exclusive sites hold one unit; CLB sites hold several and
/// track the slots they consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteOccupancy {
    units: Vec<Vec<UnitId>>,
    slots_used: Vec<ClbSlots>,
    exclusive: Vec<bool>,
    assignments: BTreeMap<SiteId, SlotAssignment>,
}

impl SiteOccupancy {
    /// Creates an empty table for `site_count` sites.
    pub fn new(site_count: usize) -> Self {
        Self {
            units: vec![Vec::new(); site_count],
            slots_used: vec![ClbSlots::default(); site_count],
            exclusive: vec![false; site_count],
            assignments: BTreeMap::new(),
        }
    }

    /// Unbinds every site for which `keep` returns `false`.
    pub fn reset_where(&mut self, keep: impl Fn(SiteId) -> bool) {
        for i in 0..self.units.len() {
            let site = SiteId::from_raw(i as u32);
            if !keep(site) {
                self.units[i].clear();
                self.slots_used[i] = ClbSlots::default();
                self.exclusive[i] = false;
                self.assignments.remove(&site);
            }
        }
    }

    /// Unbinds every site.
    pub fn reset(&mut self) {
        self.reset_where(|_| false);
    }

    /// Binds `unit` to `site`, consuming `slots`.
    pub fn bind(&mut self, site: SiteId, unit: UnitId, slots: ClbSlots, exclusive: bool) {
        let i = site.index();
        if i >= self.units.len() {
            return;
        }
        if !self.units[i].contains(&unit) {
            self.units[i].push(unit);
            self.slots_used[i] = self.slots_used[i].plus(slots);
        }
        self.exclusive[i] |= exclusive;
    }

    /// Removes `unit` from `site`, returning its slots.
    pub fn unbind(&mut self, site: SiteId, unit: UnitId, slots: ClbSlots) {
        let i = site.index();
        if let Some(list) = self.units.get_mut(i) {
            if let Some(pos) = list.iter().position(|&u| u == unit) {
                list.remove(pos);
                self.slots_used[i] = self.slots_used[i].minus(slots);
                if list.is_empty() {
                    self.exclusive[i] = false;
                    self.assignments.remove(&site);
                }
            }
        }
    }

    /// Units bound to `site`.
    pub fn units_at(&self, site: SiteId) -> &[UnitId] {
        self.units.get(site.index()).map_or(&[], Vec::as_slice)
    }

    /// Slots consumed on `site`.
    pub fn slots_used(&self, site: SiteId) -> ClbSlots {
        self.slots_used.get(site.index()).copied().unwrap_or_default()
    }

    /// Returns `true` if nothing is bound to `site`.
    pub fn is_free(&self, site: SiteId) -> bool {
        self.units_at(site).is_empty()
    }

    /// Returns `true` if an exclusive unit holds `site`.
    pub fn is_exclusive(&self, site: SiteId) -> bool {
        self.exclusive.get(site.index()).copied().unwrap_or(false)
    }

    /// Sites with at least one unit, in ID order.
    pub fn occupied_sites(&self) -> impl Iterator<Item = SiteId> + '_ {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, u)| !u.is_empty())
            .map(|(i, _)| SiteId::from_raw(i as u32))
    }

    /// Records the slot mapping chosen by the packer.
    pub fn set_slots(&mut self, site: SiteId, slots: SlotAssignment) {
        self.assignments.insert(site, slots);
    }

    /// The slot mapping of `site`, if packed.
    pub fn slots(&self, site: SiteId) -> Option<&SlotAssignment> {
        self.assignments.get(&site)
    }

    /// All slot mappings in site order.
    pub fn slot_assignments(&self) -> &BTreeMap<SiteId, SlotAssignment> {
        &self.assignments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(i: u32) -> SiteId {
        SiteId::from_raw(i)
    }

    fn u(i: u32) -> UnitId {
        UnitId::from_raw(i)
    }

    const LUT: ClbSlots = ClbSlots::new(1, 0);
    const FF: ClbSlots = ClbSlots::new(0, 1);

    #[test]
    fn bind_counts_slots_once() {
        let mut occ = SiteOccupancy::new(4);
        occ.bind(s(1), u(0), ClbSlots::new(2, 2), false);
        occ.bind(s(1), u(0), ClbSlots::new(2, 2), false);
        occ.bind(s(1), u(3), FF, false);
        assert_eq!(occ.units_at(s(1)), &[u(0), u(3)]);
        assert_eq!(occ.slots_used(s(1)), ClbSlots::new(2, 3));
        assert!(!occ.is_exclusive(s(1)));
        assert!(occ.is_free(s(0)));
    }

    #[test]
    fn lut_and_ff_sides_fill_separately() {
        let mut occ = SiteOccupancy::new(1);
        for i in 0..8 {
            occ.bind(s(0), u(i), LUT, false);
            occ.bind(s(0), u(8 + i), FF, false);
        }
        assert_eq!(occ.slots_used(s(0)), ClbSlots::new(8, 8));
        occ.unbind(s(0), u(8), FF);
        assert_eq!(occ.slots_used(s(0)), ClbSlots::new(8, 7));
    }

    #[test]
    fn unbind_releases_site() {
        let mut occ = SiteOccupancy::new(2);
        occ.bind(s(0), u(5), LUT, true);
        occ.set_slots(s(0), SlotAssignment::default());
        assert!(occ.is_exclusive(s(0)));
        occ.unbind(s(0), u(5), LUT);
        assert!(occ.is_free(s(0)));
        assert!(!occ.is_exclusive(s(0)));
        assert!(occ.slots(s(0)).is_none());
    }

    #[test]
    fn reset_where_keeps_selected() {
        let mut occ = SiteOccupancy::new(3);
        occ.bind(s(0), u(0), LUT, true);
        occ.bind(s(2), u(1), FF, false);
        occ.reset_where(|site| site == s(0));
        assert_eq!(occ.occupied_sites().collect::<Vec<_>>(), vec![s(0)]);
        occ.reset();
        assert_eq!(occ.occupied_sites().count(), 0);
    }

    #[test]
    fn out_of_range_is_ignored() {
        let mut occ = SiteOccupancy::new(1);
        occ.bind(s(9), u(0), LUT, false);
        assert!(occ.units_at(s(9)).is_empty());
        assert_eq!(occ.slots_used(s(9)), ClbSlots::default());
    }
}
