//! Concurrent packing of shared units into slice sites.
//!
//! Every candidate slice keeps a small priority queue of unit clusters it
//! could hold. All sites grow their queues in parallel against a shared
//! [`OwnershipTable`]; a sequential arbitration step then lets sites claim
//! their best cluster when no other site wants those units more. Units left
//! over once the queues stop improving are forced into the nearest site
//! with room, widening the search up to a rip-up radius.
//!
//! Packing never moves a unit. It only decides which site and which slots
//! hold each cell; the caller snaps positions afterwards.

pub mod cluster;
pub mod ownership;
pub mod site;
pub mod slots;

pub use cluster::{PackingCluster, ScoreModel};
pub use ownership::OwnershipTable;
pub use site::PackingSite;
pub use slots::{LutSlot, SlotAssignment, LUT_SITES, SHARED_LUT_INPUTS};

use crate::ids::UnitId;
use crate::legalize::{ClbLegalizer, SiteIndex};
use crate::model::{LegalFamily, PlacementInfo};
use crate::status::{FailureKind, PlacementFailure};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use site::{unit_members, PackContext, UnitGrid};
use slots::{map_cells, Member};
use std::collections::{BTreeMap, BTreeSet};
use tessera_config::PackingConfig;
use tessera_device::{Device, SiteId, SiteType};

const CLB_TYPES: [SiteType; 2] = [SiteType::SliceL, SiteType::SliceM];

/// Summary of one packing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackingReport {
    /// Update iterations run.
    pub iterations: u32,
    /// Sites holding at least one cell.
    pub sites_used: usize,
    /// Shared units placed into a site.
    pub packed_units: usize,
    /// Units that fit no site.
    pub failures: Vec<PlacementFailure>,
}

struct PackPlan {
    iterations: u32,
    sites: Vec<(SiteId, Vec<UnitId>, Option<SlotAssignment>)>,
    failures: Vec<PlacementFailure>,
}

/// Packs shared units into slice sites.
pub struct Packer<'a> {
    device: &'a Device,
    index: &'a SiteIndex,
    config: &'a PackingConfig,
}

impl<'a> Packer<'a> {
    /// Creates a packer over `device`.
    pub fn new(device: &'a Device, index: &'a SiteIndex, config: &'a PackingConfig) -> Self {
        Self { device, index, config }
    }

    /// Packs every movable shared unit and records the result in the
    /// occupancy table.
    ///
    /// Units already packed keep their site as a starting cluster, so a
    /// second run over a packed placement changes nothing. Units bound by
    /// the CLB legalizer but not yet packed do not seed clusters; their
    /// sites only join the candidate set, and the units are unbound and
    /// packed again from their coordinates.
    pub fn pack(&self, info: &mut PlacementInfo) -> PackingReport {
        let candidates: Vec<UnitId> = info
            .units()
            .iter()
            .filter(|u| u.family == LegalFamily::Shared && !u.fixed && u.site_types.iter().any(|t| t.is_clb()))
            .map(|u| u.id)
            .collect();
        let plan = self.plan(info, &candidates);

        for &id in &candidates {
            let (site, demand) = {
                let unit = info.unit(id);
                (unit.site, unit.clb_slot_demand())
            };
            if let Some(site) = site {
                info.occupancy_mut().unbind(site, id, demand);
            }
            let unit = info.unit_mut(id);
            unit.site = None;
            unit.packed = false;
        }

        let mut report = PackingReport {
            iterations: plan.iterations,
            failures: plan.failures,
            ..PackingReport::default()
        };
        for (site, units, slots) in plan.sites {
            for &id in &units {
                let demand = info.unit(id).clb_slot_demand();
                info.occupancy_mut().bind(site, id, demand, false);
                let unit = info.unit_mut(id);
                unit.site = Some(site);
                unit.packed = true;
            }
            report.packed_units += units.len();
            match slots {
                Some(slots) => {
                    info.occupancy_mut().set_slots(site, slots);
                    report.sites_used += 1;
                }
                None => log::warn!("cells bound to site {site} do not map onto its slots"),
            }
        }
        log::debug!(
            "packed {} units into {} sites in {} iterations, {} failures",
            report.packed_units,
            report.sites_used,
            report.iterations,
            report.failures.len()
        );
        report
    }

    fn plan(&self, info: &PlacementInfo, candidates: &[UnitId]) -> PackPlan {
        let cfg = self.config;
        let mut seeds: BTreeMap<SiteId, Vec<UnitId>> = BTreeMap::new();
        for &id in candidates {
            let unit = info.unit(id);
            if let (true, Some(site)) = (unit.packed, unit.site) {
                seeds.entry(site).or_default().push(id);
            }
        }

        let mut anchors: BTreeSet<SiteId> = info.occupancy().occupied_sites().filter(|&s| self.is_clb(s)).collect();
        anchors.extend(seeds.keys().copied());
        let mut chosen = anchors.clone();
        for &site in &anchors {
            if let Some(p) = self.index.position(site) {
                chosen.extend(self.index.within(&CLB_TYPES, p, cfg.max_radius).into_iter().map(|(s, _)| s));
            }
        }
        for &id in candidates {
            let unit = info.unit(id);
            if unit.site.is_none() {
                let types = ClbLegalizer::site_types(unit);
                chosen.extend(self.index.within(&types, unit.position, cfg.max_radius).into_iter().map(|(s, _)| s));
            }
        }

        let ctx = PackContext {
            info,
            config: cfg,
            model: ScoreModel::new(info, cfg),
            pool: UnitGrid::new(info.outline(), 1.0, candidates.iter().map(|&u| (u, info.unit(u).position))),
            members: (0..info.units().len())
                .map(|i| unit_members(info, UnitId::from_raw(i as u32)))
                .collect(),
        };

        let mut sites: Vec<PackingSite> = Vec::new();
        let mut slot_of: BTreeMap<SiteId, usize> = BTreeMap::new();
        for &site in &chosen {
            let seeded = seeds.get(&site).cloned().unwrap_or_default();
            if let Some(ps) = self.make_site(&ctx, site, seeded) {
                slot_of.insert(site, sites.len());
                sites.push(ps);
            }
        }
        let ownership = OwnershipTable::new(info.units().len());
        for (i, s) in sites.iter().enumerate() {
            for &u in s.determined().units() {
                ownership.claim(u, i);
            }
        }

        let mut iterations = 0;
        let mut stalled = 0;
        for it in 0..cfg.max_iterations {
            iterations = it + 1;
            sites
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, s)| s.update(i, &ctx, &ownership));
            if !sites.iter().any(PackingSite::improving) {
                break;
            }
            if arbitrate(&mut sites, &ownership, cfg.unchanged_threshold) {
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= cfg.unchanged_threshold.max(1) {
                    force_best(&mut sites, &ownership);
                    stalled = 0;
                }
            }
        }

        let mut failures = Vec::new();
        for &id in candidates {
            if ownership.owner(id).is_some() {
                continue;
            }
            if !self.rip_up(&ctx, &mut sites, &mut slot_of, &ownership, id) {
                let name = info.unit(id).name.clone();
                log::warn!("unit {name} fits no slice within {}", cfg.rip_up_radius);
                failures.push(PlacementFailure {
                    unit: id,
                    name,
                    kind: FailureKind::PackingConflict,
                });
            }
        }

        let planned = sites
            .par_iter()
            .filter(|s| !s.determined().is_empty() || !s.required().is_empty())
            .map(|s| {
                let mut members = s.required().to_vec();
                for u in s.determined().units() {
                    members.extend_from_slice(&ctx.members[u.index()]);
                }
                (
                    s.site(),
                    s.determined().units().to_vec(),
                    map_cells(&members, info, s.site_type()),
                )
            })
            .collect();

        PackPlan {
            iterations,
            sites: planned,
            failures,
        }
    }

    fn is_clb(&self, site: SiteId) -> bool {
        self.device.site(site).is_some_and(|s| s.site_type.is_clb())
    }

    fn make_site(&self, ctx: &PackContext<'_>, site: SiteId, seeded: Vec<UnitId>) -> Option<PackingSite> {
        let s = self.device.site(site)?;
        if !s.site_type.is_clb() {
            return None;
        }
        let required = self.required_members(ctx.info, site);
        Some(PackingSite::new(site, s.site_type, s.position, required, seeded, ctx))
    }

    /// Cells of exclusive or fixed units that already occupy `site`.
    ///
    /// A macro spanning several rows contributes only the cells whose
    /// vertical offset falls on this site's row.
    fn required_members(&self, info: &PlacementInfo, site: SiteId) -> Vec<Member> {
        let Some(here) = self.device.site(site) else {
            return Vec::new();
        };
        let pitch = self.device.column(here.column).map_or(1.0, |c| c.pitch);
        let mut out = Vec::new();
        for &id in info.occupancy().units_at(site) {
            let unit = info.unit(id);
            if unit.family != LegalFamily::Exclusive && !unit.fixed {
                continue;
            }
            let row = unit
                .site
                .and_then(|anchor| self.device.site(anchor))
                .map_or(0, |anchor| i64::from(here.row) - i64::from(anchor.row));
            let spans_rows = unit.span() > 1;
            for (member, cell) in unit_members(info, id).into_iter().zip(unit.cells()) {
                if !spans_rows || (cell.dy / pitch).round() as i64 == row {
                    out.push(member);
                }
            }
        }
        out
    }

    fn rip_up(
        &self,
        ctx: &PackContext<'_>,
        sites: &mut Vec<PackingSite>,
        slot_of: &mut BTreeMap<SiteId, usize>,
        ownership: &OwnershipTable,
        id: UnitId,
    ) -> bool {
        let cfg = self.config;
        let unit = ctx.info.unit(id);
        let types = ClbLegalizer::site_types(unit);
        let mut radius = cfg.initial_radius.max(1.0);
        loop {
            for (site, _) in self.index.within(&types, unit.position, radius) {
                let i = match slot_of.get(&site) {
                    Some(&i) => i,
                    None => {
                        let Some(ps) = self.make_site(ctx, site, Vec::new()) else {
                            continue;
                        };
                        sites.push(ps);
                        slot_of.insert(site, sites.len() - 1);
                        sites.len() - 1
                    }
                };
                if sites[i].absorb(i, ctx, ownership, id) {
                    return true;
                }
            }
            if radius >= cfg.rip_up_radius {
                return false;
            }
            radius = (radius * 2.0).min(cfg.rip_up_radius);
        }
    }
}

/// Lets every site whose top has been stable for `threshold` updates claim
/// it, provided each unit it adds gains the most there. Returns `true` if
/// any site claimed.
fn arbitrate(sites: &mut [PackingSite], ownership: &OwnershipTable, threshold: u32) -> bool {
    let eligible: Vec<usize> = (0..sites.len())
        .filter(|&i| sites[i].improving() && sites[i].unchanged() >= threshold)
        .collect();
    let mut best: BTreeMap<UnitId, (f64, usize)> = BTreeMap::new();
    for &i in &eligible {
        let gain = sites[i].gain().unwrap_or(0.0);
        for u in sites[i].new_units() {
            let entry = best.entry(u).or_insert((gain, i));
            if gain > entry.0 {
                *entry = (gain, i);
            }
        }
    }
    let mut claimed = false;
    for i in eligible {
        let fresh = sites[i].new_units();
        let preferred = fresh.iter().all(|u| best.get(u).is_some_and(|&(_, s)| s == i));
        if preferred && sites[i].commit_top(i, ownership) {
            claimed = true;
        }
    }
    claimed
}

/// Commits the single best improving site regardless of stability.
fn force_best(sites: &mut [PackingSite], ownership: &OwnershipTable) -> bool {
    let mut pick: Option<(f64, usize)> = None;
    for (i, s) in sites.iter().enumerate() {
        if !s.improving() || s.new_units().iter().any(|&u| ownership.owner(u).is_some()) {
            continue;
        }
        let gain = s.gain().unwrap_or(0.0);
        if pick.map_or(true, |(g, _)| gain > g) {
            pick = Some((gain, i));
        }
    }
    match pick {
        Some((_, i)) => sites[i].commit_top(i, ownership),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{CellKind, Design};
    use tessera_common::Point;
    use tessera_device::{CompatiblePlacementTable, DeviceBuilder};
    use tessera_diagnostics::DiagnosticSink;

    fn grid_device() -> Device {
        DeviceBuilder::new("t", 4.0).columns(SiteType::SliceL, 4, 1.0).build()
    }

    fn build(design: &Design, device: &Device) -> PlacementInfo {
        PlacementInfo::build(
            design,
            device,
            &CompatiblePlacementTable::ultrascale(),
            None,
            None,
            &DiagnosticSink::new(),
        )
        .unwrap()
    }

    fn connected_pair() -> Design {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 6 });
        let b = d.add("b", CellKind::Lut { inputs: 6 });
        let c = d.add("c", CellKind::Lut { inputs: 6 });
        d.set_initial_position(a, Point::new(0.0, 0.0));
        d.set_initial_position(b, Point::new(1.0, 0.0));
        d.set_initial_position(c, Point::new(3.0, 3.0));
        d.connect("ab", a, &[b]);
        d
    }

    fn pack(info: &mut PlacementInfo, device: &Device) -> PackingReport {
        let index = SiteIndex::new(device, SiteIndex::DEFAULT_BUCKET);
        let config = PackingConfig::default();
        Packer::new(device, &index, &config).pack(info)
    }

    #[test]
    fn connected_units_share_a_site() {
        let device = grid_device();
        let mut info = build(&connected_pair(), &device);
        let report = pack(&mut info, &device);
        assert!(report.failures.is_empty());
        assert_eq!(report.packed_units, 3);

        let a = info.unit(UnitId::from_raw(0));
        let b = info.unit(UnitId::from_raw(1));
        let c = info.unit(UnitId::from_raw(2));
        assert!(a.packed && b.packed && c.packed);
        assert_eq!(a.site, b.site);
        assert_ne!(a.site, c.site);

        let slots = info.occupancy().slots(a.site.unwrap()).unwrap();
        assert_eq!(slots.cells().len(), 2);
        // packing leaves coordinates alone
        assert_eq!(a.position, Point::new(0.0, 0.0));
    }

    #[test]
    fn packing_is_deterministic() {
        let device = grid_device();
        let mut first = build(&connected_pair(), &device);
        let mut second = first.clone();
        pack(&mut first, &device);
        pack(&mut second, &device);
        assert_eq!(first.occupancy().slot_assignments(), second.occupancy().slot_assignments());
    }

    #[test]
    fn packing_twice_changes_nothing() {
        let device = grid_device();
        let mut info = build(&connected_pair(), &device);
        pack(&mut info, &device);
        let sites: Vec<_> = info.units().iter().map(|u| u.site).collect();
        let slots = info.occupancy().slot_assignments().clone();

        let report = pack(&mut info, &device);
        assert!(report.failures.is_empty());
        assert_eq!(info.units().iter().map(|u| u.site).collect::<Vec<_>>(), sites);
        assert_eq!(info.occupancy().slot_assignments(), &slots);
    }

    #[test]
    fn legalized_bindings_are_repacked_from_positions() {
        let device = grid_device();
        let mut info = build(&connected_pair(), &device);
        let a = UnitId::from_raw(0);
        let stale = device.site_at(0, 3).unwrap();
        let demand = info.unit(a).clb_slot_demand();
        info.occupancy_mut().bind(stale, a, demand, false);
        info.unit_mut(a).site = Some(stale);

        let report = pack(&mut info, &device);
        assert!(report.failures.is_empty());
        let (ua, ub) = (info.unit(a), info.unit(UnitId::from_raw(1)));
        assert!(ua.packed);
        assert_eq!(ua.site, ub.site);
        assert_ne!(ua.site, Some(stale));
        assert!(info.occupancy().units_at(stale).is_empty());
    }

    #[test]
    fn overfull_device_reports_conflict() {
        let device = DeviceBuilder::new("t", 1.0).column(SiteType::SliceL, 1.0).build();
        let mut d = Design::new("top");
        for i in 0..9 {
            let c = d.add(format!("l{i}"), CellKind::Lut { inputs: 6 });
            d.set_initial_position(c, Point::new(0.0, 0.0));
        }
        let mut info = build(&d, &device);
        let report = pack(&mut info, &device);
        assert_eq!(report.packed_units, 8);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::PackingConflict);
        let failed = info.unit(report.failures[0].unit);
        assert!(!failed.packed && failed.site.is_none());
    }
}
