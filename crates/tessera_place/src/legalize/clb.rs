//! Legalization of units that share slice sites.
//!
//! Every slice offers a fixed number of LUT sites and flip-flop positions,
//! and every unit demands some of each. Sites enter the assignment problem
//! as replicated slot nodes, so a single solve can put several units on one
//! site; the greedy acceptance pass then enforces both budgets.
//!
//! In exact mode units are first given a column. Full columns hand their
//! outermost units to neighbouring columns in proportion to the room left
//! on each side, and matching then stays inside the assigned column.
//! Units the column pass cannot place fall back to unrestricted matching.

use super::dp::place_in_order;
use super::site_index::SiteIndex;
use super::{LegalAssignment, LegalizationResult, LegalizeMode};
use crate::ids::UnitId;
use crate::matching::{solve_components, AssignmentProblem};
use crate::model::{ClbSlots, PlacementInfo, PlacementUnit};
use std::collections::{BTreeMap, VecDeque};
use tessera_config::LegalizeConfig;
use tessera_device::{Device, SiteId, SiteType};

/// Legalizes shared units onto slice sites.
pub struct ClbLegalizer<'a> {
    device: &'a Device,
    index: &'a SiteIndex,
    config: &'a LegalizeConfig,
}

impl<'a> ClbLegalizer<'a> {
    /// Creates a legalizer over `device`.
    pub fn new(device: &'a Device, index: &'a SiteIndex, config: &'a LegalizeConfig) -> Self {
        Self { device, index, config }
    }

    pub(crate) fn site_types(unit: &PlacementUnit) -> Vec<SiteType> {
        if unit.needs_slicem() {
            vec![SiteType::SliceM]
        } else {
            unit.site_types.iter().copied().filter(|t| t.is_clb()).collect()
        }
    }

    /// Assigns each of `units` a slice with enough free slots near its
    /// current position.
    pub fn legalize(&self, info: &PlacementInfo, units: &[UnitId], mode: LegalizeMode) -> LegalizationResult {
        let mut pending: Vec<UnitId> = units.to_vec();
        pending.sort_unstable();
        pending.dedup();
        let mut used: BTreeMap<SiteId, ClbSlots> = BTreeMap::new();
        let mut accepted: Vec<LegalAssignment> = Vec::new();

        if mode == LegalizeMode::Exact && self.config.fixed_columns {
            let columns = self.assign_columns(info, &pending);
            self.match_rounds(info, &mut pending, &mut used, &mut accepted, Some(&columns));
            if !pending.is_empty() {
                log::debug!("{} units left their column to find a site", pending.len());
            }
        }
        self.match_rounds(info, &mut pending, &mut used, &mut accepted, None);

        if mode == LegalizeMode::Exact && self.config.dp_refinement {
            self.refine_columns(info, &mut accepted);
        }
        LegalizationResult::new(accepted, info, &pending)
    }

    fn free(&self, info: &PlacementInfo, used: &BTreeMap<SiteId, ClbSlots>, site: SiteId) -> ClbSlots {
        let occupancy = info.occupancy();
        if occupancy.is_exclusive(site) {
            return ClbSlots::default();
        }
        ClbSlots::capacity(self.config)
            .minus(occupancy.slots_used(site))
            .minus(used.get(&site).copied().unwrap_or_default())
    }

    /// Matches `pending` units with growing radius and candidate count,
    /// optionally keeping each unit inside its assigned column.
    fn match_rounds(
        &self,
        info: &PlacementInfo,
        pending: &mut Vec<UnitId>,
        used: &mut BTreeMap<SiteId, ClbSlots>,
        accepted: &mut Vec<LegalAssignment>,
        columns: Option<&BTreeMap<UnitId, u32>>,
    ) {
        let mut radius = self.config.initial_radius;
        let mut limit = self.config.initial_candidates.max(1);

        for round in 0..=self.config.max_expansions {
            if pending.is_empty() {
                break;
            }
            let candidates: Vec<Vec<(SiteId, f64)>> = pending
                .iter()
                .map(|&id| {
                    let unit = info.unit(id);
                    let demand = unit.clb_slot_demand();
                    let column = columns.and_then(|c| c.get(&id).copied());
                    self.index
                        .within(&Self::site_types(unit), unit.position, radius)
                        .into_iter()
                        .filter(|&(site, _)| {
                            column.map_or(true, |col| self.device.site(site).is_some_and(|s| s.column == col))
                        })
                        .filter(|&(site, _)| demand.fits_in(self.free(info, &*used, site)))
                        .take(limit)
                        .collect()
                })
                .collect();

            // replicate each site once per unit it could still take
            let mut listed: BTreeMap<SiteId, (u32, u32, u32)> = BTreeMap::new();
            for (d, list) in candidates.iter().enumerate() {
                let demand = info.unit(pending[d]).clb_slot_demand();
                for &(site, _) in list {
                    let entry = listed.entry(site).or_insert((u32::MAX, u32::MAX, 0));
                    if demand.luts > 0 {
                        entry.0 = entry.0.min(demand.luts);
                    }
                    if demand.ffs > 0 {
                        entry.1 = entry.1.min(demand.ffs);
                    }
                    entry.2 += 1;
                }
            }
            let mut base: BTreeMap<SiteId, (usize, usize)> = BTreeMap::new();
            let mut supply = 0;
            for (&site, &(min_luts, min_ffs, count)) in &listed {
                let free = self.free(info, &*used, site);
                let by_luts = if min_luts == u32::MAX { 0 } else { free.luts / min_luts };
                let by_ffs = if min_ffs == u32::MAX { 0 } else { free.ffs / min_ffs };
                let replicas = by_luts.saturating_add(by_ffs).min(count).max(1) as usize;
                base.insert(site, (supply, replicas));
                supply += replicas;
            }
            let mut owner = vec![SiteId::from_raw(0); supply];
            for (&site, &(start, replicas)) in &base {
                for slot in owner.iter_mut().skip(start).take(replicas) {
                    *slot = site;
                }
            }
            let mut problem = AssignmentProblem::new(pending.len(), supply);
            for (d, list) in candidates.iter().enumerate() {
                for &(site, cost) in list {
                    let (start, replicas) = base[&site];
                    for s in start..start + replicas {
                        problem.add_edge(d, s, cost);
                    }
                }
            }
            let solution = solve_components(&problem);

            let mut matched: Vec<(f64, usize, SiteId)> = Vec::new();
            for (d, list) in candidates.iter().enumerate() {
                let Some(s) = solution.supply_of(d) else {
                    continue;
                };
                let site = owner[s];
                if let Some(&(_, cost)) = list.iter().find(|&&(c, _)| c == site) {
                    matched.push((cost, d, site));
                }
            }
            matched.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            let mut placed = vec![false; pending.len()];
            for (cost, d, site) in matched {
                let unit = info.unit(pending[d]);
                let demand = unit.clb_slot_demand();
                if !demand.fits_in(self.free(info, &*used, site)) {
                    continue;
                }
                let entry = used.entry(site).or_default();
                *entry = entry.plus(demand);
                accepted.push(LegalAssignment {
                    unit: unit.id,
                    site,
                    sites: vec![site],
                    position: self.index.position(site).unwrap_or_default(),
                    displacement: cost,
                });
                placed[d] = true;
            }
            let mut k = 0;
            pending.retain(|_| {
                k += 1;
                !placed[k - 1]
            });
            log::debug!(
                "clb legalization round {round}: radius {radius:.1}, {} placed, {} pending",
                accepted.len(),
                pending.len()
            );
            radius *= self.config.radius_growth;
            limit = limit.saturating_mul(2);
        }
    }

    /// Gives every unit the nearest compatible column, then moves units out
    /// of columns whose demand exceeds their free slots.
    ///
    /// Units sharing a set of acceptable site types are balanced together;
    /// the most constrained sets go first and consume column capacity
    /// before the others see it.
    pub(crate) fn assign_columns(&self, info: &PlacementInfo, units: &[UnitId]) -> BTreeMap<UnitId, u32> {
        let mut room: BTreeMap<u32, ClbSlots> = BTreeMap::new();
        for column in self.device.columns().iter().filter(|c| c.site_type.is_clb()) {
            let free = column
                .sites
                .iter()
                .fold(ClbSlots::default(), |acc, &site| acc.plus(self.free(info, &BTreeMap::new(), site)));
            room.insert(column.index, free);
        }

        let mut groups: BTreeMap<Vec<SiteType>, Vec<UnitId>> = BTreeMap::new();
        for &id in units {
            let mut types = Self::site_types(info.unit(id));
            types.sort_unstable();
            groups.entry(types).or_default().push(id);
        }
        let mut groups: Vec<(Vec<u32>, Vec<UnitId>)> = groups
            .into_iter()
            .map(|(types, members)| {
                let mut cols: Vec<u32> = self
                    .device
                    .columns()
                    .iter()
                    .filter(|c| types.contains(&c.site_type))
                    .map(|c| c.index)
                    .collect();
                cols.sort_by(|&a, &b| self.column_x(a).total_cmp(&self.column_x(b)).then(a.cmp(&b)));
                (cols, members)
            })
            .collect();
        groups.sort_by_key(|(cols, _)| cols.len());

        let mut assigned = BTreeMap::new();
        for (cols, members) in groups {
            if cols.is_empty() {
                continue;
            }
            let mut lanes: Vec<VecDeque<UnitId>> = vec![VecDeque::new(); cols.len()];
            let mut sorted = members;
            sorted.sort_by(|&a, &b| {
                let (ua, ub) = (info.unit(a), info.unit(b));
                ua.position.x.total_cmp(&ub.position.x).then(a.cmp(&b))
            });
            for id in sorted {
                let x = info.unit(id).position.x;
                let lane = (0..cols.len())
                    .min_by(|&i, &j| {
                        (self.column_x(cols[i]) - x)
                            .abs()
                            .total_cmp(&(self.column_x(cols[j]) - x).abs())
                            .then(i.cmp(&j))
                    })
                    .unwrap_or(0);
                lanes[lane].push_back(id);
            }
            let capacity: Vec<ClbSlots> = cols.iter().map(|c| room.get(c).copied().unwrap_or_default()).collect();
            rebalance_columns(info, &capacity, &mut lanes);
            for (lane, ids) in lanes.iter().enumerate() {
                let demand = ids
                    .iter()
                    .fold(ClbSlots::default(), |acc, &id| acc.plus(info.unit(id).clb_slot_demand()));
                if let Some(r) = room.get_mut(&cols[lane]) {
                    *r = r.minus(demand);
                }
                for &id in ids {
                    assigned.insert(id, cols[lane]);
                }
            }
        }
        assigned
    }

    fn column_x(&self, column: u32) -> f64 {
        self.device.column(column).map_or(0.0, |c| c.x)
    }

    /// Reorders units of equal slot demand within one column so that their
    /// order along the column follows their targets. Only the slot positions
    /// already in use are reassigned.
    fn refine_columns(&self, info: &PlacementInfo, accepted: &mut [LegalAssignment]) {
        let mut groups: BTreeMap<(u32, ClbSlots), Vec<usize>> = BTreeMap::new();
        for (i, a) in accepted.iter().enumerate() {
            if let Some(site) = self.device.site(a.site) {
                let demand = info.unit(a.unit).clb_slot_demand();
                groups.entry((site.column, demand)).or_default().push(i);
            }
        }

        for members in groups.into_values() {
            if members.len() < 2 {
                continue;
            }
            let mut slots: Vec<SiteId> = members.iter().map(|&i| accepted[i].site).collect();
            slots.sort_by(|&a, &b| {
                let ra = self.device.site(a).map_or(0, |s| s.row);
                let rb = self.device.site(b).map_or(0, |s| s.row);
                ra.cmp(&rb).then(a.cmp(&b))
            });
            let mut order = members.clone();
            order.sort_by(|&a, &b| {
                let ua = info.unit(accepted[a].unit);
                let ub = info.unit(accepted[b].unit);
                ua.position.y.total_cmp(&ub.position.y).then(ua.id.cmp(&ub.id))
            });
            let positions: Vec<_> = slots
                .iter()
                .map(|&s| self.index.position(s).unwrap_or_default())
                .collect();
            let cost = |i: usize, row: usize| positions[row].manhattan(info.unit(accepted[order[i]].unit).position);
            let spans = vec![1; order.len()];
            let Some(starts) = place_in_order(&spans, slots.len(), |_, _| true, cost) else {
                continue;
            };
            let before: f64 = members.iter().map(|&i| accepted[i].displacement).sum();
            let after: f64 = starts.iter().enumerate().map(|(i, &row)| cost(i, row)).sum();
            if after > before + 1e-9 {
                continue;
            }
            let updates: Vec<(usize, usize, f64)> = starts
                .iter()
                .enumerate()
                .map(|(k, &row)| (order[k], row, cost(k, row)))
                .collect();
            for (i, row, displacement) in updates {
                accepted[i].site = slots[row];
                accepted[i].sites = vec![slots[row]];
                accepted[i].position = positions[row];
                accepted[i].displacement = displacement;
            }
        }
    }
}

/// Pushes units out of overfull lanes until every lane fits or no lane
/// has room left.
///
/// The first overfull lane splits its excess between the lanes on its
/// left and right in proportion to their spare capacity on the overflowing
/// side. Units leave from the matching edge of the lane, so lanes stay
/// ordered by x.
fn rebalance_columns(info: &PlacementInfo, capacity: &[ClbSlots], lanes: &mut [VecDeque<UnitId>]) {
    let demand_of = |id: UnitId| info.unit(id).clb_slot_demand();
    let mut load: Vec<ClbSlots> = lanes
        .iter()
        .map(|lane| lane.iter().fold(ClbSlots::default(), |acc, &id| acc.plus(demand_of(id))))
        .collect();
    let budget = lanes.iter().map(VecDeque::len).sum::<usize>() * lanes.len() + 1;

    for _ in 0..budget {
        let Some(over) = (0..lanes.len()).find(|&i| !load[i].fits_in(capacity[i])) else {
            return;
        };
        let excess_luts = i64::from(load[over].luts) - i64::from(capacity[over].luts);
        let excess_ffs = i64::from(load[over].ffs) - i64::from(capacity[over].ffs);
        let side = |s: ClbSlots| -> i64 {
            if excess_luts >= excess_ffs {
                i64::from(s.luts)
            } else {
                i64::from(s.ffs)
            }
        };
        let spare = |range: std::ops::Range<usize>| -> i64 {
            range.map(|i| side(capacity[i]) - side(load[i])).sum::<i64>().max(0)
        };
        let left = spare(0..over);
        let right = spare(over + 1..lanes.len());
        if left + right == 0 {
            return;
        }
        let excess = excess_luts.max(excess_ffs);
        let mut to_left = ((excess as f64) * (left as f64) / ((left + right) as f64)).round() as i64;
        let mut to_right = excess - to_left;
        let mut moved = false;

        while to_left > 0 && over > 0 {
            let Some(pos) = lanes[over].iter().position(|&id| side(demand_of(id)) > 0) else {
                break;
            };
            let Some(id) = lanes[over].remove(pos) else {
                break;
            };
            let d = demand_of(id);
            lanes[over - 1].push_back(id);
            load[over - 1] = load[over - 1].plus(d);
            load[over] = load[over].minus(d);
            to_left -= side(d);
            moved = true;
        }
        while to_right > 0 && over + 1 < lanes.len() {
            let Some(pos) = lanes[over].iter().rposition(|&id| side(demand_of(id)) > 0) else {
                break;
            };
            let Some(id) = lanes[over].remove(pos) else {
                break;
            };
            let d = demand_of(id);
            lanes[over + 1].push_front(id);
            load[over + 1] = load[over + 1].plus(d);
            load[over] = load[over].minus(d);
            to_right -= side(d);
            moved = true;
        }
        if !moved {
            return;
        }
    }
}
