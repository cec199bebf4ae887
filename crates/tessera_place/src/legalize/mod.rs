//! Progressive legalization onto discrete sites.
//!
//! Both legalizers work the same way. They gather candidate sites around
//! every unit, solve a minimum-cost assignment, and accept matches greedily
//! by cost. Unmatched units retry with a wider radius and more candidates.
//! [`MacroLegalizer`] handles units that need sites to themselves.
//! [`ClbLegalizer`] shares slice sites between units, counting LUT and
//! flip-flop slots separately.

pub mod clb;
pub mod dp;
pub mod macros;
pub mod site_index;

pub use clb::ClbLegalizer;
pub use macros::MacroLegalizer;
pub use site_index::SiteIndex;

use crate::ids::UnitId;
use crate::model::{ClbSlots, LegalFamily, PlacementInfo};
use crate::status::{FailureKind, PlacementFailure};
use serde::{Deserialize, Serialize};
use tessera_common::Point;
use tessera_device::{Device, SiteId};

/// How thoroughly to legalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegalizeMode {
    /// Matching only; used to derive pseudo-net targets.
    Rough,
    /// Matching followed by column refinement.
    Exact,
}

/// The legal location chosen for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalAssignment {
    /// The unit.
    pub unit: UnitId,
    /// Anchor site.
    pub site: SiteId,
    /// Every site the footprint covers, anchor first.
    pub sites: Vec<SiteId>,
    /// New anchor coordinate.
    pub position: Point,
    /// Manhattan distance from the unit's position before legalization.
    pub displacement: f64,
}

/// Outcome of one legalization call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegalizationResult {
    /// Assignments in unit order.
    pub assignments: Vec<LegalAssignment>,
    /// Units that found no site.
    pub failures: Vec<PlacementFailure>,
    /// Summed displacement.
    pub total_displacement: f64,
    /// Largest single displacement.
    pub max_displacement: f64,
}

impl LegalizationResult {
    pub(crate) fn new(mut assignments: Vec<LegalAssignment>, info: &PlacementInfo, failed: &[UnitId]) -> Self {
        assignments.sort_by_key(|a| a.unit);
        let total_displacement = assignments.iter().map(|a| a.displacement).sum();
        let max_displacement = assignments.iter().map(|a| a.displacement).fold(0.0, f64::max);
        let failures = failed
            .iter()
            .map(|&unit| PlacementFailure {
                unit,
                name: info.unit(unit).name.clone(),
                kind: FailureKind::InfeasibleCandidate,
            })
            .collect();
        Self {
            assignments,
            failures,
            total_displacement,
            max_displacement,
        }
    }

    /// Returns `true` if every unit found a site.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The assignment of `unit`, if any.
    pub fn assignment(&self, unit: UnitId) -> Option<&LegalAssignment> {
        self.assignments
            .binary_search_by_key(&unit, |a| a.unit)
            .ok()
            .map(|i| &self.assignments[i])
    }

    /// Moves every assigned unit onto its site, binds the sites, and locks
    /// the unit. Exclusive units fill `capacity` on every site they cover.
    pub fn commit(&self, info: &mut PlacementInfo, capacity: ClbSlots) {
        for a in &self.assignments {
            info.set_position(a.unit, a.position);
            let (family, demand) = {
                let unit = info.unit_mut(a.unit);
                unit.site = Some(a.site);
                unit.anchor = Some(a.position);
                unit.locked = true;
                (unit.family, unit.clb_slot_demand())
            };
            let occupancy = info.occupancy_mut();
            match family {
                LegalFamily::Exclusive => {
                    for &site in &a.sites {
                        occupancy.bind(site, a.unit, capacity, true);
                    }
                }
                LegalFamily::Shared => occupancy.bind(a.site, a.unit, demand, false),
            }
        }
    }
}

/// Binds every fixed unit to the site under it.
///
/// A fixed unit with no compatible site within half a site pitch stays
/// unbound; it still blocks density but never a site.
pub fn bind_fixed_units(info: &mut PlacementInfo, device: &Device, index: &SiteIndex, capacity: ClbSlots) {
    let fixed: Vec<UnitId> = info.units().iter().filter(|u| u.fixed).map(|u| u.id).collect();
    for id in fixed {
        let (position, types, family, span, demand) = {
            let u = info.unit(id);
            (u.position, u.site_types.clone(), u.family, u.span(), u.clb_slot_demand())
        };
        let Some(site) = index.nearest(&types, position, 0.5) else {
            log::warn!("fixed unit `{}` is not on a compatible site", info.unit(id).name);
            continue;
        };
        info.unit_mut(id).site = Some(site);
        match family {
            LegalFamily::Exclusive => {
                for covered in footprint_rows(device, site, span) {
                    info.occupancy_mut().bind(covered, id, capacity, true);
                }
            }
            LegalFamily::Shared => info.occupancy_mut().bind(site, id, demand, false),
        }
    }
}

/// The sites of `span` consecutive rows starting at `anchor`, truncated at
/// the top of the column.
pub(crate) fn footprint_rows(device: &Device, anchor: SiteId, span: u32) -> Vec<SiteId> {
    let Some(site) = device.site(anchor) else {
        return Vec::new();
    };
    (0..span.max(1))
        .filter_map(|k| device.site_at(site.column, site.row + k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{CellKind, Design};
    use tessera_device::{CompatiblePlacementTable, DeviceBuilder, SiteType};
    use tessera_diagnostics::DiagnosticSink;

    #[test]
    fn fixed_units_claim_their_site() {
        let device = DeviceBuilder::new("t", 4.0)
            .column(SiteType::SliceL, 1.0)
            .column(SiteType::Dsp, 1.0)
            .build();
        let table = CompatiblePlacementTable::ultrascale();
        let mut d = Design::new("top");
        let dsp = d.add("dsp", CellKind::Dsp48);
        d.fix_cell(dsp, Point::new(1.0, 2.0));
        let lut = d.add("lut", CellKind::Lut { inputs: 4 });
        d.fix_cell(lut, Point::new(0.0, 3.0));
        let mut info = PlacementInfo::build(&d, &device, &table, None, None, &DiagnosticSink::new()).unwrap();
        let index = SiteIndex::new(&device, 2.0);
        bind_fixed_units(&mut info, &device, &index, ClbSlots::new(8, 16));

        let dsp_site = device.site_at(1, 2).unwrap();
        assert!(info.occupancy().is_exclusive(dsp_site));
        assert_eq!(info.unit(UnitId::from_raw(0)).site, Some(dsp_site));
        let lut_site = device.site_at(0, 3).unwrap();
        assert_eq!(info.occupancy().slots_used(lut_site), ClbSlots::new(1, 0));
        assert!(!info.occupancy().is_exclusive(lut_site));
    }

    #[test]
    fn commit_locks_and_binds() {
        let device = DeviceBuilder::new("t", 4.0).column(SiteType::Dsp, 1.0).build();
        let table = CompatiblePlacementTable::ultrascale();
        let mut d = Design::new("top");
        d.add("dsp", CellKind::Dsp48);
        let mut info = PlacementInfo::build(&d, &device, &table, None, None, &DiagnosticSink::new()).unwrap();
        let unit = UnitId::from_raw(0);
        let site = device.site_at(0, 1).unwrap();
        let result = LegalizationResult::new(
            vec![LegalAssignment {
                unit,
                site,
                sites: vec![site],
                position: Point::new(0.0, 1.0),
                displacement: 1.0,
            }],
            &info,
            &[],
        );
        assert!(result.is_complete());
        assert_eq!(result.assignment(unit).map(|a| a.site), Some(site));
        result.commit(&mut info, ClbSlots::new(8, 16));
        let u = info.unit(unit);
        assert!(u.locked);
        assert_eq!(u.site, Some(site));
        assert_eq!(u.position, Point::new(0.0, 1.0));
        assert_eq!(info.occupancy().units_at(site), &[unit]);
    }
}
