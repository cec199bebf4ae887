//! Candidate unit groups for one packing site and how they are scored.

use crate::ids::{NetId, UnitId};
use crate::model::PlacementInfo;
use std::collections::BTreeMap;
use tessera_common::{ContentHash, Point};
use tessera_config::PackingConfig;

/// A set of units proposed for one site.
///
/// Units are kept sorted; the content hash covers the sorted IDs, so two
/// clusters reached through different growth orders compare equal.
#[derive(Debug, Clone, PartialEq)]
pub struct PackingCluster {
    units: Vec<UnitId>,
    hash: ContentHash,
    score: f64,
}

impl PackingCluster {
    /// Creates a cluster over `units` with a precomputed score.
    pub fn new(mut units: Vec<UnitId>, score: f64) -> Self {
        units.sort_unstable();
        units.dedup();
        let hash = Self::hash_of(&units);
        Self { units, hash, score }
    }

    /// The empty cluster.
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0.0)
    }

    /// Hash of a sorted unit list.
    pub fn hash_of(units: &[UnitId]) -> ContentHash {
        let words: Vec<u32> = units.iter().map(|u| u.as_raw()).collect();
        ContentHash::from_words(&words)
    }

    /// Member units, sorted.
    pub fn units(&self) -> &[UnitId] {
        &self.units
    }

    /// Content hash.
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    /// Score within its site.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns `true` for a cluster without units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Returns `true` if `unit` is a member.
    pub fn contains(&self, unit: UnitId) -> bool {
        self.units.binary_search(&unit).is_ok()
    }

    /// Returns `true` if every unit of `other` is a member.
    pub fn extends(&self, other: &PackingCluster) -> bool {
        other.units.iter().all(|&u| self.contains(u))
    }

    /// Members not in `other`.
    pub fn units_beyond(&self, other: &PackingCluster) -> Vec<UnitId> {
        self.units.iter().copied().filter(|&u| !other.contains(u)).collect()
    }

    /// This cluster's units plus `unit`, sorted.
    pub fn units_with(&self, unit: UnitId) -> Vec<UnitId> {
        let mut units = self.units.clone();
        if let Err(pos) = units.binary_search(&unit) {
            units.insert(pos, unit);
        }
        units
    }
}

/// Scores clusters: pin count and net sharing reward, wirelength increase
/// penalizes.
pub struct ScoreModel<'a> {
    info: &'a PlacementInfo,
    config: &'a PackingConfig,
    pins: Vec<u32>,
}

impl<'a> ScoreModel<'a> {
    /// Precomputes per-unit pin counts.
    pub fn new(info: &'a PlacementInfo, config: &'a PackingConfig) -> Self {
        let mut pins = vec![0u32; info.units().len()];
        for net in info.nets() {
            for pin in &net.pins {
                pins[pin.unit.index()] += 1;
            }
        }
        Self { info, config, pins }
    }

    /// Score of a cluster of `units` given each unit's wirelength increase.
    pub fn score(&self, units: &[UnitId], hpwl_delta: impl Fn(UnitId) -> f64) -> f64 {
        let cfg = self.config;
        let pin_count: u32 = units.iter().map(|u| self.pins[u.index()]).sum();

        let mut internal: BTreeMap<NetId, usize> = BTreeMap::new();
        for &u in units {
            for &net in &self.info.unit(u).nets {
                *internal.entry(net).or_insert(0) += 1;
            }
        }
        let connectivity: f64 = internal
            .iter()
            .filter_map(|(&net, &inside)| {
                let total = self.info.net(net).unit_count;
                if total > cfg.large_net {
                    None
                } else if total <= 1 {
                    Some(1.0)
                } else {
                    Some((inside as f64 - 1.0) / (total as f64 - 1.0))
                }
            })
            .sum();
        let hpwl: f64 = units.iter().map(|&u| hpwl_delta(u)).sum();

        cfg.cell_weight * 0.5 * pin_count as f64 + cfg.connectivity_weight * connectivity - cfg.hpwl_weight * hpwl
    }

    /// Wirelength change if `unit` moved to `at`, over nets small enough to
    /// score.
    pub fn hpwl_delta(&self, unit: UnitId, at: Point) -> f64 {
        let units = self.info.units();
        self.info
            .unit(unit)
            .nets
            .iter()
            .map(|&id| self.info.net(id))
            .filter(|net| net.unit_count <= self.config.large_net)
            .map(|net| {
                let before = net.hpwl(units);
                let after = net
                    .compute_bounds(|u| if u == unit { at } else { units[u.index()].position })
                    .map_or(0.0, |b| b.hpwl());
                after - before
            })
            .sum()
    }
}
