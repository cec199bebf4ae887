//! Per-site packing state: the determined cluster, the neighbour pool and a
//! bounded queue of candidate clusters.

use super::cluster::{PackingCluster, ScoreModel};
use super::ownership::OwnershipTable;
use super::slots::{map_cells, Member};
use crate::ids::UnitId;
use crate::legalize::ClbLegalizer;
use crate::model::PlacementInfo;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tessera_common::{ContentHash, Point, Rect};
use tessera_config::PackingConfig;
use tessera_device::{SiteId, SiteType};

const SCORE_EPSILON: f64 = 1e-9;

/// Free units bucketed by position.
pub(crate) struct UnitGrid {
    left: f64,
    bottom: f64,
    size: f64,
    cols: usize,
    rows: usize,
    cells: Vec<Vec<(UnitId, Point)>>,
}

impl UnitGrid {
    pub(crate) fn new(outline: Rect, size: f64, units: impl IntoIterator<Item = (UnitId, Point)>) -> Self {
        let size = if size > 0.0 { size } else { 1.0 };
        let cols = ((outline.width() / size).ceil() as usize).max(1);
        let rows = ((outline.height() / size).ceil() as usize).max(1);
        let mut grid = Self {
            left: outline.left,
            bottom: outline.bottom,
            size,
            cols,
            rows,
            cells: vec![Vec::new(); cols * rows],
        };
        for (unit, p) in units {
            let (c, r) = grid.bucket(p);
            grid.cells[r * cols + c].push((unit, p));
        }
        grid
    }

    fn bucket(&self, p: Point) -> (usize, usize) {
        let c = ((p.x - self.left) / self.size).floor().max(0.0) as usize;
        let r = ((p.y - self.bottom) / self.size).floor().max(0.0) as usize;
        (c.min(self.cols - 1), r.min(self.rows - 1))
    }

    /// Units within Manhattan distance `radius`, nearest first, ties by ID.
    pub(crate) fn within(&self, center: Point, radius: f64) -> Vec<(UnitId, f64)> {
        let (c0, r0) = self.bucket(Point::new(center.x - radius, center.y - radius));
        let (c1, r1) = self.bucket(Point::new(center.x + radius, center.y + radius));
        let mut found = Vec::new();
        for row in r0..=r1 {
            for col in c0..=c1 {
                for &(unit, p) in &self.cells[row * self.cols + col] {
                    let d = p.manhattan(center);
                    if d <= radius {
                        found.push((unit, d));
                    }
                }
            }
        }
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        found
    }
}

/// Read-only state shared by every site during one packing run.
pub(crate) struct PackContext<'a> {
    pub info: &'a PlacementInfo,
    pub config: &'a PackingConfig,
    pub model: ScoreModel<'a>,
    pub pool: UnitGrid,
    /// Slice cells of every unit.
    pub members: Vec<Vec<Member>>,
}

/// The slice cells of `unit` as packing members.
pub(crate) fn unit_members(info: &PlacementInfo, unit: UnitId) -> Vec<Member> {
    let u = info.unit(unit);
    let group = u.macro_kind().map(|k| (k, unit.as_raw()));
    u.cells()
        .iter()
        .enumerate()
        .map(|(order, mc)| Member {
            cell: mc.cell,
            kind: info.cell(mc.cell).kind,
            group,
            order,
        })
        .collect()
}

/// Packing state of one slice site.
#[derive(Debug, Clone)]
pub struct PackingSite {
    site: SiteId,
    site_type: SiteType,
    position: Point,
    required: Vec<Member>,
    neighbors: BTreeMap<UnitId, f64>,
    rejected: BTreeSet<UnitId>,
    radius: f64,
    queue: Vec<PackingCluster>,
    determined: PackingCluster,
    last_top: Option<ContentHash>,
    unchanged: u32,
}

impl PackingSite {
    /// Creates a site whose determined cluster starts as `seeded`, or empty
    /// if those units no longer fit.
    pub(crate) fn new(
        site: SiteId,
        site_type: SiteType,
        position: Point,
        required: Vec<Member>,
        seeded: Vec<UnitId>,
        ctx: &PackContext<'_>,
    ) -> Self {
        let mut s = Self {
            site,
            site_type,
            position,
            required,
            neighbors: BTreeMap::new(),
            rejected: BTreeSet::new(),
            radius: ctx.config.initial_radius,
            queue: Vec::new(),
            determined: PackingCluster::empty(),
            last_top: None,
            unchanged: 0,
        };
        s.determined = s.evaluate(ctx, seeded).unwrap_or_else(|| {
            log::debug!("seeded cluster no longer fits site {}", site);
            PackingCluster::empty()
        });
        s
    }

    /// The site.
    pub fn site(&self) -> SiteId {
        self.site
    }

    /// Slice type of the site.
    pub fn site_type(&self) -> SiteType {
        self.site_type
    }

    /// The committed cluster.
    pub fn determined(&self) -> &PackingCluster {
        &self.determined
    }

    /// Best candidate, if any.
    pub fn top(&self) -> Option<&PackingCluster> {
        self.queue.first()
    }

    /// Updates without a top change.
    pub fn unchanged(&self) -> u32 {
        self.unchanged
    }

    pub(crate) fn required(&self) -> &[Member] {
        &self.required
    }

    fn delta(&self, ctx: &PackContext<'_>, unit: UnitId) -> f64 {
        self.neighbors
            .get(&unit)
            .copied()
            .unwrap_or_else(|| ctx.model.hpwl_delta(unit, self.position))
    }

    /// Scores `units` if they fit this site together with the required cells.
    pub(crate) fn evaluate(&self, ctx: &PackContext<'_>, units: Vec<UnitId>) -> Option<PackingCluster> {
        let mut members = self.required.clone();
        for u in &units {
            members.extend_from_slice(&ctx.members[u.index()]);
        }
        map_cells(&members, ctx.info, self.site_type)?;
        let score = ctx.model.score(&units, |u| self.delta(ctx, u));
        Some(PackingCluster::new(units, score))
    }

    fn accepts(&self, ctx: &PackContext<'_>, unit: UnitId) -> bool {
        ClbLegalizer::site_types(ctx.info.unit(unit)).contains(&self.site_type)
    }

    /// Adds free units within the current radius to the neighbour pool.
    pub(crate) fn gather(&mut self, ctx: &PackContext<'_>, ownership: &OwnershipTable, idx: usize) {
        let limit = ctx.config.max_neighbors;
        for (unit, _) in ctx.pool.within(self.position, self.radius) {
            if self.neighbors.len() >= limit {
                break;
            }
            if self.neighbors.contains_key(&unit)
                || self.rejected.contains(&unit)
                || self.determined.contains(unit)
                || !ownership.is_available(unit, idx)
                || !self.accepts(ctx, unit)
            {
                continue;
            }
            let delta = ctx.model.hpwl_delta(unit, self.position);
            self.neighbors.insert(unit, delta);
        }
    }

    fn prune(&mut self, ctx: &PackContext<'_>, ownership: &OwnershipTable, idx: usize) {
        let mut stale = Vec::new();
        for &unit in self.neighbors.keys() {
            if self.determined.contains(unit) || !ownership.is_available(unit, idx) {
                stale.push((unit, false));
            } else if self.evaluate(ctx, self.determined.units_with(unit)).is_none() {
                stale.push((unit, true));
            }
        }
        for (unit, misfit) in stale {
            self.neighbors.remove(&unit);
            if misfit {
                self.rejected.insert(unit);
            }
        }
    }

    /// One update step: drop stale candidates, widen the search if the queue
    /// ran dry, grow the best clusters by one neighbour each and re-rank.
    pub(crate) fn update(&mut self, idx: usize, ctx: &PackContext<'_>, ownership: &OwnershipTable) {
        let cfg = ctx.config;
        let det = &self.determined;
        self.queue.retain(|c| {
            c.len() > det.len() && c.extends(det) && c.units().iter().all(|&u| ownership.is_available(u, idx))
        });
        self.prune(ctx, ownership, idx);

        if self.queue.is_empty() && self.radius < cfg.max_radius {
            self.radius = (self.radius + cfg.radius_step).min(cfg.max_radius);
        }
        self.gather(ctx, ownership, idx);

        let seeds: Vec<PackingCluster> = if self.queue.is_empty() {
            vec![self.determined.clone()]
        } else {
            self.queue.iter().take(cfg.grow_width.max(1)).cloned().collect()
        };
        let mut seen: HashSet<ContentHash> = self.queue.iter().map(PackingCluster::hash).collect();
        seen.insert(self.determined.hash());
        let mut grown = Vec::new();
        for seed in &seeds {
            for &unit in self.neighbors.keys() {
                if seed.contains(unit) {
                    continue;
                }
                let units = seed.units_with(unit);
                if !seen.insert(PackingCluster::hash_of(&units)) {
                    continue;
                }
                if let Some(c) = self.evaluate(ctx, units) {
                    grown.push(c);
                }
            }
        }
        self.queue.extend(grown);
        self.queue
            .sort_by(|a, b| b.score().total_cmp(&a.score()).then(a.hash().cmp(&b.hash())));
        truncate_queue(&mut self.queue, cfg);

        let top = self.queue.first().map(PackingCluster::hash);
        if top.is_some() && top == self.last_top {
            self.unchanged += 1;
        } else {
            self.unchanged = u32::from(top.is_some());
        }
        self.last_top = top;
    }

    /// Returns `true` if the top candidate beats the determined cluster.
    pub fn improving(&self) -> bool {
        self.gain().is_some_and(|g| g > SCORE_EPSILON)
    }

    /// Score gained by committing the top candidate.
    pub fn gain(&self) -> Option<f64> {
        self.top().map(|t| t.score() - self.determined.score())
    }

    /// Units the top candidate adds.
    pub fn new_units(&self) -> Vec<UnitId> {
        self.top()
            .map(|t| t.units_beyond(&self.determined))
            .unwrap_or_default()
    }

    /// Claims the top candidate's new units and makes it the determined
    /// cluster. Leaves everything untouched if any claim fails.
    pub(crate) fn commit_top(&mut self, idx: usize, ownership: &OwnershipTable) -> bool {
        let Some(top) = self.queue.first().cloned() else {
            return false;
        };
        let fresh = top.units_beyond(&self.determined);
        for (k, &unit) in fresh.iter().enumerate() {
            if !ownership.claim(unit, idx) {
                for &done in &fresh[..k] {
                    ownership.release(done, idx);
                }
                return false;
            }
        }
        for unit in &fresh {
            self.neighbors.remove(unit);
        }
        self.determined = top;
        self.queue.remove(0);
        self.last_top = None;
        self.unchanged = 0;
        true
    }

    /// Adds `unit` directly to the determined cluster if it fits and can be
    /// claimed.
    pub(crate) fn absorb(&mut self, idx: usize, ctx: &PackContext<'_>, ownership: &OwnershipTable, unit: UnitId) -> bool {
        if !self.accepts(ctx, unit) {
            return false;
        }
        let Some(cluster) = self.evaluate(ctx, self.determined.units_with(unit)) else {
            return false;
        };
        if !ownership.claim(unit, idx) {
            return false;
        }
        self.neighbors.remove(&unit);
        self.determined = cluster;
        self.queue.clear();
        self.last_top = None;
        self.unchanged = 0;
        true
    }
}

/// Keeps the best `pq_size` clusters plus any near-ties to the cutoff, up to
/// `pq_extend` times the size.
fn truncate_queue(queue: &mut Vec<PackingCluster>, cfg: &PackingConfig) {
    let size = cfg.pq_size.max(1);
    if queue.len() <= size {
        return;
    }
    let cutoff = queue[size - 1].score();
    let threshold = cutoff - cutoff.abs() * (1.0 - cfg.tie_ratio);
    let cap = ((size as f64) * cfg.pq_extend).floor().max(size as f64) as usize;
    let mut keep = size;
    while keep < queue.len() && keep < cap && queue[keep].score() >= threshold {
        keep += 1;
    }
    queue.truncate(keep);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(id: u32, score: f64) -> PackingCluster {
        PackingCluster::new(vec![UnitId::from_raw(id)], score)
    }

    #[test]
    fn truncation_keeps_near_ties() {
        let cfg = PackingConfig {
            pq_size: 2,
            pq_extend: 2.0,
            tie_ratio: 0.99,
            ..PackingConfig::default()
        };
        let mut q = vec![cluster(0, 10.0), cluster(1, 5.0), cluster(2, 4.99), cluster(3, 4.90), cluster(4, 1.0)];
        truncate_queue(&mut q, &cfg);
        assert_eq!(q.len(), 3);

        let mut short = vec![cluster(0, 3.0)];
        truncate_queue(&mut short, &cfg);
        assert_eq!(short.len(), 1);
    }

    #[test]
    fn unit_grid_orders_by_distance() {
        let grid = UnitGrid::new(
            Rect::new(0.0, 0.0, 8.0, 8.0),
            2.0,
            [
                (UnitId::from_raw(0), Point::new(5.0, 5.0)),
                (UnitId::from_raw(1), Point::new(1.0, 1.0)),
                (UnitId::from_raw(2), Point::new(1.0, 0.0)),
                (UnitId::from_raw(3), Point::new(0.0, 1.0)),
            ],
        );
        let found = grid.within(Point::new(0.0, 0.0), 2.0);
        let ids: Vec<u32> = found.iter().map(|(u, _)| u.as_raw()).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert!(grid.within(Point::new(7.9, 7.9), 1.0).is_empty());
    }
}
