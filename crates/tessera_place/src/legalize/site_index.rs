//! Bucketed spatial index over device sites.

use std::collections::BTreeMap;
use tessera_common::Point;
use tessera_device::{Device, SiteId, SiteType};

#[derive(Debug, Clone)]
struct Buckets {
    cols: usize,
    rows: usize,
    cells: Vec<Vec<SiteId>>,
}

/// Answers "which sites of these types lie within this distance" queries.
///
/// Sites are bucketed per type into square cells of `bucket_size`; a query
/// visits only the cells overlapping the search diamond's bounding box.
#[derive(Debug, Clone)]
pub struct SiteIndex {
    bucket_size: f64,
    positions: Vec<Point>,
    by_type: BTreeMap<SiteType, Buckets>,
}

impl SiteIndex {
    /// Default bucket edge length.
    pub const DEFAULT_BUCKET: f64 = 4.0;

    /// Indexes every site of `device`.
    pub fn new(device: &Device, bucket_size: f64) -> Self {
        let bucket_size = if bucket_size > 0.0 {
            bucket_size
        } else {
            Self::DEFAULT_BUCKET
        };
        let outline = device.outline();
        let cols = ((outline.width() / bucket_size).ceil() as usize).max(1);
        let rows = ((outline.height() / bucket_size).ceil() as usize).max(1);
        let mut by_type: BTreeMap<SiteType, Buckets> = BTreeMap::new();
        let mut positions = Vec::with_capacity(device.sites().len());
        for site in device.sites() {
            positions.push(site.position);
            let buckets = by_type.entry(site.site_type).or_insert_with(|| Buckets {
                cols,
                rows,
                cells: vec![Vec::new(); cols * rows],
            });
            let (c, r) = bucket_of(site.position, bucket_size, cols, rows);
            buckets.cells[r * cols + c].push(site.id);
        }
        Self {
            bucket_size,
            positions,
            by_type,
        }
    }

    /// Position of an indexed site.
    pub fn position(&self, site: SiteId) -> Option<Point> {
        self.positions.get(site.index()).copied()
    }

    /// Sites of any of `types` within Manhattan distance `radius` of
    /// `center`, nearest first, ties by site ID.
    pub fn within(&self, types: &[SiteType], center: Point, radius: f64) -> Vec<(SiteId, f64)> {
        let mut found = Vec::new();
        for site_type in types {
            let Some(buckets) = self.by_type.get(site_type) else {
                continue;
            };
            let lo = Point::new(center.x - radius, center.y - radius);
            let hi = Point::new(center.x + radius, center.y + radius);
            let (c0, r0) = bucket_of(lo, self.bucket_size, buckets.cols, buckets.rows);
            let (c1, r1) = bucket_of(hi, self.bucket_size, buckets.cols, buckets.rows);
            for row in r0..=r1 {
                for col in c0..=c1 {
                    for &site in &buckets.cells[row * buckets.cols + col] {
                        let d = self.positions[site.index()].manhattan(center);
                        if d <= radius {
                            found.push((site, d));
                        }
                    }
                }
            }
        }
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        found.dedup_by_key(|entry| entry.0);
        found
    }

    /// The nearest site of any of `types` within `radius`, if one exists.
    pub fn nearest(&self, types: &[SiteType], center: Point, radius: f64) -> Option<SiteId> {
        self.within(types, center, radius).first().map(|&(site, _)| site)
    }
}

fn bucket_of(p: Point, size: f64, cols: usize, rows: usize) -> (usize, usize) {
    let c = (p.x / size).floor().max(0.0) as usize;
    let r = (p.y / size).floor().max(0.0) as usize;
    (c.min(cols - 1), r.min(rows - 1))
}
