//! The immutable device model and a builder for regular column layouts.

use crate::ids::{ClockRegionId, SiteId};
use crate::types::{ClockRegion, Site, SiteColumn, SiteType};
use serde::{Deserialize, Serialize};
use tessera_common::{Point, Rect};

/// An FPGA fabric: typed site columns partitioned into clock regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    name: String,
    width: f64,
    height: f64,
    sites: Vec<Site>,
    columns: Vec<SiteColumn>,
    clock_regions: Vec<ClockRegion>,
    region_cols: u32,
    region_rows: u32,
    region_width: f64,
    region_height: f64,
}

impl Device {
    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the device width in coordinate units.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Returns the device height in coordinate units.
    pub fn height(&self) -> f64 {
        self.height
    }

    /// Returns the placeable area.
    pub fn outline(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }

    /// Returns all sites, indexed by [`SiteId`].
    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Returns the site with the given ID, if it exists.
    pub fn site(&self, id: SiteId) -> Option<&Site> {
        self.sites.get(id.index())
    }

    /// Returns all site columns, left to right.
    pub fn columns(&self) -> &[SiteColumn] {
        &self.columns
    }

    /// Returns the column with the given index.
    pub fn column(&self, index: u32) -> Option<&SiteColumn> {
        self.columns.get(index as usize)
    }

    /// Returns the site at `row` of column `column`.
    pub fn site_at(&self, column: u32, row: u32) -> Option<SiteId> {
        self.column(column)
            .and_then(|c| c.sites.get(row as usize))
            .copied()
    }

    /// Iterates over the sites of one type.
    pub fn sites_of_type(&self, site_type: SiteType) -> impl Iterator<Item = &Site> + '_ {
        self.sites.iter().filter(move |s| s.site_type == site_type)
    }

    /// Counts the sites of one type.
    pub fn count_of_type(&self, site_type: SiteType) -> usize {
        self.sites_of_type(site_type).count()
    }

    /// Returns all clock regions.
    pub fn clock_regions(&self) -> &[ClockRegion] {
        &self.clock_regions
    }

    /// Returns the clock region containing `p`, clamping to the outline.
    pub fn clock_region_at(&self, p: Point) -> ClockRegionId {
        let col = ((p.x / self.region_width).floor().max(0.0) as u32).min(self.region_cols - 1);
        let row = ((p.y / self.region_height).floor().max(0.0) as u32).min(self.region_rows - 1);
        ClockRegionId::from_raw(row * self.region_cols + col)
    }
}

struct ColumnSpec {
    site_type: SiteType,
    pitch: f64,
}

/// Builds a [`Device`] from a left-to-right list of site columns.
///
/// Column `i` sits at `x = i`. Each column is filled bottom-up with sites
/// every `pitch` units until the device height is reached.
pub struct DeviceBuilder {
    name: String,
    height: f64,
    columns: Vec<ColumnSpec>,
    region_columns: u32,
    region_height: f64,
}

impl DeviceBuilder {
    /// Starts a device of the given height with one clock region.
    pub fn new(name: impl Into<String>, height: f64) -> Self {
        Self {
            name: name.into(),
            height,
            columns: Vec::new(),
            region_columns: 0,
            region_height: height,
        }
    }

    /// Appends one column of `site_type` with the given row pitch.
    pub fn column(mut self, site_type: SiteType, pitch: f64) -> Self {
        self.columns.push(ColumnSpec { site_type, pitch });
        self
    }

    /// Appends `count` identical columns.
    pub fn columns(mut self, site_type: SiteType, count: u32, pitch: f64) -> Self {
        for _ in 0..count {
            self.columns.push(ColumnSpec { site_type, pitch });
        }
        self
    }

    /// Splits the device into clock regions `columns` wide and `height` tall.
    pub fn clock_regions(mut self, columns: u32, height: f64) -> Self {
        self.region_columns = columns;
        self.region_height = height;
        self
    }

    /// Lays out every site and clock region.
    pub fn build(self) -> Device {
        let width = self.columns.len().max(1) as f64;
        let region_width = if self.region_columns == 0 {
            width
        } else {
            self.region_columns as f64
        };
        let region_height = if self.region_height > 0.0 {
            self.region_height
        } else {
            self.height
        };
        let region_cols = ((width / region_width).ceil() as u32).max(1);
        let region_rows = ((self.height / region_height).ceil() as u32).max(1);

        let mut clock_regions = Vec::new();
        for row in 0..region_rows {
            for col in 0..region_cols {
                let left = col as f64 * region_width;
                let bottom = row as f64 * region_height;
                clock_regions.push(ClockRegion {
                    id: ClockRegionId::from_raw(row * region_cols + col),
                    col,
                    row,
                    bounds: Rect::new(
                        left,
                        bottom,
                        (left + region_width).min(width),
                        (bottom + region_height).min(self.height),
                    ),
                });
            }
        }

        let mut device = Device {
            name: self.name,
            width,
            height: self.height,
            sites: Vec::new(),
            columns: Vec::new(),
            clock_regions,
            region_cols,
            region_rows,
            region_width,
            region_height,
        };

        for (index, spec) in self.columns.iter().enumerate() {
            let x = index as f64;
            let rows = if spec.pitch > 0.0 {
                (self.height / spec.pitch).floor() as u32
            } else {
                0
            };
            let mut column = SiteColumn {
                index: index as u32,
                x,
                site_type: spec.site_type,
                pitch: spec.pitch,
                sites: Vec::with_capacity(rows as usize),
            };
            for row in 0..rows {
                let id = SiteId::from_raw(device.sites.len() as u32);
                let position = Point::new(x, row as f64 * spec.pitch);
                let clock_region = device.clock_region_at(position);
                device.sites.push(Site {
                    id,
                    name: format!("{}_X{index}Y{row}", spec.site_type.prefix()),
                    site_type: spec.site_type,
                    position,
                    column: index as u32,
                    row,
                    clock_region,
                });
                column.sites.push(id);
            }
            device.columns.push(column);
        }

        device
    }
}
