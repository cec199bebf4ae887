//! Configuration types deserialized from `tessera.toml`.
//!
//! Each section maps to one placement stage. Omitted sections and options
//! take the defaults documented on each field.

use serde::{Deserialize, Serialize};

/// The top-level placer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlacerConfig {
    /// Orchestrator loop, budget, and pseudo-net schedule.
    pub global: GlobalConfig,
    /// Bound-to-bound quadratic model and linear solver.
    pub wirelength: WirelengthConfig,
    /// Bin-based density spreading.
    pub spread: SpreadConfig,
    /// Macro and CLB legalization.
    pub legalize: LegalizeConfig,
    /// Concurrent CLB site packing.
    pub packing: PackingConfig,
}

/// Orchestrator options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Hard cap on optimize iterations (default 200).
    pub max_iterations: u32,
    /// Optional wall-clock budget in seconds.
    pub time_budget_secs: Option<f64>,
    /// Worker threads for the parallel stages; `None` uses the global pool.
    pub threads: Option<usize>,
    /// Seed for the spreader's pivot selection (default 1).
    pub seed: u64,
    /// Quadratic solves per optimize step (default 2).
    pub qp_passes: u32,
    /// Pseudo-net weight at the first spread-anchored solve (default 0.001).
    pub initial_pseudo_net_weight: f64,
    /// Below this weight the fast growth factor applies (default 0.002).
    pub fast_growth_limit: f64,
    /// Growth factor while the weight is under `fast_growth_limit` (default 1.825).
    pub fast_growth: f64,
    /// Growth factor at zero progress (default 1.5).
    pub early_growth: f64,
    /// Growth factor at full progress (default 1.01).
    pub late_growth: f64,
    /// Global overflow ratio above which Optimize hands off to Spread (default 0.1).
    pub overflow_threshold: f64,
    /// Consecutive near-zero-overflow spread passes before legalizing (default 2).
    pub spread_stable_window: u32,
    /// Relative legal-displacement drop that keeps the loop going (default 0.05).
    pub displacement_tolerance: f64,
    /// Average macro displacement under which macros are committed and locked (default 2.0).
    pub lock_displacement: f64,
    /// Legalization rounds that may report failures before the run is infeasible (default 3).
    pub legalize_retry_budget: u32,
    /// Relative HPWL change treated as no improvement (default 0.01).
    pub hpwl_tolerance: f64,
    /// Length of the HPWL history window used for the RMS check (default 5).
    pub hpwl_window: usize,
    /// Iterations without HPWL improvement before terminating early (default 8).
    pub hpwl_stall_iterations: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            time_budget_secs: None,
            threads: None,
            seed: 1,
            qp_passes: 2,
            initial_pseudo_net_weight: 0.001,
            fast_growth_limit: 0.002,
            fast_growth: 1.825,
            early_growth: 1.5,
            late_growth: 1.01,
            overflow_threshold: 0.1,
            spread_stable_window: 2,
            displacement_tolerance: 0.05,
            lock_displacement: 2.0,
            legalize_retry_budget: 3,
            hpwl_tolerance: 0.01,
            hpwl_window: 5,
            hpwl_stall_iterations: 8,
        }
    }
}

/// Quadratic wirelength model options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WirelengthConfig {
    /// Floor on pin distance when dividing B2B edge weights (default 0.5).
    pub min_distance: f64,
    /// Multiplier on vertical edge weights (default 1.0).
    pub y2x_ratio: f64,
    /// Nets with more pins than this are left out of the model (default 10000).
    pub ignore_net_degree: usize,
    /// Conjugate-gradient iteration cap (default 500).
    pub solver_max_iterations: usize,
    /// Relative residual at which the solve is accepted (default 1e-6).
    pub solver_tolerance: f64,
    /// Multiplier on pseudo-nets pulling units toward legal sites (default 1.0).
    pub legal_pseudo_net_factor: f64,
}

impl Default for WirelengthConfig {
    fn default() -> Self {
        Self {
            min_distance: 0.5,
            y2x_ratio: 1.0,
            ignore_net_degree: 10_000,
            solver_max_iterations: 500,
            solver_tolerance: 1e-6,
            legal_pseudo_net_factor: 1.0,
        }
    }
}

/// Density spreading options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpreadConfig {
    /// Bin width in device units (default 2.0).
    pub bin_width: f64,
    /// Bin height in device units (default 2.0).
    pub bin_height: f64,
    /// Fraction of bin capacity units may fill (default 1.0).
    pub target_utilization: f64,
    /// A bin overflows when utilization exceeds `1 + overflow_tolerance` (default 0.05).
    pub overflow_tolerance: f64,
    /// Maximum spreading loops per call (default 1000).
    pub max_loops: u32,
    /// Window of loops over which improvement is measured (default 20).
    pub stall_window: u32,
    /// Minimum relative overflow improvement across the window (default 0.01).
    pub stall_improvement: f64,
    /// Shrink-ratio decrement for persistently overflowing bins (default 0.015).
    pub shrink_step: f64,
    /// Lowest shrink ratio a bin may reach (default 0.8).
    pub shrink_floor: f64,
    /// Overflowing passes before a bin starts shrinking (default 5).
    pub overflow_strikes: u32,
    /// Clean passes before a bin's shrink ratio resets (default 5).
    pub clean_strikes: u32,
    /// Loops after which all bin counters reset (default 20).
    pub counter_reset: u32,
    /// Consecutive clean calls before a grid is skipped (default 3).
    pub stable_passes: u32,
}

impl Default for SpreadConfig {
    fn default() -> Self {
        Self {
            bin_width: 2.0,
            bin_height: 2.0,
            target_utilization: 1.0,
            overflow_tolerance: 0.05,
            max_loops: 1000,
            stall_window: 20,
            stall_improvement: 0.01,
            shrink_step: 0.015,
            shrink_floor: 0.8,
            overflow_strikes: 5,
            clean_strikes: 5,
            counter_reset: 20,
            stable_passes: 3,
        }
    }
}

/// Legalization options shared by the macro and CLB legalizers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LegalizeConfig {
    /// Initial candidate search radius (default 4.0).
    pub initial_radius: f64,
    /// Radius multiplier per expansion (default 2.0).
    pub radius_growth: f64,
    /// Initial candidate sites per unit; doubles with each expansion (default 8).
    pub initial_candidates: usize,
    /// Expansions before an unmatched unit is reported (default 6).
    pub max_expansions: u32,
    /// LUT sites offered by one CLB site (default 8).
    pub clb_slots: u32,
    /// Flip-flop positions offered by one CLB site (default 16).
    pub clb_ff_slots: u32,
    /// Assign CLB units to columns and rebalance full columns before the
    /// final matching (default true).
    pub fixed_columns: bool,
    /// Run the dynamic-programming corridor refinement (default true).
    pub dp_refinement: bool,
}

impl Default for LegalizeConfig {
    fn default() -> Self {
        Self {
            initial_radius: 4.0,
            radius_growth: 2.0,
            initial_candidates: 8,
            max_expansions: 6,
            clb_slots: 8,
            clb_ff_slots: 16,
            fixed_columns: true,
            dp_refinement: true,
        }
    }
}

/// CLB packing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackingConfig {
    /// Clusters kept per site queue (default 10).
    pub pq_size: usize,
    /// Queue may extend to `pq_extend * pq_size` for near-ties (default 1.5).
    pub pq_extend: f64,
    /// Score ratio to the cutoff that counts as a near-tie (default 0.99).
    pub tie_ratio: f64,
    /// Initial neighbor radius around a site (default 1.0).
    pub initial_radius: f64,
    /// Neighbor radius growth step (default 1.0).
    pub radius_step: f64,
    /// Largest neighbor radius (default 3.0).
    pub max_radius: f64,
    /// Neighbor units considered per site (default 24).
    pub max_neighbors: usize,
    /// Iterations a queue top must persist before the site commits it (default 3).
    pub unchanged_threshold: u32,
    /// Packing iteration cap (default 60).
    pub max_iterations: u32,
    /// Top clusters extended per update step (default 3).
    pub grow_width: usize,
    /// Search radius for re-placing ripped-up units (default 12.0).
    pub rip_up_radius: f64,
    /// Score weight on pin count (default 0.45).
    pub cell_weight: f64,
    /// Score weight on net connectivity (default 1.0).
    pub connectivity_weight: f64,
    /// Score weight on HPWL increase (default 0.01).
    pub hpwl_weight: f64,
    /// Nets touching more units than this are ignored when scoring (default 64).
    pub large_net: usize,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            pq_size: 10,
            pq_extend: 1.5,
            tie_ratio: 0.99,
            initial_radius: 1.0,
            radius_step: 1.0,
            max_radius: 3.0,
            max_neighbors: 24,
            unchanged_threshold: 3,
            max_iterations: 60,
            grow_width: 3,
            rip_up_radius: 12.0,
            cell_weight: 0.45,
            connectivity_weight: 1.0,
            hpwl_weight: 0.01,
            large_net: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = PlacerConfig::default();
        assert_eq!(config.global.qp_passes, 2);
        assert!(config.global.fast_growth_limit > config.global.initial_pseudo_net_weight);
        assert!(config.packing.max_radius >= config.packing.initial_radius);
        assert!(config.spread.shrink_floor < 1.0);
    }

    #[test]
    fn empty_toml_is_default() {
        let config: PlacerConfig = toml::from_str("").unwrap();
        assert_eq!(config, PlacerConfig::default());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: PlacerConfig = toml::from_str("[spread]\nbin_width = 4.0\n").unwrap();
        assert_eq!(config.spread.bin_width, 4.0);
        assert_eq!(config.spread.bin_height, 2.0);
        assert_eq!(config.legalize, LegalizeConfig::default());
    }

    #[test]
    fn unknown_option_rejected() {
        let result: Result<PlacerConfig, _> = toml::from_str("[global]\nmax_iter = 3\n");
        assert!(result.is_err());
    }
}
