//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::PlacerConfig;
use std::path::Path;

/// Loads and validates a placer configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<PlacerConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parses and validates a placer configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<PlacerConfig, ConfigError> {
    let config: PlacerConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks that every option is inside its meaningful range.
pub fn validate_config(config: &PlacerConfig) -> Result<(), ConfigError> {
    let g = &config.global;
    if g.max_iterations == 0 {
        return Err(ConfigError::invalid("global.max_iterations", "must be positive"));
    }
    if let Some(secs) = g.time_budget_secs {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigError::invalid("global.time_budget_secs", "must be positive"));
        }
    }
    if g.threads == Some(0) {
        return Err(ConfigError::invalid("global.threads", "must be at least 1"));
    }
    if g.qp_passes == 0 {
        return Err(ConfigError::invalid("global.qp_passes", "must be positive"));
    }
    positive("global.initial_pseudo_net_weight", g.initial_pseudo_net_weight)?;
    at_least_one("global.fast_growth", g.fast_growth)?;
    at_least_one("global.early_growth", g.early_growth)?;
    at_least_one("global.late_growth", g.late_growth)?;
    non_negative("global.overflow_threshold", g.overflow_threshold)?;
    unit_interval("global.displacement_tolerance", g.displacement_tolerance)?;
    unit_interval("global.hpwl_tolerance", g.hpwl_tolerance)?;
    if g.hpwl_window < 2 {
        return Err(ConfigError::invalid("global.hpwl_window", "must be at least 2"));
    }

    let w = &config.wirelength;
    positive("wirelength.min_distance", w.min_distance)?;
    positive("wirelength.y2x_ratio", w.y2x_ratio)?;
    positive("wirelength.solver_tolerance", w.solver_tolerance)?;
    non_negative("wirelength.legal_pseudo_net_factor", w.legal_pseudo_net_factor)?;
    if w.ignore_net_degree < 2 {
        return Err(ConfigError::invalid("wirelength.ignore_net_degree", "must be at least 2"));
    }
    if w.solver_max_iterations == 0 {
        return Err(ConfigError::invalid(
            "wirelength.solver_max_iterations",
            "must be positive",
        ));
    }

    let s = &config.spread;
    positive("spread.bin_width", s.bin_width)?;
    positive("spread.bin_height", s.bin_height)?;
    unit_interval("spread.target_utilization", s.target_utilization)?;
    non_negative("spread.overflow_tolerance", s.overflow_tolerance)?;
    unit_interval("spread.shrink_floor", s.shrink_floor)?;
    non_negative("spread.shrink_step", s.shrink_step)?;
    if s.max_loops == 0 {
        return Err(ConfigError::invalid("spread.max_loops", "must be positive"));
    }
    if s.stall_window == 0 {
        return Err(ConfigError::invalid("spread.stall_window", "must be positive"));
    }

    let l = &config.legalize;
    positive("legalize.initial_radius", l.initial_radius)?;
    at_least_one("legalize.radius_growth", l.radius_growth)?;
    if l.initial_candidates == 0 {
        return Err(ConfigError::invalid("legalize.initial_candidates", "must be positive"));
    }
    if l.clb_slots == 0 {
        return Err(ConfigError::invalid("legalize.clb_slots", "must be positive"));
    }
    if l.clb_ff_slots == 0 {
        return Err(ConfigError::invalid("legalize.clb_ff_slots", "must be positive"));
    }

    let p = &config.packing;
    if p.pq_size == 0 {
        return Err(ConfigError::invalid("packing.pq_size", "must be positive"));
    }
    at_least_one("packing.pq_extend", p.pq_extend)?;
    unit_interval("packing.tie_ratio", p.tie_ratio)?;
    positive("packing.initial_radius", p.initial_radius)?;
    positive("packing.radius_step", p.radius_step)?;
    if p.max_radius < p.initial_radius {
        return Err(ConfigError::invalid(
            "packing.max_radius",
            "must not be below packing.initial_radius",
        ));
    }
    if p.rip_up_radius < p.max_radius {
        return Err(ConfigError::invalid(
            "packing.rip_up_radius",
            "must not be below packing.max_radius",
        ));
    }
    if p.grow_width == 0 {
        return Err(ConfigError::invalid("packing.grow_width", "must be positive"));
    }
    if p.large_net < 2 {
        return Err(ConfigError::invalid("packing.large_net", "must be at least 2"));
    }
    Ok(())
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive, got {value}")))
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must not be negative, got {value}")))
    }
}

fn at_least_one(field: &str, value: f64) -> Result<(), ConfigError> {
    if value >= 1.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be at least 1, got {value}")))
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be in (0, 1], got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config, PlacerConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[global]
max_iterations = 50
time_budget_secs = 30.0
threads = 4
seed = 7
overflow_threshold = 0.15

[wirelength]
min_distance = 0.25
y2x_ratio = 0.8

[spread]
bin_width = 3.0
bin_height = 6.0
target_utilization = 0.9

[legalize]
initial_radius = 2.0
max_expansions = 3

[packing]
pq_size = 6
unchanged_threshold = 2
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.global.max_iterations, 50);
        assert_eq!(config.global.threads, Some(4));
        assert_eq!(config.global.time_budget_secs, Some(30.0));
        assert_eq!(config.wirelength.y2x_ratio, 0.8);
        assert_eq!(config.spread.bin_height, 6.0);
        assert_eq!(config.legalize.max_expansions, 3);
        assert_eq!(config.packing.pq_size, 6);
        assert_eq!(config.packing.hpwl_weight, 0.01);
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn zero_threads_rejected() {
        let err = load_config_from_str("[global]\nthreads = 0\n").unwrap_err();
        match err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "global.threads"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn utilization_above_one_rejected() {
        let err = load_config_from_str("[spread]\ntarget_utilization = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn shrinking_growth_rejected() {
        let err = load_config_from_str("[legalize]\nradius_growth = 0.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn slice_sides_default_and_validate() {
        let config = load_config_from_str("[legalize]\nfixed_columns = false\n").unwrap();
        assert_eq!((config.legalize.clb_slots, config.legalize.clb_ff_slots), (8, 16));
        assert!(!config.legalize.fixed_columns);
        let err = load_config_from_str("[legalize]\nclb_ff_slots = 0\n").unwrap_err();
        assert!(format!("{err}").contains("legalize.clb_ff_slots"));
    }

    #[test]
    fn rip_up_radius_must_cover_neighbors() {
        let toml = "[packing]\nmax_radius = 5.0\nrip_up_radius = 4.0\n";
        let err = load_config_from_str(toml).unwrap_err();
        assert!(format!("{err}").contains("packing.rip_up_radius"));
    }

    #[test]
    fn load_from_missing_file() {
        let err = load_config(Path::new("/nonexistent/tessera.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
