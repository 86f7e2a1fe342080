use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub battery: BatteryConfig,

    #[serde(default)]
    #[validate(nested)]
    pub degradation: DegradationConfig,

    #[serde(default)]
    #[validate(nested)]
    pub solver: SolverConfig,

    #[serde(default)]
    #[validate(nested)]
    pub afrr_weighting: AfrrWeightingConfig,

    #[serde(default)]
    #[validate(nested)]
    pub mpc: MpcConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            battery: BatteryConfig::default(),
            degradation: DegradationConfig::default(),
            solver: SolverConfig::default(),
            afrr_weighting: AfrrWeightingConfig::default(),
            mpc: MpcConfig::default(),
        }
    }
}

/// Battery configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_battery_config"))]
pub struct BatteryConfig {
    #[serde(default = "default_capacity_kwh")]
    #[validate(range(min = 0.1, max = 1000000.0))]
    pub capacity_kwh: f64,

    /// Initial state of charge as a fraction of capacity.
    #[serde(default = "default_initial_soc")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub initial_soc: f64,

    /// Round-trip efficiency; each direction uses its square root.
    #[serde(default = "default_round_trip_efficiency")]
    #[validate(range(min = 0.5, max = 1.0))]
    pub round_trip_efficiency: f64,

    #[serde(default = "default_soc_min")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub soc_min: f64,

    #[serde(default = "default_soc_max")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub soc_max: f64,

    /// Daily discharge-throughput cap in equivalent full cycles.
    /// Only enforced by the base model; the segmented models price
    /// cycling through the cyclic aging cost instead.
    #[serde(default = "default_daily_cycle_limit")]
    pub daily_cycle_limit: Option<f64>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: default_capacity_kwh(),
            initial_soc: default_initial_soc(),
            round_trip_efficiency: default_round_trip_efficiency(),
            soc_min: default_soc_min(),
            soc_max: default_soc_max(),
            daily_cycle_limit: default_daily_cycle_limit(),
        }
    }
}

/// Custom validation for BatteryConfig
fn validate_battery_config(config: &BatteryConfig) -> std::result::Result<(), validator::ValidationError> {
    if config.soc_min >= config.soc_max {
        return Err(validator::ValidationError::new(
            "soc_min must be less than soc_max",
        ));
    }

    if config.initial_soc < config.soc_min || config.initial_soc > config.soc_max {
        return Err(validator::ValidationError::new(
            "initial_soc must be between soc_min and soc_max",
        ));
    }

    if let Some(cycles) = config.daily_cycle_limit {
        if cycles <= 0.0 {
            return Err(validator::ValidationError::new(
                "daily_cycle_limit must be positive when set",
            ));
        }
    }

    Ok(())
}

/// A calendar-aging breakpoint expressed as a fraction of capacity.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CalendarPoint {
    pub soc_fraction: f64,
    pub cost_eur_per_hour: f64,
}

/// Degradation model configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DegradationConfig {
    /// Marginal cyclic cost per segment (EUR/kWh of discharge throughput),
    /// shallowest segment first.
    #[serde(default = "default_segment_costs")]
    #[validate(length(min = 1))]
    pub segment_costs_eur_per_kwh: Vec<f64>,

    /// Calendar-aging breakpoints as (SOC fraction, EUR/h) pairs.
    #[serde(default = "default_calendar_breakpoints")]
    #[validate(length(min = 2))]
    pub calendar_breakpoints: Vec<CalendarPoint>,

    /// Slack on "previous segment full" in the LIFO fullness constraint.
    /// A tractability knob, not a physical quantity.
    #[serde(default = "default_lifo_epsilon_kwh")]
    #[validate(range(min = 0.0, max = 1000.0))]
    pub lifo_epsilon_kwh: f64,

    /// Tie per-segment power to segment activation binaries. Tightens the
    /// filling discipline at a large solve-time cost; off by default.
    #[serde(default)]
    pub require_sequential_segment_activation: bool,

    /// Cap on total ancillary-service capacity reservation as a fraction of
    /// rated power. A value of 1.0 disables the cap.
    #[serde(default = "default_max_as_ratio")]
    #[validate(range(min = 0.05, max = 1.0))]
    pub max_as_ratio: f64,

    /// Assumed reserve activation duration used in the energy reserve
    /// constraints (hours).
    #[serde(default = "default_reserve_duration_hours")]
    #[validate(range(min = 0.0, max = 4.0))]
    pub reserve_duration_hours: f64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            segment_costs_eur_per_kwh: default_segment_costs(),
            calendar_breakpoints: default_calendar_breakpoints(),
            lifo_epsilon_kwh: default_lifo_epsilon_kwh(),
            require_sequential_segment_activation: false,
            max_as_ratio: default_max_as_ratio(),
            reserve_duration_hours: default_reserve_duration_hours(),
        }
    }
}

/// MILP backend configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SolverConfig {
    /// Explicit backend override ("cbc" or "highs"). When unset, the driver
    /// prefers HiGHS if compiled in and falls back to CBC.
    #[serde(default)]
    pub backend: Option<String>,

    #[serde(default = "default_time_limit_secs")]
    #[validate(range(min = 1, max = 86400))]
    pub time_limit_secs: u64,

    #[serde(default = "default_mip_rel_gap")]
    #[validate(range(min = 0.0, max = 0.5))]
    pub mip_rel_gap: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: None,
            time_limit_secs: default_time_limit_secs(),
            mip_rel_gap: default_mip_rel_gap(),
        }
    }
}

/// Activation probabilities for one market area.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ActivationRates {
    pub positive: f64,
    pub negative: f64,
}

/// Expected-value weighting of aFRR energy revenue.
///
/// When disabled, activation weights are 1.0 (deterministic: every accepted
/// bid is assumed fully activated). When enabled, the configured activation
/// rates discount the expected revenue instead.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AfrrWeightingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Market area whose rates apply, e.g. "DE". Falls back to the default
    /// rates when unset or unknown.
    #[serde(default)]
    pub country: Option<String>,

    #[serde(default = "default_activation_rate")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub default_positive: f64,

    #[serde(default = "default_activation_rate")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub default_negative: f64,

    #[serde(default)]
    pub country_rates: HashMap<String, ActivationRates>,
}

impl Default for AfrrWeightingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            country: None,
            default_positive: default_activation_rate(),
            default_negative: default_activation_rate(),
            country_rates: HashMap::new(),
        }
    }
}

impl AfrrWeightingConfig {
    /// Effective (positive, negative) activation weights.
    pub fn effective_rates(&self) -> (f64, f64) {
        if !self.enabled {
            return (1.0, 1.0);
        }
        if let Some(country) = &self.country {
            if let Some(rates) = self.country_rates.get(country) {
                return (rates.positive, rates.negative);
            }
        }
        (self.default_positive, self.default_negative)
    }
}

/// Rolling-horizon (MPC) configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MpcConfig {
    /// Optimization window per iteration (hours).
    #[serde(default = "default_mpc_horizon_hours")]
    #[validate(range(min = 4, max = 48))]
    pub horizon_hours: u32,

    /// Committed window per iteration (hours).
    #[serde(default = "default_mpc_execution_hours")]
    #[validate(range(min = 1, max = 48))]
    pub execution_hours: u32,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            horizon_hours: default_mpc_horizon_hours(),
            execution_hours: default_mpc_execution_hours(),
        }
    }
}

// Default value functions
fn default_capacity_kwh() -> f64 { 4472.0 }
fn default_initial_soc() -> f64 { 0.5 }
fn default_round_trip_efficiency() -> f64 { 0.95 }
fn default_soc_min() -> f64 { 0.0 }
fn default_soc_max() -> f64 { 1.0 }
fn default_daily_cycle_limit() -> Option<f64> { Some(1.0) }
fn default_segment_costs() -> Vec<f64> { vec![0.02, 0.05, 0.10, 0.20] }
fn default_calendar_breakpoints() -> Vec<CalendarPoint> {
    vec![
        CalendarPoint { soc_fraction: 0.0, cost_eur_per_hour: 0.0 },
        CalendarPoint { soc_fraction: 0.5, cost_eur_per_hour: 0.01 },
        CalendarPoint { soc_fraction: 1.0, cost_eur_per_hour: 0.05 },
    ]
}
fn default_lifo_epsilon_kwh() -> f64 { 5.0 }
fn default_max_as_ratio() -> f64 { 0.8 }
fn default_reserve_duration_hours() -> f64 { 0.25 }
fn default_time_limit_secs() -> u64 { 1200 }
fn default_mip_rel_gap() -> f64 { 0.01 }
fn default_activation_rate() -> f64 { 0.30 }
fn default_mpc_horizon_hours() -> u32 { 6 }
fn default_mpc_execution_hours() -> u32 { 4 }

impl AppConfig {
    /// Load configuration from TOML files and environment variables
    ///
    /// Configuration is loaded in this order (later overrides earlier):
    /// 1. config/default.toml (base configuration)
    /// 2. Environment variables with BESS__ prefix
    pub fn load() -> Result<Self> {
        Self::load_from("config/default.toml")
    }

    /// Load configuration with an explicit base file path.
    pub fn load_from(path: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("BESS__").split("__"));

        let config: AppConfig = figment
            .extract()
            .context("Failed to parse configuration")?;

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.battery.capacity_kwh, 4472.0);
        assert_eq!(config.degradation.segment_costs_eur_per_kwh.len(), 4);
        assert_eq!(config.solver.time_limit_secs, 1200);
        assert_eq!(config.mpc.horizon_hours, 6);
        assert_eq!(config.mpc.execution_hours, 4);
    }

    #[test]
    fn test_battery_config_invalid_soc_window() {
        let config = BatteryConfig {
            soc_min: 0.9,
            soc_max: 0.1,
            ..BatteryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_battery_config_initial_soc_outside_window() {
        let config = BatteryConfig {
            soc_min: 0.2,
            soc_max: 0.8,
            initial_soc: 0.9,
            ..BatteryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_afrr_weights_deterministic_by_default() {
        let config = AfrrWeightingConfig::default();
        assert_eq!(config.effective_rates(), (1.0, 1.0));
    }

    #[test]
    fn test_afrr_weights_country_override() {
        let mut config = AfrrWeightingConfig {
            enabled: true,
            country: Some("AT".to_string()),
            ..AfrrWeightingConfig::default()
        };
        config.country_rates.insert(
            "AT".to_string(),
            ActivationRates { positive: 0.45, negative: 0.25 },
        );

        assert_eq!(config.effective_rates(), (0.45, 0.25));

        // Unknown country falls back to the defaults.
        config.country = Some("CH".to_string());
        assert_eq!(config.effective_rates(), (0.30, 0.30));
    }
}
