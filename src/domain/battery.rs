use serde::{Deserialize, Serialize};

use crate::config::BatteryConfig;
use crate::error::{Result, SchedulerError};

/// Effective physical parameters of the battery for one solve.
///
/// Resolved from the static [`BatteryConfig`] and the requested c-rate.
/// Power is the product of c-rate and capacity; the per-direction
/// efficiencies are the square root of the configured round-trip value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryParams {
    /// Nominal energy capacity E_nom (kWh).
    pub capacity_kwh: f64,
    /// Rated power P_max = c_rate * E_nom (kW).
    pub power_kw: f64,
    pub eta_charge: f64,
    pub eta_discharge: f64,
    /// SOC envelope as fractions of capacity.
    pub soc_min: f64,
    pub soc_max: f64,
    /// Initial stored energy (kWh).
    pub initial_energy_kwh: f64,
    /// Optional daily discharge-throughput cap in equivalent full cycles.
    pub daily_cycle_limit: Option<f64>,
}

impl BatteryParams {
    pub fn resolve(config: &BatteryConfig, c_rate: f64) -> Result<Self> {
        if !(c_rate > 0.0) {
            return Err(SchedulerError::invalid_input(format!(
                "c_rate must be positive, got {c_rate}"
            )));
        }
        if c_rate > 2.0 {
            return Err(SchedulerError::invalid_input(format!(
                "c_rate {c_rate} exceeds the supported maximum of 2.0"
            )));
        }

        let eta = config.round_trip_efficiency.sqrt();

        Ok(Self {
            capacity_kwh: config.capacity_kwh,
            power_kw: c_rate * config.capacity_kwh,
            eta_charge: eta,
            eta_discharge: eta,
            soc_min: config.soc_min,
            soc_max: config.soc_max,
            initial_energy_kwh: config.initial_soc * config.capacity_kwh,
            daily_cycle_limit: config.daily_cycle_limit,
        })
    }

    /// Resolve with an overridden initial SOC fraction (used by the MPC
    /// driver to chain state between iterations).
    pub fn resolve_with_initial_soc(
        config: &BatteryConfig,
        c_rate: f64,
        initial_soc: f64,
    ) -> Result<Self> {
        let mut params = Self::resolve(config, c_rate)?;
        params.initial_energy_kwh = initial_soc.clamp(config.soc_min, config.soc_max)
            * config.capacity_kwh;
        Ok(params)
    }

    /// Lower SOC bound in kWh.
    pub fn soc_min_kwh(&self) -> f64 {
        self.soc_min * self.capacity_kwh
    }

    /// Upper SOC bound in kWh.
    pub fn soc_max_kwh(&self) -> f64 {
        self.soc_max * self.capacity_kwh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.25, 1118.0)]
    #[case(0.5, 2236.0)]
    fn test_power_scales_with_c_rate(#[case] c_rate: f64, #[case] expected_kw: f64) {
        let params = BatteryParams::resolve(&BatteryConfig::default(), c_rate).unwrap();
        assert!((params.power_kw - expected_kw).abs() < 1e-9);
    }

    #[test]
    fn test_efficiency_is_square_root_of_round_trip() {
        let params = BatteryParams::resolve(&BatteryConfig::default(), 0.5).unwrap();
        assert!((params.eta_charge * params.eta_discharge - 0.95).abs() < 1e-12);
        assert_eq!(params.eta_charge, params.eta_discharge);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-0.5)]
    #[case(2.5)]
    fn test_invalid_c_rate_rejected(#[case] c_rate: f64) {
        assert!(BatteryParams::resolve(&BatteryConfig::default(), c_rate).is_err());
    }

    #[test]
    fn test_initial_soc_override_clamps_to_envelope() {
        let config = BatteryConfig {
            soc_min: 0.1,
            soc_max: 0.9,
            initial_soc: 0.5,
            ..BatteryConfig::default()
        };
        let params = BatteryParams::resolve_with_initial_soc(&config, 0.5, 0.95).unwrap();
        assert!((params.initial_energy_kwh - 0.9 * config.capacity_kwh).abs() < 1e-9);
    }
}
