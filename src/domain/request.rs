use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Result, SchedulerError};

/// Optimization model variants. Each variant is a strict extension of the
/// previous one; every build constructs its model from scratch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum ModelType {
    /// Base model: day-ahead + aFRR energy + capacity markets.
    #[serde(rename = "I")]
    #[strum(serialize = "I")]
    I,
    /// Model I plus cyclic aging (stacked-tank segments, LIFO).
    #[serde(rename = "II")]
    #[strum(serialize = "II")]
    II,
    /// Model II plus calendar aging (SOS2 interpolation).
    #[serde(rename = "III")]
    #[strum(serialize = "III")]
    III,
    /// Model III plus co-located renewable dispatch.
    #[serde(rename = "III-renew")]
    #[strum(serialize = "III-renew")]
    IIIRenew,
}

impl ModelType {
    /// Segmented SOC (stacked tank) is part of Models II and up.
    pub fn has_segments(&self) -> bool {
        !matches!(self, ModelType::I)
    }

    /// Calendar aging is part of Models III and up.
    pub fn has_calendar(&self) -> bool {
        matches!(self, ModelType::III | ModelType::IIIRenew)
    }

    /// Renewable dispatch only exists in Model III-renew.
    pub fn has_renewable(&self) -> bool {
        matches!(self, ModelType::IIIRenew)
    }
}

/// Market price bundle, as delivered by the upstream price services.
///
/// 15-minute series carry 4 entries per horizon hour; block series carry one
/// entry per (possibly partial) 4-hour block. Capacity prices are EUR/MW per
/// block, energy prices EUR/MWh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPrices {
    pub day_ahead: Vec<f64>,

    /// aFRR energy prices; `null` entries and exact zeros both mean "market
    /// not activated in this step" and are normalized to NaN by the adapter.
    #[serde(deserialize_with = "nullable_series")]
    pub afrr_energy_pos: Vec<f64>,
    #[serde(deserialize_with = "nullable_series")]
    pub afrr_energy_neg: Vec<f64>,

    pub fcr: Vec<f64>,
    pub afrr_capacity_pos: Vec<f64>,
    pub afrr_capacity_neg: Vec<f64>,
}

/// A complete optimization request, as accepted from any upstream caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequest {
    #[serde(default = "default_model_type")]
    pub model_type: ModelType,

    pub horizon_hours: u32,

    #[serde(default = "default_c_rate")]
    pub c_rate: f64,

    /// Degradation cost weight in the objective.
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Start of the planning horizon. Defaults to 2024-01-01T00:00:00Z when
    /// the caller supplies price series without timestamps.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    pub market_prices: MarketPrices,

    /// Combined PV + wind forecast (kW, 15-min). Enables Model III-renew.
    #[serde(default)]
    pub renewable_generation_kw: Option<Vec<f64>>,
}

fn default_model_type() -> ModelType {
    ModelType::III
}
fn default_c_rate() -> f64 {
    0.5
}
fn default_alpha() -> f64 {
    1.0
}

impl OptimizationRequest {
    /// Scalar sanity checks. Array lengths are validated by the adapter
    /// against the time grid.
    pub fn validate(&self) -> Result<()> {
        if self.horizon_hours == 0 {
            return Err(SchedulerError::invalid_input("horizon_hours must be positive"));
        }
        if self.alpha < 0.0 {
            return Err(SchedulerError::invalid_input(format!(
                "alpha must be non-negative, got {}",
                self.alpha
            )));
        }
        if self.model_type.has_renewable() && self.renewable_generation_kw.is_none() {
            return Err(SchedulerError::invalid_input(
                "model III-renew requires a renewable generation forecast",
            ));
        }
        Ok(())
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time.unwrap_or_else(|| {
            chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 1, 1, 0, 0, 0).unwrap()
        })
    }
}

/// Accept `null` entries in a price series and carry them as NaN, so they
/// survive deserialization and flow through the zero-means-inactive rule.
fn nullable_series<'de, D>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn minimal_request(horizon_hours: u32) -> OptimizationRequest {
        let steps = (horizon_hours * 4) as usize;
        let blocks = (horizon_hours as usize).div_ceil(4);
        OptimizationRequest {
            model_type: ModelType::I,
            horizon_hours,
            c_rate: 0.5,
            alpha: 0.0,
            start_time: None,
            market_prices: MarketPrices {
                day_ahead: vec![50.0; steps],
                afrr_energy_pos: vec![0.0; steps],
                afrr_energy_neg: vec![0.0; steps],
                fcr: vec![0.0; blocks],
                afrr_capacity_pos: vec![0.0; blocks],
                afrr_capacity_neg: vec![0.0; blocks],
            },
            renewable_generation_kw: None,
        }
    }

    #[test]
    fn test_model_type_round_trip() {
        for (s, expected) in [
            ("I", ModelType::I),
            ("II", ModelType::II),
            ("III", ModelType::III),
            ("III-renew", ModelType::IIIRenew),
        ] {
            assert_eq!(ModelType::from_str(s).unwrap(), expected);
            assert_eq!(expected.to_string(), s);

            let json = format!("\"{s}\"");
            let parsed: ModelType = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn test_negative_alpha_rejected() {
        let mut request = minimal_request(24);
        request.alpha = -0.1;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_renew_without_forecast_rejected() {
        let mut request = minimal_request(24);
        request.model_type = ModelType::IIIRenew;
        assert!(request.validate().is_err());

        request.renewable_generation_kw = Some(vec![0.0; 96]);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_null_afrr_prices_become_nan() {
        let json = r#"{
            "day_ahead": [10.0, 20.0],
            "afrr_energy_pos": [null, 35.0],
            "afrr_energy_neg": [40.0, null],
            "fcr": [100.0],
            "afrr_capacity_pos": [5.0],
            "afrr_capacity_neg": [5.0]
        }"#;
        let prices: MarketPrices = serde_json::from_str(json).unwrap();
        assert!(prices.afrr_energy_pos[0].is_nan());
        assert_eq!(prices.afrr_energy_pos[1], 35.0);
        assert!(prices.afrr_energy_neg[1].is_nan());
    }
}
