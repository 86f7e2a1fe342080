use crate::config::AfrrWeightingConfig;
use crate::domain::MarketPrices;
use crate::error::{Result, SchedulerError};
use crate::timegrid::TimeGrid;

/// The canonical per-timestep table consumed by the model builder.
///
/// 15-minute series are indexed by step, capacity prices by block id. The
/// table is immutable once emitted; all preprocessing (zero-means-inactive,
/// activation weights, renewable gating) happens here and nowhere else.
#[derive(Debug, Clone)]
pub struct TimeSeriesTable {
    pub grid: TimeGrid,

    /// Day-ahead price (EUR/MWh, 15-min).
    pub price_day_ahead: Vec<f64>,
    /// aFRR energy prices (EUR/MWh, 15-min); NaN means the market was not
    /// activated in that step.
    pub price_afrr_energy_pos: Vec<f64>,
    pub price_afrr_energy_neg: Vec<f64>,

    /// Capacity prices (EUR/MW per 4-hour block), indexed by block id.
    pub price_fcr: Vec<f64>,
    pub price_afrr_cap_pos: Vec<f64>,
    pub price_afrr_cap_neg: Vec<f64>,

    /// aFRR activation-probability weights in [0, 1].
    pub w_afrr_pos: Vec<f64>,
    pub w_afrr_neg: Vec<f64>,

    /// Renewable forecast (kW, 15-min) when the III-renew path is enabled.
    pub renewable_kw: Option<Vec<f64>>,
}

impl TimeSeriesTable {
    pub fn num_steps(&self) -> usize {
        self.grid.num_steps()
    }

    pub fn num_blocks(&self) -> usize {
        self.grid.num_blocks()
    }

    /// Forward-fill a block price series onto the 15-minute grid. Only used
    /// for diagnostics; the MILP indexes block prices by block id.
    pub fn expand_block_prices(&self, block_prices: &[f64]) -> Vec<f64> {
        (0..self.num_steps())
            .map(|t| block_prices[self.grid.block_of(t)])
            .collect()
    }
}

/// Normalizes raw market bundles and the optional renewable forecast into a
/// [`TimeSeriesTable`].
pub struct InputAdapter<'a> {
    weighting: &'a AfrrWeightingConfig,
}

impl<'a> InputAdapter<'a> {
    pub fn new(weighting: &'a AfrrWeightingConfig) -> Self {
        Self { weighting }
    }

    pub fn adapt(
        &self,
        grid: TimeGrid,
        prices: &MarketPrices,
        renewable_kw: Option<&[f64]>,
    ) -> Result<TimeSeriesTable> {
        let steps = grid.num_steps();
        let blocks = grid.num_blocks();

        let price_day_ahead =
            check_step_series("day_ahead", &prices.day_ahead, steps, true)?;
        let afrr_pos = check_step_series("afrr_energy_pos", &prices.afrr_energy_pos, steps, false)?;
        let afrr_neg = check_step_series("afrr_energy_neg", &prices.afrr_energy_neg, steps, false)?;

        let price_fcr = check_block_series("fcr", &prices.fcr, blocks)?;
        let price_afrr_cap_pos =
            check_block_series("afrr_capacity_pos", &prices.afrr_capacity_pos, blocks)?;
        let price_afrr_cap_neg =
            check_block_series("afrr_capacity_neg", &prices.afrr_capacity_neg, blocks)?;

        // An aFRR energy price of exactly 0 encodes "market not activated",
        // not "free energy". Convert to NaN here, at the single point every
        // data path passes through, so the builder can force those bids to
        // zero instead of manufacturing arbitrage out of a zero price.
        let price_afrr_energy_pos = zeros_to_nan(afrr_pos);
        let price_afrr_energy_neg = zeros_to_nan(afrr_neg);

        let (w_pos, w_neg) = self.weighting.effective_rates();
        tracing::debug!(w_pos, w_neg, "aFRR activation weights");

        let renewable_kw = match renewable_kw {
            Some(series) => adapt_renewable(series, steps)?,
            None => None,
        };

        let table = TimeSeriesTable {
            grid,
            price_day_ahead,
            price_afrr_energy_pos,
            price_afrr_energy_neg,
            price_fcr,
            price_afrr_cap_pos,
            price_afrr_cap_neg,
            w_afrr_pos: vec![w_pos; steps],
            w_afrr_neg: vec![w_neg; steps],
            renewable_kw,
        };

        log_table_summary(&table);
        Ok(table)
    }
}

fn check_step_series(
    name: &str,
    series: &[f64],
    expected: usize,
    require_finite: bool,
) -> Result<Vec<f64>> {
    if series.len() != expected {
        return Err(SchedulerError::invalid_input(format!(
            "{name} has {} entries, expected {expected} (15-min resolution)",
            series.len()
        )));
    }
    if require_finite {
        if let Some(pos) = series.iter().position(|v| !v.is_finite()) {
            return Err(SchedulerError::invalid_input(format!(
                "{name}[{pos}] is not a finite price"
            )));
        }
    }
    warn_on_negative(name, series);
    Ok(series.to_vec())
}

fn check_block_series(name: &str, series: &[f64], expected: usize) -> Result<Vec<f64>> {
    if series.is_empty() {
        return Err(SchedulerError::invalid_input(format!(
            "{name} block price series is empty"
        )));
    }
    if series.len() != expected {
        return Err(SchedulerError::invalid_input(format!(
            "{name} has {} entries, expected {expected} blocks",
            series.len()
        )));
    }
    if let Some(pos) = series.iter().position(|v| !v.is_finite()) {
        return Err(SchedulerError::invalid_input(format!(
            "{name}[{pos}] is not a finite price"
        )));
    }
    warn_on_negative(name, series);
    Ok(series.to_vec())
}

fn warn_on_negative(name: &str, series: &[f64]) {
    // Negative prices are legitimate in these markets; note them but carry on.
    let negative = series.iter().filter(|v| **v < 0.0).count();
    if negative > 0 {
        tracing::warn!(series = name, count = negative, "negative prices in input");
    }
}

fn zeros_to_nan(series: Vec<f64>) -> Vec<f64> {
    series
        .into_iter()
        .map(|v| if v == 0.0 { f64::NAN } else { v })
        .collect()
}

/// A forecast that is missing or all-NaN disables the renewable path.
fn adapt_renewable(series: &[f64], expected: usize) -> Result<Option<Vec<f64>>> {
    if series.len() != expected {
        return Err(SchedulerError::invalid_input(format!(
            "renewable_generation_kw has {} entries, expected {expected}",
            series.len()
        )));
    }
    if series.iter().all(|v| v.is_nan()) {
        tracing::warn!("renewable forecast is all-NaN; disabling renewable dispatch");
        return Ok(None);
    }
    if let Some(pos) = series.iter().position(|v| *v < 0.0) {
        return Err(SchedulerError::invalid_input(format!(
            "renewable_generation_kw[{pos}] is negative"
        )));
    }

    // Isolated gaps in the forecast count as zero generation.
    let cleaned: Vec<f64> = series.iter().map(|v| if v.is_nan() { 0.0 } else { *v }).collect();
    Ok(Some(cleaned))
}

fn log_table_summary(table: &TimeSeriesTable) {
    let inactive_pos = table.price_afrr_energy_pos.iter().filter(|v| v.is_nan()).count();
    let inactive_neg = table.price_afrr_energy_neg.iter().filter(|v| v.is_nan()).count();
    tracing::info!(
        steps = table.num_steps(),
        blocks = table.num_blocks(),
        inactive_afrr_pos = inactive_pos,
        inactive_afrr_neg = inactive_neg,
        renewable = table.renewable_kw.is_some(),
        "adapted market table"
    );
    if tracing::enabled!(tracing::Level::DEBUG) {
        let fcr_15min = table.expand_block_prices(&table.price_fcr);
        let mean = fcr_15min.iter().sum::<f64>() / fcr_15min.len().max(1) as f64;
        tracing::debug!(mean_fcr_eur_mw = mean, "forward-filled FCR price diagnostic");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AfrrWeightingConfig;
    use chrono::TimeZone;
    use chrono::Utc;

    fn grid_24h() -> TimeGrid {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TimeGrid::build(start, 24).unwrap()
    }

    fn prices_24h() -> MarketPrices {
        MarketPrices {
            day_ahead: vec![50.0; 96],
            afrr_energy_pos: vec![40.0; 96],
            afrr_energy_neg: vec![0.0; 96],
            fcr: vec![100.0; 6],
            afrr_capacity_pos: vec![5.0; 6],
            afrr_capacity_neg: vec![5.0; 6],
        }
    }

    #[test]
    fn test_zero_afrr_energy_becomes_nan() {
        let weighting = AfrrWeightingConfig::default();
        let adapter = InputAdapter::new(&weighting);
        let table = adapter.adapt(grid_24h(), &prices_24h(), None).unwrap();

        assert!(table.price_afrr_energy_neg.iter().all(|v| v.is_nan()));
        assert!(table.price_afrr_energy_pos.iter().all(|v| *v == 40.0));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let weighting = AfrrWeightingConfig::default();
        let adapter = InputAdapter::new(&weighting);

        let mut prices = prices_24h();
        prices.day_ahead.truncate(90);
        assert!(adapter.adapt(grid_24h(), &prices, None).is_err());

        let mut prices = prices_24h();
        prices.fcr = vec![100.0; 5];
        assert!(adapter.adapt(grid_24h(), &prices, None).is_err());
    }

    #[test]
    fn test_non_finite_day_ahead_rejected() {
        let weighting = AfrrWeightingConfig::default();
        let adapter = InputAdapter::new(&weighting);

        let mut prices = prices_24h();
        prices.day_ahead[10] = f64::NAN;
        assert!(adapter.adapt(grid_24h(), &prices, None).is_err());
    }

    #[test]
    fn test_deterministic_weights_default() {
        let weighting = AfrrWeightingConfig::default();
        let adapter = InputAdapter::new(&weighting);
        let table = adapter.adapt(grid_24h(), &prices_24h(), None).unwrap();

        assert!(table.w_afrr_pos.iter().all(|w| *w == 1.0));
        assert!(table.w_afrr_neg.iter().all(|w| *w == 1.0));
    }

    #[test]
    fn test_ev_weights_applied() {
        let weighting = AfrrWeightingConfig {
            enabled: true,
            ..AfrrWeightingConfig::default()
        };
        let adapter = InputAdapter::new(&weighting);
        let table = adapter.adapt(grid_24h(), &prices_24h(), None).unwrap();

        assert!(table.w_afrr_pos.iter().all(|w| *w == 0.30));
    }

    #[test]
    fn test_all_nan_renewable_disables_path() {
        let weighting = AfrrWeightingConfig::default();
        let adapter = InputAdapter::new(&weighting);
        let forecast = vec![f64::NAN; 96];
        let table = adapter.adapt(grid_24h(), &prices_24h(), Some(&forecast)).unwrap();
        assert!(table.renewable_kw.is_none());
    }

    #[test]
    fn test_renewable_gaps_become_zero() {
        let weighting = AfrrWeightingConfig::default();
        let adapter = InputAdapter::new(&weighting);
        let mut forecast = vec![500.0; 96];
        forecast[3] = f64::NAN;
        let table = adapter.adapt(grid_24h(), &prices_24h(), Some(&forecast)).unwrap();
        let renewable = table.renewable_kw.unwrap();
        assert_eq!(renewable[3], 0.0);
        assert_eq!(renewable[4], 500.0);
    }

    #[test]
    fn test_block_price_expansion() {
        let weighting = AfrrWeightingConfig::default();
        let adapter = InputAdapter::new(&weighting);
        let mut prices = prices_24h();
        prices.fcr = vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let table = adapter.adapt(grid_24h(), &prices, None).unwrap();

        let expanded = table.expand_block_prices(&table.price_fcr);
        assert_eq!(expanded.len(), 96);
        assert_eq!(expanded[0], 10.0);
        assert_eq!(expanded[15], 10.0);
        assert_eq!(expanded[16], 20.0);
        assert_eq!(expanded[95], 60.0);
    }
}
