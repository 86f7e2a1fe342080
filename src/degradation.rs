use itertools::Itertools;

use crate::config::{CalendarPoint, DegradationConfig};
use crate::error::{Result, SchedulerError};

/// Cyclic aging: the battery is decomposed into equal-capacity segments,
/// each with a marginal cost per kWh of discharge throughput. Shallow
/// segments are cheap, deep segments expensive, which makes deep cycling
/// pay its way in the objective.
#[derive(Debug, Clone)]
pub struct CyclicAgingParams {
    /// Marginal cost per segment (EUR/kWh), shallowest first.
    pub segment_costs: Vec<f64>,
    /// Capacity of each segment (kWh).
    pub segment_kwh: f64,
}

impl CyclicAgingParams {
    pub fn new(costs: &[f64], capacity_kwh: f64) -> Result<Self> {
        if costs.is_empty() {
            return Err(SchedulerError::configuration(
                "cyclic aging needs at least one segment cost",
            ));
        }
        if let Some(pos) = costs.iter().position(|c| *c < 0.0) {
            return Err(SchedulerError::configuration(format!(
                "segment cost [{pos}] is negative"
            )));
        }
        if !costs.iter().tuple_windows().all(|(a, b)| a < b) {
            tracing::warn!(
                "segment costs are not strictly increasing; deep cycling will not \
                 be penalized more than shallow cycling"
            );
        }

        let segment_kwh = capacity_kwh / costs.len() as f64;
        let reassembled = segment_kwh * costs.len() as f64;
        if (reassembled - capacity_kwh).abs() > 0.01 {
            return Err(SchedulerError::configuration(format!(
                "segments do not reassemble the capacity: {} * {:.4} kWh != {:.4} kWh",
                costs.len(),
                segment_kwh,
                capacity_kwh
            )));
        }

        Ok(Self {
            segment_costs: costs.to_vec(),
            segment_kwh,
        })
    }

    pub fn num_segments(&self) -> usize {
        self.segment_costs.len()
    }

    /// Split an initial stored energy across segments top-down: segment j
    /// holds energy only once segments 0..j are full.
    pub fn initial_split(&self, initial_kwh: f64) -> Vec<f64> {
        let mut remaining = initial_kwh.max(0.0);
        self.segment_costs
            .iter()
            .map(|_| {
                let fill = remaining.min(self.segment_kwh);
                remaining -= fill;
                fill
            })
            .collect()
    }
}

/// Calendar aging: a piecewise-linear cost-per-hour curve over stored
/// energy, defined by breakpoints spanning the whole capacity.
#[derive(Debug, Clone)]
pub struct CalendarAgingParams {
    /// (stored energy kWh, EUR/h) breakpoints with strictly increasing SOC.
    pub breakpoints: Vec<(f64, f64)>,
}

impl CalendarAgingParams {
    pub fn from_fractions(points: &[CalendarPoint], capacity_kwh: f64) -> Result<Self> {
        if points.len() < 2 {
            return Err(SchedulerError::configuration(
                "calendar aging needs at least two breakpoints",
            ));
        }

        let breakpoints: Vec<(f64, f64)> = points
            .iter()
            .map(|p| (p.soc_fraction * capacity_kwh, p.cost_eur_per_hour))
            .collect();

        if !breakpoints.iter().tuple_windows().all(|(a, b)| a.0 < b.0) {
            return Err(SchedulerError::configuration(
                "calendar breakpoints must have strictly increasing SOC",
            ));
        }
        let first = breakpoints.first().unwrap().0;
        let last = breakpoints.last().unwrap().0;
        if first.abs() > 1e-9 || (last - capacity_kwh).abs() > 1e-6 {
            return Err(SchedulerError::configuration(format!(
                "calendar breakpoints must span [0, {capacity_kwh}] kWh, got [{first}, {last}]"
            )));
        }
        if let Some(pos) = breakpoints.iter().position(|(_, c)| *c < 0.0) {
            return Err(SchedulerError::configuration(format!(
                "calendar breakpoint [{pos}] has a negative cost"
            )));
        }

        Ok(Self { breakpoints })
    }

    pub fn num_breakpoints(&self) -> usize {
        self.breakpoints.len()
    }
}

/// Both aging parameter groups, loaded once per solve.
#[derive(Debug, Clone)]
pub struct DegradationParams {
    pub cyclic: CyclicAgingParams,
    pub calendar: CalendarAgingParams,
    pub lifo_epsilon_kwh: f64,
    pub require_sequential_segment_activation: bool,
}

impl DegradationParams {
    pub fn load(config: &DegradationConfig, capacity_kwh: f64) -> Result<Self> {
        Ok(Self {
            cyclic: CyclicAgingParams::new(&config.segment_costs_eur_per_kwh, capacity_kwh)?,
            calendar: CalendarAgingParams::from_fractions(
                &config.calendar_breakpoints,
                capacity_kwh,
            )?,
            lifo_epsilon_kwh: config.lifo_epsilon_kwh,
            require_sequential_segment_activation: config.require_sequential_segment_activation,
        })
    }
}
