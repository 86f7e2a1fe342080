//! Orchestration: adapt the request, resolve parameters, build the MILP,
//! solve, and extract. The rolling-horizon entry point wraps the same
//! pipeline per window and splices the committed slices together.

use std::collections::HashMap;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use parking_lot::Mutex;

use crate::adapter::{InputAdapter, TimeSeriesTable};
use crate::config::AppConfig;
use crate::degradation::DegradationParams;
use crate::domain::{BatteryParams, ModelType, OptimizationRequest, OptimizationResult};
use crate::error::Result;
use crate::extract::{self, SolveOutput};
use crate::model::{self, ModelContext};
use crate::mpc::{MpcAccumulator, MpcParams, WindowPlan};
use crate::solver::{SolveReport, SolverDriver};
use crate::timegrid::{TimeGrid, STEPS_PER_BLOCK};

/// Read-only per-variant configuration, memoized by `(model_type, alpha)`.
/// The MILP instance itself is always built fresh per solve; only this
/// parameter bundle is shared.
struct ModelSpec {
    model_type: ModelType,
    alpha: f64,
    degradation: DegradationParams,
    max_as_ratio: f64,
    reserve_duration_hours: f64,
}

struct SolveRun {
    report: SolveReport,
    output: Option<SolveOutput>,
    num_variables: usize,
    num_constraints: usize,
}

pub struct OptimizerService {
    config: AppConfig,
    specs: Mutex<HashMap<(ModelType, OrderedFloat<f64>), Arc<ModelSpec>>>,
}

impl OptimizerService {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            specs: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run one complete optimization.
    pub fn optimize(&self, request: &OptimizationRequest) -> Result<OptimizationResult> {
        request.validate()?;
        tracing::info!(
            model = %request.model_type,
            horizon_hours = request.horizon_hours,
            c_rate = request.c_rate,
            alpha = request.alpha,
            "starting optimization"
        );

        let battery = BatteryParams::resolve(&self.config.battery, request.c_rate)?;
        let table = self.adapt(request)?;
        let spec = self.model_spec(request.model_type, request.alpha)?;

        let run = self.solve_table(&table, &battery, &spec)?;
        Ok(match run.output {
            Some(output) => extract::build_result(&output, &table, &battery),
            None => OptimizationResult::empty(
                request.model_type,
                run.report.termination.run_status(),
                run.report.solver_name.clone(),
                run.report.solve_time_seconds,
                run.num_variables,
                run.num_constraints,
            ),
        })
    }

    /// Cover `request.horizon_hours` with overlapping windows, committing
    /// `params.execution_hours` per iteration and chaining SOC forward.
    pub fn optimize_mpc(
        &self,
        request: &OptimizationRequest,
        params: MpcParams,
    ) -> Result<OptimizationResult> {
        request.validate()?;
        let plans = params.plan(request.horizon_hours)?;
        tracing::info!(
            iterations = plans.len(),
            horizon_hours = params.horizon_hours,
            execution_hours = params.execution_hours,
            total_hours = request.horizon_hours,
            "starting rolling-horizon optimization"
        );

        // The full-horizon table validates the input once and supplies the
        // window slices and the final schedule axis.
        let full_table = self.adapt(request)?;
        let spec = self.model_spec(request.model_type, request.alpha)?;
        let battery = BatteryParams::resolve(&self.config.battery, request.c_rate)?;

        let mut accumulator = MpcAccumulator::new(request.model_type, request.alpha);
        let mut soc_fraction = self.config.battery.initial_soc;

        for plan in &plans {
            let window_table = slice_table(&full_table, plan)?;
            let window_battery = BatteryParams::resolve_with_initial_soc(
                &self.config.battery,
                request.c_rate,
                soc_fraction,
            )?;

            let run = self.solve_table(&window_table, &window_battery, &spec)?;
            let Some(output) = run.output else {
                tracing::warn!(
                    iteration = plan.iteration,
                    termination = ?run.report.termination,
                    "rolling horizon aborted; returning diagnostic result"
                );
                return Ok(OptimizationResult::empty(
                    request.model_type,
                    run.report.termination.run_status(),
                    run.report.solver_name.clone(),
                    run.report.solve_time_seconds,
                    run.num_variables,
                    run.num_constraints,
                ));
            };

            accumulator.commit(plan, &output, &window_table);
            soc_fraction = accumulator
                .last_committed_soc(battery.capacity_kwh)
                .unwrap_or(soc_fraction);
            tracing::debug!(
                iteration = plan.iteration,
                committed_soc = soc_fraction,
                "committed rolling-horizon window"
            );
        }

        let merged = accumulator.finish();
        Ok(extract::build_result(&merged, &full_table, &battery))
    }

    fn adapt(&self, request: &OptimizationRequest) -> Result<TimeSeriesTable> {
        let grid = TimeGrid::build(request.start_time(), request.horizon_hours)?;
        let adapter = InputAdapter::new(&self.config.afrr_weighting);
        adapter.adapt(
            grid,
            &request.market_prices,
            request.renewable_generation_kw.as_deref(),
        )
    }

    fn solve_table(
        &self,
        table: &TimeSeriesTable,
        battery: &BatteryParams,
        spec: &ModelSpec,
    ) -> Result<SolveRun> {
        let ctx = ModelContext {
            table,
            battery,
            degradation: &spec.degradation,
            model_type: spec.model_type,
            alpha: spec.alpha,
            max_as_ratio: spec.max_as_ratio,
            reserve_duration_hours: spec.reserve_duration_hours,
        };

        let instance = model::build(&ctx)?;
        let driver = SolverDriver::from_config(&self.config.solver)?;
        let num_variables = instance.handles.num_variables;
        let num_constraints = instance.handles.num_constraints;

        let outcome = driver.solve(
            instance.problem,
            instance.handles.objective.clone(),
            instance.constraints,
        );
        let output = extract::extract(&ctx, &instance.handles, &outcome);

        Ok(SolveRun {
            report: outcome.report,
            output,
            num_variables,
            num_constraints,
        })
    }

    fn model_spec(&self, model_type: ModelType, alpha: f64) -> Result<Arc<ModelSpec>> {
        let key = (model_type, OrderedFloat(alpha));
        if let Some(spec) = self.specs.lock().get(&key) {
            return Ok(Arc::clone(spec));
        }

        let spec = Arc::new(ModelSpec {
            model_type,
            alpha,
            degradation: DegradationParams::load(
                &self.config.degradation,
                self.config.battery.capacity_kwh,
            )?,
            max_as_ratio: self.config.degradation.max_as_ratio,
            reserve_duration_hours: self.config.degradation.reserve_duration_hours,
        });
        self.specs.lock().insert(key, Arc::clone(&spec));
        Ok(spec)
    }
}

/// Cut one MPC window out of the already-validated full table.
fn slice_table(full: &TimeSeriesTable, plan: &WindowPlan) -> Result<TimeSeriesTable> {
    let s0 = plan.start_step();
    let s1 = s0 + plan.window_steps();
    let b0 = s0 / STEPS_PER_BLOCK;
    let b1 = b0 + plan.window_blocks();

    let grid = TimeGrid::build(full.grid.timestamp(s0), plan.window_hours)?;

    Ok(TimeSeriesTable {
        grid,
        price_day_ahead: full.price_day_ahead[s0..s1].to_vec(),
        price_afrr_energy_pos: full.price_afrr_energy_pos[s0..s1].to_vec(),
        price_afrr_energy_neg: full.price_afrr_energy_neg[s0..s1].to_vec(),
        price_fcr: full.price_fcr[b0..b1].to_vec(),
        price_afrr_cap_pos: full.price_afrr_cap_pos[b0..b1].to_vec(),
        price_afrr_cap_neg: full.price_afrr_cap_neg[b0..b1].to_vec(),
        w_afrr_pos: full.w_afrr_pos[s0..s1].to_vec(),
        w_afrr_neg: full.w_afrr_neg[s0..s1].to_vec(),
        renewable_kw: full
            .renewable_kw
            .as_ref()
            .map(|series| series[s0..s1].to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MarketPrices;
    use chrono::TimeZone;

    fn service() -> OptimizerService {
        OptimizerService::new(AppConfig::default())
    }

    fn request(horizon_hours: u32) -> OptimizationRequest {
        let steps = (horizon_hours * 4) as usize;
        let blocks = (horizon_hours as usize).div_ceil(4);
        OptimizationRequest {
            model_type: ModelType::I,
            horizon_hours,
            c_rate: 0.5,
            alpha: 0.0,
            start_time: Some(chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
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
    fn test_model_spec_memoized_per_type_and_alpha() {
        let service = service();
        let a = service.model_spec(ModelType::II, 1.0).unwrap();
        let b = service.model_spec(ModelType::II, 1.0).unwrap();
        let c = service.model_spec(ModelType::II, 2.0).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_slice_table_windows() {
        let service = service();
        let full = service.adapt(&request(12)).unwrap();

        let plan = WindowPlan {
            iteration: 1,
            start_hour: 4,
            window_hours: 6,
            commit_hours: 4,
        };
        let window = slice_table(&full, &plan).unwrap();

        assert_eq!(window.num_steps(), 24);
        assert_eq!(window.num_blocks(), 2);
        assert_eq!(window.price_fcr.len(), 2);
        assert_eq!(
            window.grid.timestamp(0),
            full.grid.timestamp(plan.start_step())
        );
    }

    #[test]
    fn test_invalid_request_is_caller_fault() {
        let service = service();
        let mut bad = request(12);
        bad.alpha = -1.0;
        assert!(service.optimize(&bad).is_err());
    }
}
