//! Reads the primal solution back out of a solved instance and derives the
//! caller-facing schedule and financial summary.
//!
//! Failed solves never raise here: they become a result with an empty
//! schedule and the diagnostic status set.

use uuid::Uuid;

use crate::adapter::TimeSeriesTable;
use crate::domain::{
    BatteryParams, MarketTag, ModelType, OptimizationResult, RenewableAction,
    RenewableUtilization, RevenueBreakdown, ScheduleAction, ScheduleEntry,
};
use crate::model::{ModelContext, ModelHandles};
use crate::solver::{SolveOutcome, SolveReport};
use crate::timegrid::DT_HOURS;

/// Power below this threshold counts as idle (kW).
const ACTION_THRESHOLD_KW: f64 = 1e-3;

/// The raw result record of one solve: named profit/cost values, every
/// primal vector, and per-step profit contributions. The MPC driver splices
/// committed windows out of these vectors, so they are kept exact rather
/// than pre-rendered.
#[derive(Debug, Clone)]
pub struct SolveOutput {
    pub report: SolveReport,
    pub model_type: ModelType,
    pub alpha: f64,

    pub objective_value: f64,
    pub profit_da: f64,
    pub profit_afrr_energy: f64,
    pub profit_as_capacity: f64,
    /// Unweighted aging costs; multiply by alpha for the charged cost.
    pub cost_cyclic: f64,
    pub cost_calendar: f64,
    pub profit_renewable_export: f64,

    pub p_ch: Vec<f64>,
    pub p_dis: Vec<f64>,
    pub p_afrr_pos_e: Vec<f64>,
    pub p_afrr_neg_e: Vec<f64>,
    pub p_total_ch: Vec<f64>,
    pub p_total_dis: Vec<f64>,
    pub e_soc: Vec<f64>,
    /// Indexed [step][segment]; empty for Model I.
    pub e_soc_seg: Vec<Vec<f64>>,
    pub p_dis_seg: Vec<Vec<f64>>,
    /// Calendar interpolation weights, indexed [step][breakpoint]; empty
    /// below Model III.
    pub lambda_cal: Vec<Vec<f64>>,

    pub c_fcr: Vec<f64>,
    pub c_afrr_pos: Vec<f64>,
    pub c_afrr_neg: Vec<f64>,

    pub p_self: Option<Vec<f64>>,
    pub p_export: Option<Vec<f64>>,
    pub p_curtail: Option<Vec<f64>>,

    // Per-step contributions (EUR), recomputed from the primal values so
    // committed-window accounting stays exact under MPC.
    pub step_profit_da: Vec<f64>,
    pub step_profit_afrr_energy: Vec<f64>,
    pub step_cost_cyclic: Vec<f64>,
    pub step_cost_calendar: Vec<f64>,
    pub step_profit_export: Vec<f64>,

    pub num_variables: usize,
    pub num_constraints: usize,
}

/// Extract the primal solution. Returns `None` when the solve produced no
/// usable solution (infeasible, error, or timeout without incumbent).
pub fn extract(
    ctx: &ModelContext<'_>,
    handles: &ModelHandles,
    outcome: &SolveOutcome,
) -> Option<SolveOutput> {
    let solution = outcome.solution.as_ref()?;
    let table = ctx.table;
    let steps = table.num_steps();
    let vars = &handles.vars;

    let values = |family: &[good_lp::Variable]| -> Vec<f64> {
        family.iter().map(|v| solution.value(*v)).collect()
    };
    let nested = |family: &[Vec<good_lp::Variable>]| -> Vec<Vec<f64>> {
        family.iter().map(|row| values(row)).collect()
    };

    let p_ch = values(&vars.p_ch);
    let p_dis = values(&vars.p_dis);
    let p_afrr_pos_e = values(&vars.p_afrr_pos_e);
    let p_afrr_neg_e = values(&vars.p_afrr_neg_e);
    let p_dis_seg = nested(&vars.p_dis_seg);

    let e_soc: Vec<f64> = handles.soc_exprs.iter().map(|e| solution.eval(e)).collect();

    let step_profit_da: Vec<f64> = (0..steps)
        .map(|t| table.price_day_ahead[t] / 1000.0 * DT_HOURS * (p_dis[t] - p_ch[t]))
        .collect();

    let step_profit_afrr_energy: Vec<f64> = (0..steps)
        .map(|t| {
            let mut profit = 0.0;
            let pos = table.price_afrr_energy_pos[t];
            if !pos.is_nan() {
                profit += pos / 1000.0 * table.w_afrr_pos[t] * DT_HOURS * p_afrr_pos_e[t];
            }
            let neg = table.price_afrr_energy_neg[t];
            if !neg.is_nan() {
                profit += neg / 1000.0 * table.w_afrr_neg[t] * DT_HOURS * p_afrr_neg_e[t];
            }
            profit
        })
        .collect();

    let cyclic = &ctx.degradation.cyclic;
    let step_cost_cyclic: Vec<f64> = (0..steps)
        .map(|t| {
            p_dis_seg
                .get(t)
                .map(|row| {
                    row.iter()
                        .zip(&cyclic.segment_costs)
                        .map(|(p, cost)| p * cost * DT_HOURS / ctx.battery.eta_discharge)
                        .sum()
                })
                .unwrap_or(0.0)
        })
        .collect();

    let step_cost_calendar: Vec<f64> = if handles.calendar_step_costs.is_empty() {
        vec![0.0; steps]
    } else {
        handles
            .calendar_step_costs
            .iter()
            .map(|e| solution.eval(e) * DT_HOURS)
            .collect()
    };

    let p_export = (!vars.p_export.is_empty()).then(|| values(&vars.p_export));
    let step_profit_export: Vec<f64> = match &p_export {
        Some(export) => (0..steps)
            .map(|t| table.price_day_ahead[t] / 1000.0 * DT_HOURS * export[t])
            .collect(),
        None => vec![0.0; steps],
    };

    Some(SolveOutput {
        report: outcome.report.clone(),
        model_type: handles.model_type,
        alpha: handles.alpha,
        objective_value: solution.eval(&handles.objective),
        profit_da: solution.eval(&handles.profit_da),
        profit_afrr_energy: solution.eval(&handles.profit_afrr_energy),
        profit_as_capacity: solution.eval(&handles.profit_as_capacity),
        cost_cyclic: handles.cost_cyclic.as_ref().map_or(0.0, |e| solution.eval(e)),
        cost_calendar: handles.cost_calendar.as_ref().map_or(0.0, |e| solution.eval(e)),
        profit_renewable_export: handles
            .profit_renewable_export
            .as_ref()
            .map_or(0.0, |e| solution.eval(e)),
        p_ch,
        p_dis,
        p_afrr_pos_e,
        p_afrr_neg_e,
        p_total_ch: values(&vars.p_total_ch),
        p_total_dis: values(&vars.p_total_dis),
        e_soc,
        e_soc_seg: nested(&vars.e_soc_seg),
        p_dis_seg,
        lambda_cal: nested(&vars.lambda_cal),
        c_fcr: values(&vars.c_fcr),
        c_afrr_pos: values(&vars.c_afrr_pos),
        c_afrr_neg: values(&vars.c_afrr_neg),
        p_self: (!vars.p_self.is_empty()).then(|| values(&vars.p_self)),
        p_export,
        p_curtail: (!vars.p_curtail.is_empty()).then(|| values(&vars.p_curtail)),
        step_profit_da,
        step_profit_afrr_energy,
        step_cost_cyclic,
        step_cost_calendar,
        step_profit_export,
        num_variables: handles.num_variables,
        num_constraints: handles.num_constraints,
    })
}

/// Render a [`SolveOutput`] into the caller-facing result.
pub fn build_result(
    output: &SolveOutput,
    table: &TimeSeriesTable,
    battery: &BatteryParams,
) -> OptimizationResult {
    let steps = output.p_total_ch.len();
    let grid = &table.grid;

    let mut schedule = Vec::with_capacity(steps);
    let mut soc_trajectory = Vec::with_capacity(steps);

    for t in 0..steps {
        let soc_after = (output.e_soc[t] / battery.capacity_kwh).clamp(0.0, 1.0);
        soc_trajectory.push(soc_after);

        let charge = output.p_total_ch[t];
        let discharge = output.p_total_dis[t];
        let (action, power_kw) = if discharge > ACTION_THRESHOLD_KW && discharge >= charge {
            (ScheduleAction::Discharge, discharge)
        } else if charge > ACTION_THRESHOLD_KW {
            (ScheduleAction::Charge, charge)
        } else {
            (ScheduleAction::Idle, 0.0)
        };

        let market = classify_market(output, grid.block_of(t), t, action);

        let (renewable_action, renewable_power_kw) = renewable_step(output, t);

        schedule.push(ScheduleEntry {
            timestamp: grid.timestamp(t),
            action,
            power_kw,
            market,
            soc_after,
            renewable_action,
            renewable_power_kw,
        });
    }

    let cyclic_aging_cost = output.alpha * output.cost_cyclic;
    let calendar_aging_cost = output.alpha * output.cost_calendar;
    let degradation_cost = cyclic_aging_cost + calendar_aging_cost;

    OptimizationResult {
        id: Uuid::new_v4(),
        model_type: output.model_type,
        status: output.report.termination.run_status(),
        objective_value: output.objective_value,
        net_profit: output.objective_value - degradation_cost,
        revenue_breakdown: RevenueBreakdown {
            da: output.profit_da,
            afrr_energy: output.profit_afrr_energy,
            fcr: output.profit_as_capacity,
            renewable_export: output.profit_renewable_export,
        },
        cyclic_aging_cost,
        calendar_aging_cost,
        degradation_cost,
        schedule,
        soc_trajectory,
        renewable_utilization: renewable_utilization(output),
        solve_time_seconds: output.report.solve_time_seconds,
        solver_name: output.report.solver_name.clone(),
        num_variables: output.num_variables,
        num_constraints: output.num_constraints,
    }
}

/// Tag the step with the market that dominates it: the larger energy-market
/// leg when dispatching, else the block's active capacity product when idle.
fn classify_market(
    output: &SolveOutput,
    block: usize,
    t: usize,
    action: ScheduleAction,
) -> MarketTag {
    match action {
        ScheduleAction::Discharge => {
            if output.p_afrr_pos_e[t] > output.p_dis[t] {
                MarketTag::AfrrEnergy
            } else {
                MarketTag::Da
            }
        }
        ScheduleAction::Charge => {
            if output.p_afrr_neg_e[t] > output.p_ch[t] {
                MarketTag::AfrrEnergy
            } else {
                MarketTag::Da
            }
        }
        ScheduleAction::Idle => {
            if output.c_fcr.get(block).copied().unwrap_or(0.0) > 1e-6 {
                MarketTag::Fcr
            } else if output.c_afrr_pos.get(block).copied().unwrap_or(0.0) > 1e-6
                || output.c_afrr_neg.get(block).copied().unwrap_or(0.0) > 1e-6
            {
                MarketTag::AfrrCap
            } else {
                MarketTag::Da
            }
        }
    }
}

fn renewable_step(output: &SolveOutput, t: usize) -> (Option<RenewableAction>, Option<f64>) {
    let (Some(p_self), Some(p_export), Some(p_curtail)) =
        (&output.p_self, &output.p_export, &output.p_curtail)
    else {
        return (None, None);
    };

    let candidates = [
        (RenewableAction::SelfConsume, p_self[t]),
        (RenewableAction::Export, p_export[t]),
        (RenewableAction::Curtail, p_curtail[t]),
    ];
    let (action, power) = candidates
        .into_iter()
        .max_by_key(|(_, p)| ordered_float::OrderedFloat(*p))
        .expect("three candidates");

    if power > ACTION_THRESHOLD_KW {
        (Some(action), Some(power))
    } else {
        (None, None)
    }
}

fn renewable_utilization(output: &SolveOutput) -> Option<RenewableUtilization> {
    let (p_self, p_export, p_curtail) = match (&output.p_self, &output.p_export, &output.p_curtail)
    {
        (Some(s), Some(e), Some(c)) => (s, e, c),
        _ => return None,
    };

    let self_consumption_kwh: f64 = p_self.iter().sum::<f64>() * DT_HOURS;
    let export_kwh: f64 = p_export.iter().sum::<f64>() * DT_HOURS;
    let curtailment_kwh: f64 = p_curtail.iter().sum::<f64>() * DT_HOURS;
    let total_generation_kwh = self_consumption_kwh + export_kwh + curtailment_kwh;

    let utilization_rate = if total_generation_kwh > 0.0 {
        ((self_consumption_kwh + export_kwh) / total_generation_kwh).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some(RenewableUtilization {
        total_generation_kwh,
        self_consumption_kwh,
        export_kwh,
        curtailment_kwh,
        utilization_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunStatus;
    use crate::solver::Termination;

    fn output_with(
        p_total_ch: Vec<f64>,
        p_total_dis: Vec<f64>,
        p_ch: Vec<f64>,
        p_dis: Vec<f64>,
        p_afrr_pos_e: Vec<f64>,
        p_afrr_neg_e: Vec<f64>,
    ) -> SolveOutput {
        let steps = p_total_ch.len();
        SolveOutput {
            report: SolveReport {
                termination: Termination::Optimal,
                solve_time_seconds: 0.1,
                solver_name: "cbc".to_string(),
            },
            model_type: ModelType::I,
            alpha: 0.0,
            objective_value: 0.0,
            profit_da: 0.0,
            profit_afrr_energy: 0.0,
            profit_as_capacity: 0.0,
            cost_cyclic: 0.0,
            cost_calendar: 0.0,
            profit_renewable_export: 0.0,
            p_ch,
            p_dis,
            p_afrr_pos_e,
            p_afrr_neg_e,
            p_total_ch,
            p_total_dis,
            e_soc: vec![2236.0; steps],
            e_soc_seg: Vec::new(),
            p_dis_seg: Vec::new(),
            lambda_cal: Vec::new(),
            c_fcr: vec![0.0],
            c_afrr_pos: vec![0.0],
            c_afrr_neg: vec![0.0],
            p_self: None,
            p_export: None,
            p_curtail: None,
            step_profit_da: vec![0.0; steps],
            step_profit_afrr_energy: vec![0.0; steps],
            step_cost_cyclic: vec![0.0; steps],
            step_cost_calendar: vec![0.0; steps],
            step_profit_export: vec![0.0; steps],
            num_variables: 0,
            num_constraints: 0,
        }
    }

    fn test_battery() -> BatteryParams {
        BatteryParams {
            capacity_kwh: 4472.0,
            power_kw: 2236.0,
            eta_charge: 0.95f64.sqrt(),
            eta_discharge: 0.95f64.sqrt(),
            soc_min: 0.0,
            soc_max: 1.0,
            initial_energy_kwh: 2236.0,
            daily_cycle_limit: None,
        }
    }

    fn test_table(steps: usize) -> TimeSeriesTable {
        let start = chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2024, 1, 1, 0, 0, 0).unwrap();
        let grid =
            crate::timegrid::TimeGrid::build(start, (steps / 4) as u32).unwrap();
        TimeSeriesTable {
            grid,
            price_day_ahead: vec![0.0; steps],
            price_afrr_energy_pos: vec![f64::NAN; steps],
            price_afrr_energy_neg: vec![f64::NAN; steps],
            price_fcr: vec![0.0],
            price_afrr_cap_pos: vec![0.0],
            price_afrr_cap_neg: vec![0.0],
            w_afrr_pos: vec![1.0; steps],
            w_afrr_neg: vec![1.0; steps],
            renewable_kw: None,
        }
    }

    #[test]
    fn test_action_classification_threshold() {
        let mut output = output_with(
            vec![0.0; 16],
            vec![0.0; 16],
            vec![0.0; 16],
            vec![0.0; 16],
            vec![0.0; 16],
            vec![0.0; 16],
        );
        // Step 0 discharges, step 1 charges, step 2 is sub-threshold noise.
        output.p_total_dis[0] = 800.0;
        output.p_dis[0] = 800.0;
        output.p_total_ch[1] = 500.0;
        output.p_ch[1] = 500.0;
        output.p_total_ch[2] = 0.0005;

        let result = build_result(&output, &test_table(16), &test_battery());
        assert_eq!(result.schedule[0].action, ScheduleAction::Discharge);
        assert_eq!(result.schedule[0].power_kw, 800.0);
        assert_eq!(result.schedule[0].market, MarketTag::Da);
        assert_eq!(result.schedule[1].action, ScheduleAction::Charge);
        assert_eq!(result.schedule[2].action, ScheduleAction::Idle);
        assert_eq!(result.schedule[2].power_kw, 0.0);
    }

    #[test]
    fn test_market_classification_prefers_dominant_leg() {
        let output = output_with(
            vec![0.0, 900.0],
            vec![700.0, 0.0],
            vec![0.0, 100.0],
            vec![200.0, 0.0],
            vec![500.0, 0.0],
            vec![0.0, 800.0],
        );

        assert_eq!(
            classify_market(&output, 0, 0, ScheduleAction::Discharge),
            MarketTag::AfrrEnergy
        );
        assert_eq!(
            classify_market(&output, 0, 1, ScheduleAction::Charge),
            MarketTag::AfrrEnergy
        );
    }

    #[test]
    fn test_idle_step_tagged_by_capacity_bid() {
        let mut output = output_with(
            vec![0.0],
            vec![0.0],
            vec![0.0],
            vec![0.0],
            vec![0.0],
            vec![0.0],
        );
        output.c_fcr = vec![1.5];
        assert_eq!(
            classify_market(&output, 0, 0, ScheduleAction::Idle),
            MarketTag::Fcr
        );

        output.c_fcr = vec![0.0];
        output.c_afrr_neg = vec![1.2];
        assert_eq!(
            classify_market(&output, 0, 0, ScheduleAction::Idle),
            MarketTag::AfrrCap
        );
    }

    #[test]
    fn test_renewable_utilization_rate() {
        let mut output = output_with(
            vec![0.0; 4],
            vec![0.0; 4],
            vec![0.0; 4],
            vec![0.0; 4],
            vec![0.0; 4],
            vec![0.0; 4],
        );
        output.p_self = Some(vec![100.0; 4]);
        output.p_export = Some(vec![200.0; 4]);
        output.p_curtail = Some(vec![100.0; 4]);

        let util = renewable_utilization(&output).unwrap();
        assert!((util.total_generation_kwh - 400.0 * 0.25).abs() < 1e-9);
        assert!((util.utilization_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_soc_clamped_in_result() {
        let battery = test_battery();
        let table = test_table(16);

        let mut output = output_with(
            vec![0.0; 16],
            vec![0.0; 16],
            vec![0.0; 16],
            vec![0.0; 16],
            vec![0.0; 16],
            vec![0.0; 16],
        );
        // Slight overshoot from solver tolerance is absorbed by clamping.
        output.e_soc = vec![4472.5; 16];
        output.c_fcr = vec![0.0];
        output.c_afrr_pos = vec![0.0];
        output.c_afrr_neg = vec![0.0];

        let result = build_result(&output, &table, &battery);
        assert_eq!(result.status, RunStatus::Optimal);
        assert!(result.soc_trajectory.iter().all(|s| *s <= 1.0));
        assert_eq!(result.schedule.len(), 16);
    }
}
