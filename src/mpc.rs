//! Rolling-horizon (MPC) decomposition.
//!
//! A long target horizon is covered by overlapping solves: each iteration
//! optimizes a window of `horizon_hours`, commits only its first
//! `execution_hours`, chains the committed end-of-window SOC into the next
//! iteration, and advances. This module owns the window arithmetic and the
//! exact splicing of committed slices into one full-horizon result record;
//! the per-window solves run through the regular service pipeline.

use crate::adapter::TimeSeriesTable;
use crate::config::MpcConfig;
use crate::domain::ModelType;
use crate::error::{Result, SchedulerError};
use crate::extract::SolveOutput;
use crate::solver::{SolveReport, Termination};
use crate::timegrid::{STEPS_PER_BLOCK, STEPS_PER_HOUR};

#[derive(Debug, Clone, Copy)]
pub struct MpcParams {
    /// Optimization window per iteration (hours).
    pub horizon_hours: u32,
    /// Committed window per iteration (hours).
    pub execution_hours: u32,
}

impl From<&MpcConfig> for MpcParams {
    fn from(config: &MpcConfig) -> Self {
        Self {
            horizon_hours: config.horizon_hours,
            execution_hours: config.execution_hours,
        }
    }
}

/// One iteration of the rolling horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    pub iteration: usize,
    /// Offset of the window start from the global start (hours).
    pub start_hour: u32,
    /// Length of this iteration's optimization window (hours); the final
    /// windows shrink so they never run past the target horizon.
    pub window_hours: u32,
    /// Hours of this window that are committed to the global schedule.
    pub commit_hours: u32,
}

impl WindowPlan {
    pub fn start_step(&self) -> usize {
        self.start_hour as usize * STEPS_PER_HOUR
    }

    pub fn window_steps(&self) -> usize {
        self.window_hours as usize * STEPS_PER_HOUR
    }

    pub fn commit_steps(&self) -> usize {
        self.commit_hours as usize * STEPS_PER_HOUR
    }

    pub fn commit_blocks(&self) -> usize {
        self.commit_steps() / STEPS_PER_BLOCK
    }

    /// Number of blocks the window's price slices must cover.
    pub fn window_blocks(&self) -> usize {
        self.window_steps().div_ceil(STEPS_PER_BLOCK)
    }
}

impl MpcParams {
    /// Lay out the iteration windows for `total_hours`.
    ///
    /// Invariants: the committed window fits inside the optimization window,
    /// the target horizon is a whole number of committed windows, and the
    /// committed window tiles whole capacity blocks (a fraction of a 4-hour
    /// block cannot be committed because its capacity bid is indivisible).
    pub fn plan(&self, total_hours: u32) -> Result<Vec<WindowPlan>> {
        if self.execution_hours == 0 || self.horizon_hours == 0 {
            return Err(SchedulerError::configuration(
                "mpc windows must be positive",
            ));
        }
        if self.execution_hours > self.horizon_hours {
            return Err(SchedulerError::configuration(format!(
                "execution window ({}h) exceeds optimization window ({}h)",
                self.execution_hours, self.horizon_hours
            )));
        }
        if self.execution_hours % 4 != 0 {
            return Err(SchedulerError::configuration(format!(
                "execution window ({}h) must tile whole 4-hour capacity blocks",
                self.execution_hours
            )));
        }
        if total_hours == 0 || total_hours % self.execution_hours != 0 {
            return Err(SchedulerError::invalid_input(format!(
                "target horizon ({total_hours}h) must be a whole number of \
                 execution windows ({}h)",
                self.execution_hours
            )));
        }

        let iterations = (total_hours / self.execution_hours) as usize;
        let plans = (0..iterations)
            .map(|i| {
                let start_hour = i as u32 * self.execution_hours;
                let window_hours = self.horizon_hours.min(total_hours - start_hour);
                WindowPlan {
                    iteration: i,
                    start_hour,
                    window_hours,
                    commit_hours: self.execution_hours,
                }
            })
            .collect();
        Ok(plans)
    }
}

/// Splices the committed slice of each iteration into one full-horizon
/// [`SolveOutput`]. Profit and cost accounting is recomputed from the
/// committed per-step contributions and committed blocks, so the merged
/// summary is exact rather than a pro-rated window total.
pub struct MpcAccumulator {
    model_type: ModelType,
    alpha: f64,
    merged: SolveOutput,
    reports: Vec<SolveReport>,
}

impl MpcAccumulator {
    pub fn new(model_type: ModelType, alpha: f64) -> Self {
        Self {
            model_type,
            alpha,
            merged: empty_output(model_type, alpha),
            reports: Vec::new(),
        }
    }

    /// The committed SOC at the end of the last committed slice, as a
    /// fraction of `capacity_kwh`; this chains into the next iteration.
    pub fn last_committed_soc(&self, capacity_kwh: f64) -> Option<f64> {
        self.merged.e_soc.last().map(|kwh| kwh / capacity_kwh)
    }

    /// Append the first `plan.commit_steps()` of a window's solution.
    pub fn commit(&mut self, plan: &WindowPlan, window: &SolveOutput, table: &TimeSeriesTable) {
        let steps = plan.commit_steps().min(window.p_total_ch.len());
        let blocks = plan.commit_blocks().min(window.c_fcr.len());
        let m = &mut self.merged;

        extend(&mut m.p_ch, &window.p_ch, steps);
        extend(&mut m.p_dis, &window.p_dis, steps);
        extend(&mut m.p_afrr_pos_e, &window.p_afrr_pos_e, steps);
        extend(&mut m.p_afrr_neg_e, &window.p_afrr_neg_e, steps);
        extend(&mut m.p_total_ch, &window.p_total_ch, steps);
        extend(&mut m.p_total_dis, &window.p_total_dis, steps);
        extend(&mut m.e_soc, &window.e_soc, steps);
        m.e_soc_seg.extend(window.e_soc_seg.iter().take(steps).cloned());
        m.p_dis_seg.extend(window.p_dis_seg.iter().take(steps).cloned());
        m.lambda_cal.extend(window.lambda_cal.iter().take(steps).cloned());

        extend(&mut m.c_fcr, &window.c_fcr, blocks);
        extend(&mut m.c_afrr_pos, &window.c_afrr_pos, blocks);
        extend(&mut m.c_afrr_neg, &window.c_afrr_neg, blocks);

        extend_opt(&mut m.p_self, &window.p_self, steps);
        extend_opt(&mut m.p_export, &window.p_export, steps);
        extend_opt(&mut m.p_curtail, &window.p_curtail, steps);

        extend(&mut m.step_profit_da, &window.step_profit_da, steps);
        extend(
            &mut m.step_profit_afrr_energy,
            &window.step_profit_afrr_energy,
            steps,
        );
        extend(&mut m.step_cost_cyclic, &window.step_cost_cyclic, steps);
        extend(&mut m.step_cost_calendar, &window.step_cost_calendar, steps);
        extend(&mut m.step_profit_export, &window.step_profit_export, steps);

        m.profit_da += window.step_profit_da[..steps].iter().sum::<f64>();
        m.profit_afrr_energy += window.step_profit_afrr_energy[..steps].iter().sum::<f64>();
        m.cost_cyclic += window.step_cost_cyclic[..steps].iter().sum::<f64>();
        m.cost_calendar += window.step_cost_calendar[..steps].iter().sum::<f64>();
        m.profit_renewable_export += window.step_profit_export[..steps].iter().sum::<f64>();

        // Capacity revenue is committed block-wise; committed windows tile
        // whole blocks by construction.
        for b in 0..blocks {
            m.profit_as_capacity += window.c_fcr[b] * table.price_fcr[b]
                + window.c_afrr_pos[b] * table.price_afrr_cap_pos[b]
                + window.c_afrr_neg[b] * table.price_afrr_cap_neg[b];
        }

        m.num_variables = window.num_variables;
        m.num_constraints = window.num_constraints;
        self.reports.push(window.report.clone());
    }

    /// Seal the accumulation into a full-horizon output record.
    pub fn finish(mut self) -> SolveOutput {
        let termination = if self
            .reports
            .iter()
            .all(|r| r.termination == Termination::Optimal)
        {
            Termination::Optimal
        } else {
            Termination::Feasible
        };
        let solve_time_seconds = self.reports.iter().map(|r| r.solve_time_seconds).sum();
        let solver_name = self
            .reports
            .last()
            .map(|r| r.solver_name.clone())
            .unwrap_or_else(|| "none".to_string());

        let m = &mut self.merged;
        m.objective_value = m.profit_da
            + m.profit_afrr_energy
            + m.profit_as_capacity
            + m.profit_renewable_export
            - self.alpha * (m.cost_cyclic + m.cost_calendar);
        m.report = SolveReport {
            termination,
            solve_time_seconds,
            solver_name,
        };
        m.model_type = self.model_type;
        m.alpha = self.alpha;
        self.merged
    }
}

fn extend(into: &mut Vec<f64>, from: &[f64], take: usize) {
    into.extend_from_slice(&from[..take.min(from.len())]);
}

fn extend_opt(into: &mut Option<Vec<f64>>, from: &Option<Vec<f64>>, take: usize) {
    if let Some(from) = from {
        into.get_or_insert_with(Vec::new)
            .extend_from_slice(&from[..take.min(from.len())]);
    }
}

fn empty_output(model_type: ModelType, alpha: f64) -> SolveOutput {
    SolveOutput {
        report: SolveReport {
            termination: Termination::Optimal,
            solve_time_seconds: 0.0,
            solver_name: "none".to_string(),
        },
        model_type,
        alpha,
        objective_value: 0.0,
        profit_da: 0.0,
        profit_afrr_energy: 0.0,
        profit_as_capacity: 0.0,
        cost_cyclic: 0.0,
        cost_calendar: 0.0,
        profit_renewable_export: 0.0,
        p_ch: Vec::new(),
        p_dis: Vec::new(),
        p_afrr_pos_e: Vec::new(),
        p_afrr_neg_e: Vec::new(),
        p_total_ch: Vec::new(),
        p_total_dis: Vec::new(),
        e_soc: Vec::new(),
        e_soc_seg: Vec::new(),
        p_dis_seg: Vec::new(),
        lambda_cal: Vec::new(),
        c_fcr: Vec::new(),
        c_afrr_pos: Vec::new(),
        c_afrr_neg: Vec::new(),
        p_self: None,
        p_export: None,
        p_curtail: None,
        step_profit_da: Vec::new(),
        step_profit_afrr_energy: Vec::new(),
        step_cost_cyclic: Vec::new(),
        step_cost_calendar: Vec::new(),
        step_profit_export: Vec::new(),
        num_variables: 0,
        num_constraints: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(horizon: u32, execution: u32) -> MpcParams {
        MpcParams {
            horizon_hours: horizon,
            execution_hours: execution,
        }
    }

    #[test]
    fn test_plan_12h_default_windows() {
        let plans = params(6, 4).plan(12).unwrap();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].start_hour, 0);
        assert_eq!(plans[0].window_hours, 6);
        assert_eq!(plans[1].start_hour, 4);
        assert_eq!(plans[1].window_hours, 6);
        // The last window is clipped to the target horizon.
        assert_eq!(plans[2].start_hour, 8);
        assert_eq!(plans[2].window_hours, 4);
        assert!(plans.iter().all(|p| p.commit_hours == 4));
    }

    #[test]
    fn test_plan_equal_windows_is_single_solve() {
        let plans = params(6, 4).plan(4).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].window_hours, 4);
    }

    #[test]
    fn test_plan_rejects_bad_shapes() {
        // Execution longer than optimization window.
        assert!(params(4, 6).plan(12).is_err());
        // Horizon not a multiple of the execution window.
        assert!(params(6, 4).plan(10).is_err());
        // Execution window not aligned with capacity blocks.
        assert!(params(6, 2).plan(12).is_err());
    }

    #[test]
    fn test_window_step_arithmetic() {
        let plan = WindowPlan {
            iteration: 1,
            start_hour: 4,
            window_hours: 6,
            commit_hours: 4,
        };
        assert_eq!(plan.start_step(), 16);
        assert_eq!(plan.window_steps(), 24);
        assert_eq!(plan.commit_steps(), 16);
        assert_eq!(plan.commit_blocks(), 1);
        assert_eq!(plan.window_blocks(), 2);
    }
}
