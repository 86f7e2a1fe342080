//! MILP assembly for the four model variants.
//!
//! Model I prices energy and capacity markets against aggregate SOC
//! dynamics. Model II replaces the SOC variable with a stacked tank of
//! equal segments under a LIFO discipline and charges cyclic aging on
//! discharge throughput. Model III adds SOS2-interpolated calendar aging,
//! and Model III-renew adds dispatch of a co-located renewable plant.
//!
//! Each build is a fresh, self-contained instance: variables, constraints
//! and named profit/cost expressions are created per solve and nothing is
//! shared across solves.

mod base;
mod calendar;
mod renewable;
mod segments;

use good_lp::{Constraint, Expression, ProblemVariables, Variable, VariableDefinition};

use crate::adapter::TimeSeriesTable;
use crate::degradation::DegradationParams;
use crate::domain::{BatteryParams, ModelType};
use crate::error::{Result, SchedulerError};
use crate::timegrid::DT_HOURS;

/// Everything the builder needs for one solve, borrowed immutably.
///
/// Constraint emission works off the precomputed step/block maps inside the
/// table's grid; no closure captures any frame of data.
pub struct ModelContext<'a> {
    pub table: &'a TimeSeriesTable,
    pub battery: &'a BatteryParams,
    pub degradation: &'a DegradationParams,
    pub model_type: ModelType,
    /// Degradation cost weight in the objective.
    pub alpha: f64,
    /// Cap on total AS capacity reservation; 1.0 disables the cap.
    pub max_as_ratio: f64,
    /// Assumed reserve activation duration (hours).
    pub reserve_duration_hours: f64,
}

impl ModelContext<'_> {
    fn validate(&self) -> Result<()> {
        if self.alpha < 0.0 {
            return Err(SchedulerError::invalid_input(format!(
                "alpha must be non-negative, got {}",
                self.alpha
            )));
        }
        if self.model_type.has_renewable() && self.table.renewable_kw.is_none() {
            return Err(SchedulerError::invalid_input(
                "model III-renew requires a renewable forecast in the input table",
            ));
        }
        Ok(())
    }

    fn num_steps(&self) -> usize {
        self.table.num_steps()
    }

    fn num_blocks(&self) -> usize {
        self.table.num_blocks()
    }
}

/// Variable handles of one assembled instance, grouped by family. Families
/// that do not exist in the built variant are left empty.
#[derive(Debug, Default)]
pub struct ModelVars {
    // Energy market powers (kW, per step).
    pub p_ch: Vec<Variable>,
    pub p_dis: Vec<Variable>,
    pub p_afrr_pos_e: Vec<Variable>,
    pub p_afrr_neg_e: Vec<Variable>,
    pub p_total_ch: Vec<Variable>,
    pub p_total_dis: Vec<Variable>,

    /// Aggregate SOC variable (kWh, Model I only).
    pub e_soc: Vec<Variable>,

    // Stacked tank (Models II+), indexed [step][segment].
    pub e_soc_seg: Vec<Vec<Variable>>,
    pub p_ch_seg: Vec<Vec<Variable>>,
    pub p_dis_seg: Vec<Vec<Variable>>,
    pub z_seg: Vec<Vec<Variable>>,

    // Calendar aging (Models III+), indexed [step][breakpoint/interval].
    pub lambda_cal: Vec<Vec<Variable>>,
    pub z_cal: Vec<Vec<Variable>>,

    // Capacity bids (MW, per block) and their participation binaries.
    pub c_fcr: Vec<Variable>,
    pub c_afrr_pos: Vec<Variable>,
    pub c_afrr_neg: Vec<Variable>,
    pub y_fcr: Vec<Variable>,
    pub y_afrr_pos: Vec<Variable>,
    pub y_afrr_neg: Vec<Variable>,

    // Operational binaries (per step).
    pub y_total_ch: Vec<Variable>,
    pub y_total_dis: Vec<Variable>,

    // Renewable split (kW, Model III-renew only).
    pub p_self: Vec<Variable>,
    pub p_export: Vec<Variable>,
    pub p_curtail: Vec<Variable>,
}

/// Named expressions and metadata the extractor reads back after a solve.
pub struct ModelHandles {
    pub model_type: ModelType,
    pub alpha: f64,

    pub vars: ModelVars,
    /// Aggregate SOC per step. In Model I this is the SOC variable itself;
    /// in Models II+ it is the sum of segment variables, and every
    /// downstream constraint was emitted against this expression.
    pub soc_exprs: Vec<Expression>,

    pub objective: Expression,
    pub profit_da: Expression,
    pub profit_afrr_energy: Expression,
    pub profit_as_capacity: Expression,
    /// Unweighted aging costs; the objective subtracts `alpha` times these.
    pub cost_cyclic: Option<Expression>,
    pub cost_calendar: Option<Expression>,
    /// Calendar cost per step (EUR/h), for committed-window accounting.
    pub calendar_step_costs: Vec<Expression>,
    pub profit_renewable_export: Option<Expression>,

    pub num_variables: usize,
    pub num_constraints: usize,
}

/// An assembled MILP ready for the solver driver.
pub struct MilpInstance {
    pub problem: ProblemVariables,
    pub constraints: Vec<Constraint>,
    pub handles: ModelHandles,
}

/// Accumulates variables and constraints during assembly and keeps the
/// running counts the result record reports.
pub(crate) struct Assembly {
    pub problem: ProblemVariables,
    pub constraints: Vec<Constraint>,
    pub num_variables: usize,
}

impl Assembly {
    fn new() -> Self {
        Self {
            problem: ProblemVariables::new(),
            constraints: Vec::new(),
            num_variables: 0,
        }
    }

    pub(crate) fn add(&mut self, def: VariableDefinition) -> Variable {
        self.num_variables += 1;
        self.problem.add(def)
    }

    pub(crate) fn add_vector(&mut self, def: VariableDefinition, len: usize) -> Vec<Variable> {
        self.num_variables += len;
        self.problem.add_vector(def, len)
    }

    pub(crate) fn push(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }
}

/// Assemble the MILP for the requested model variant.
pub fn build(ctx: &ModelContext<'_>) -> Result<MilpInstance> {
    ctx.validate()?;

    let mut asm = Assembly::new();

    let mut core = base::declare_variables(&mut asm, ctx);

    let renewable = if ctx.model_type.has_renewable() {
        Some(renewable::declare_variables(&mut asm, ctx))
    } else {
        None
    };

    // SOC representation. The segmented models replace the aggregate SOC
    // variable with the sum of per-segment variables, so every constraint
    // that references SOC below binds to this expression, not to a variable.
    let (soc_exprs, segment_block) = if ctx.model_type.has_segments() {
        let seg = segments::build(&mut asm, ctx, &core);
        (seg.soc_exprs.clone(), Some(seg))
    } else {
        let soc = base::aggregate_soc_dynamics(&mut asm, ctx, &mut core);
        (soc, None)
    };

    base::emit_operational_constraints(&mut asm, ctx, &core, renewable.as_ref(), &soc_exprs);

    let calendar_block = if ctx.model_type.has_calendar() {
        Some(calendar::emit(&mut asm, ctx, &soc_exprs))
    } else {
        None
    };

    if let Some(renew) = &renewable {
        renewable::emit_balance(&mut asm, ctx, renew);
    }

    let profits = base::profit_expressions(ctx, &core);
    let profit_renewable_export = renewable
        .as_ref()
        .map(|r| renewable::export_profit(ctx, r));

    let mut objective = profits.profit_da.clone()
        + profits.profit_afrr_energy.clone()
        + profits.profit_as_capacity.clone();
    if let Some(export) = &profit_renewable_export {
        objective = objective + export.clone();
    }
    if let Some(seg) = &segment_block {
        objective = objective - ctx.alpha * seg.cost_cyclic.clone();
    }
    if let Some(cal) = &calendar_block {
        objective = objective - ctx.alpha * cal.cost_calendar.clone();
    }

    let num_constraints = asm.constraints.len();
    tracing::info!(
        model = %ctx.model_type,
        variables = asm.num_variables,
        constraints = num_constraints,
        steps = ctx.num_steps(),
        blocks = ctx.num_blocks(),
        "assembled optimization model"
    );

    let mut vars = core.into_model_vars();
    if let Some(seg) = segment_block.as_ref() {
        vars.e_soc_seg = seg.e_soc_seg.clone();
        vars.p_ch_seg = seg.p_ch_seg.clone();
        vars.p_dis_seg = seg.p_dis_seg.clone();
        vars.z_seg = seg.z_seg.clone();
    }
    if let Some(cal) = calendar_block.as_ref() {
        vars.lambda_cal = cal.lambda.clone();
        vars.z_cal = cal.z_interval.clone();
    }
    if let Some(renew) = renewable.as_ref() {
        vars.p_self = renew.p_self.clone();
        vars.p_export = renew.p_export.clone();
        vars.p_curtail = renew.p_curtail.clone();
    }

    let handles = ModelHandles {
        model_type: ctx.model_type,
        alpha: ctx.alpha,
        vars,
        soc_exprs,
        objective,
        profit_da: profits.profit_da,
        profit_afrr_energy: profits.profit_afrr_energy,
        profit_as_capacity: profits.profit_as_capacity,
        cost_cyclic: segment_block.as_ref().map(|s| s.cost_cyclic.clone()),
        cost_calendar: calendar_block.as_ref().map(|c| c.cost_calendar.clone()),
        calendar_step_costs: calendar_block
            .map(|c| c.step_costs)
            .unwrap_or_default(),
        profit_renewable_export,
        num_variables: asm.num_variables,
        num_constraints,
    };

    Ok(MilpInstance {
        problem: asm.problem,
        constraints: asm.constraints,
        handles,
    })
}

/// Time step duration shared by every emission site.
pub(crate) fn dt() -> f64 {
    DT_HOURS
}
