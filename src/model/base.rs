//! Model I: day-ahead energy, aFRR energy, and capacity markets against
//! aggregate SOC dynamics. Everything here is shared by the higher variants;
//! only the SOC representation differs (see `segments`).

use good_lp::{constraint, variable, Expression, Variable};

use super::renewable::RenewableVars;
use super::{dt, Assembly, ModelContext, ModelVars};

/// Minimum capacity-market bid sizes (MW). The DA and aFRR energy markets
/// have a 0.1 MW minimum bid that is deliberately not enforced: it would
/// need one binary per step and market, which wrecks solve times on
/// week-long horizons. Capacity markets already carry per-block binaries,
/// so their minimum bids are enforced exactly.
const MIN_BID_FCR_MW: f64 = 1.0;
const MIN_BID_AFRR_MW: f64 = 1.0;

/// Variable families shared by all variants.
pub(crate) struct CoreVars {
    pub p_ch: Vec<Variable>,
    pub p_dis: Vec<Variable>,
    pub p_afrr_pos_e: Vec<Variable>,
    pub p_afrr_neg_e: Vec<Variable>,
    pub p_total_ch: Vec<Variable>,
    pub p_total_dis: Vec<Variable>,
    pub y_total_ch: Vec<Variable>,
    pub y_total_dis: Vec<Variable>,
    pub c_fcr: Vec<Variable>,
    pub c_afrr_pos: Vec<Variable>,
    pub c_afrr_neg: Vec<Variable>,
    pub y_fcr: Vec<Variable>,
    pub y_afrr_pos: Vec<Variable>,
    pub y_afrr_neg: Vec<Variable>,
    /// Aggregate SOC variable; declared only by Model I.
    pub e_soc: Vec<Variable>,
}

impl CoreVars {
    pub(crate) fn into_model_vars(self) -> ModelVars {
        ModelVars {
            p_ch: self.p_ch,
            p_dis: self.p_dis,
            p_afrr_pos_e: self.p_afrr_pos_e,
            p_afrr_neg_e: self.p_afrr_neg_e,
            p_total_ch: self.p_total_ch,
            p_total_dis: self.p_total_dis,
            e_soc: self.e_soc,
            c_fcr: self.c_fcr,
            c_afrr_pos: self.c_afrr_pos,
            c_afrr_neg: self.c_afrr_neg,
            y_fcr: self.y_fcr,
            y_afrr_pos: self.y_afrr_pos,
            y_afrr_neg: self.y_afrr_neg,
            y_total_ch: self.y_total_ch,
            y_total_dis: self.y_total_dis,
            ..ModelVars::default()
        }
    }
}

pub(crate) fn declare_variables(asm: &mut Assembly, ctx: &ModelContext<'_>) -> CoreVars {
    let steps = ctx.num_steps();
    let blocks = ctx.num_blocks();
    let p_max = ctx.battery.power_kw;
    let cap_max_mw = p_max / 1000.0;

    let power = variable().min(0.0).max(p_max);
    let capacity = variable().min(0.0).max(cap_max_mw);

    CoreVars {
        p_ch: asm.add_vector(power.clone(), steps),
        p_dis: asm.add_vector(power.clone(), steps),
        p_afrr_pos_e: asm.add_vector(power.clone(), steps),
        p_afrr_neg_e: asm.add_vector(power.clone(), steps),
        p_total_ch: asm.add_vector(power.clone(), steps),
        p_total_dis: asm.add_vector(power, steps),
        y_total_ch: asm.add_vector(variable().binary(), steps),
        y_total_dis: asm.add_vector(variable().binary(), steps),
        c_fcr: asm.add_vector(capacity.clone(), blocks),
        c_afrr_pos: asm.add_vector(capacity.clone(), blocks),
        c_afrr_neg: asm.add_vector(capacity, blocks),
        y_fcr: asm.add_vector(variable().binary(), blocks),
        y_afrr_pos: asm.add_vector(variable().binary(), blocks),
        y_afrr_neg: asm.add_vector(variable().binary(), blocks),
        e_soc: Vec::new(),
    }
}

/// Model I SOC representation: one bounded variable per step with the
/// energy-balance recurrence
/// `e_soc[t] = e_soc[t-1] + (eta_ch * p_total_ch[t] - p_total_dis[t] / eta_dis) * dt`.
///
/// Returns the SOC as expressions so downstream constraints are emitted
/// identically for all variants.
pub(crate) fn aggregate_soc_dynamics(
    asm: &mut Assembly,
    ctx: &ModelContext<'_>,
    core: &mut CoreVars,
) -> Vec<Expression> {
    let steps = ctx.num_steps();
    let battery = ctx.battery;

    core.e_soc = asm.add_vector(
        variable().min(battery.soc_min_kwh()).max(battery.soc_max_kwh()),
        steps,
    );

    for t in 0..steps {
        let delta = core.p_total_ch[t] * (battery.eta_charge * dt())
            - core.p_total_dis[t] * (dt() / battery.eta_discharge);
        let previous: Expression = if t == 0 {
            battery.initial_energy_kwh.into()
        } else {
            core.e_soc[t - 1].into()
        };
        asm.push(constraint!(core.e_soc[t] == previous + delta));
    }

    core.e_soc.iter().map(|v| Expression::from(*v)).collect()
}

/// Everything that constrains market operation, shared by all variants.
/// SOC-coupled constraints bind to `soc_exprs`, which is the segment sum in
/// Models II+.
pub(crate) fn emit_operational_constraints(
    asm: &mut Assembly,
    ctx: &ModelContext<'_>,
    core: &CoreVars,
    renewable: Option<&RenewableVars>,
    soc_exprs: &[Expression],
) {
    let table = ctx.table;
    let grid = &table.grid;
    let battery = ctx.battery;
    let p_max = battery.power_kw;
    let tau = ctx.reserve_duration_hours;

    for t in 0..ctx.num_steps() {
        let b = grid.block_of(t);

        // A NaN aFRR energy price means the market was not activated
        // in this step; the corresponding power is pinned to zero.
        if table.price_afrr_energy_pos[t].is_nan() {
            asm.push(constraint!(core.p_afrr_pos_e[t] == 0.0));
        }
        if table.price_afrr_energy_neg[t].is_nan() {
            asm.push(constraint!(core.p_afrr_neg_e[t] == 0.0));
        }

        // Total power identities. Negative-direction aFRR energy charges the
        // battery, positive-direction discharges it. With a co-located
        // renewable plant, self-consumed generation also charges.
        let mut charge_sources = core.p_ch[t] + core.p_afrr_neg_e[t];
        if let Some(renew) = renewable {
            charge_sources = charge_sources + renew.p_self[t];
        }
        asm.push(constraint!(core.p_total_ch[t] == charge_sources));
        asm.push(constraint!(
            core.p_total_dis[t] == core.p_dis[t] + core.p_afrr_pos_e[t]
        ));

        // Charging and discharging are mutually exclusive per step.
        asm.push(constraint!(core.p_total_ch[t] <= core.y_total_ch[t] * p_max));
        asm.push(constraint!(core.p_total_dis[t] <= core.y_total_dis[t] * p_max));
        asm.push(constraint!(core.y_total_ch[t] + core.y_total_dis[t] <= 1.0));

        // Energy dispatch and reserved capacity share the rated
        // power. Capacities are in MW, powers in kW.
        asm.push(constraint!(
            core.p_total_dis[t] + core.c_fcr[b] * 1000.0 + core.c_afrr_pos[b] * 1000.0 <= p_max
        ));
        asm.push(constraint!(
            core.p_total_ch[t] + core.c_fcr[b] * 1000.0 + core.c_afrr_neg[b] * 1000.0 <= p_max
        ));

        // Reserved capacity must be backed by stored energy for an
        // activation of duration tau, in both directions.
        let reserved_up =
            (core.c_fcr[b] * 1000.0 + core.c_afrr_pos[b] * 1000.0) * (tau / battery.eta_discharge);
        asm.push(constraint!(
            reserved_up <= soc_exprs[t].clone() - battery.soc_min_kwh()
        ));
        let reserved_down =
            (core.c_fcr[b] * 1000.0 + core.c_afrr_neg[b] * 1000.0) * (tau * battery.eta_charge);
        asm.push(constraint!(
            reserved_down + soc_exprs[t].clone() <= battery.soc_max_kwh()
        ));

        // Cross-market exclusivity, step binaries against the
        // covering block's binaries.
        asm.push(constraint!(
            core.y_total_dis[t] + core.y_fcr[b] + core.y_afrr_neg[b] <= 1.0
        ));
        asm.push(constraint!(
            core.y_total_ch[t] + core.y_fcr[b] + core.y_afrr_pos[b] <= 1.0
        ));
    }

    for b in 0..ctx.num_blocks() {
        // At most one ancillary service per block.
        asm.push(constraint!(
            core.y_fcr[b] + core.y_afrr_pos[b] + core.y_afrr_neg[b] <= 1.0
        ));

        // Capacity market minimum/maximum bid sizes.
        asm.push(constraint!(core.c_fcr[b] >= core.y_fcr[b] * MIN_BID_FCR_MW));
        asm.push(constraint!(core.c_fcr[b] <= core.y_fcr[b] * (p_max / 1000.0)));
        asm.push(constraint!(
            core.c_afrr_pos[b] >= core.y_afrr_pos[b] * MIN_BID_AFRR_MW
        ));
        asm.push(constraint!(
            core.c_afrr_pos[b] <= core.y_afrr_pos[b] * (p_max / 1000.0)
        ));
        asm.push(constraint!(
            core.c_afrr_neg[b] >= core.y_afrr_neg[b] * MIN_BID_AFRR_MW
        ));
        asm.push(constraint!(
            core.c_afrr_neg[b] <= core.y_afrr_neg[b] * (p_max / 1000.0)
        ));

        // Keep part of the rated power out of the AS markets so the
        // energy markets stay reachable. Disabled at ratio 1.0.
        if ctx.max_as_ratio < 1.0 {
            asm.push(constraint!(
                core.c_fcr[b] + core.c_afrr_pos[b] + core.c_afrr_neg[b]
                    <= ctx.max_as_ratio * (p_max / 1000.0)
            ));
        }
    }

    // Daily discharge-throughput cap, base model only. The segmented
    // models price cycling through the cyclic aging cost instead.
    if !ctx.model_type.has_segments() {
        if let Some(cycles) = battery.daily_cycle_limit {
            for d in 0..grid.num_days() {
                let mut discharged = Expression::from(0.0);
                for &t in grid.steps_in_day(d) {
                    discharged = discharged + core.p_dis[t] * (dt() / battery.eta_discharge);
                }
                asm.push(constraint!(
                    discharged <= cycles * battery.capacity_kwh
                ));
            }
        }
    }
}

pub(crate) struct ProfitParts {
    pub profit_da: Expression,
    pub profit_afrr_energy: Expression,
    pub profit_as_capacity: Expression,
}

/// The three market profit expressions, kept by name so the extractor can
/// report a revenue breakdown.
pub(crate) fn profit_expressions(ctx: &ModelContext<'_>, core: &CoreVars) -> ProfitParts {
    let table = ctx.table;

    let mut profit_da = Expression::from(0.0);
    for t in 0..ctx.num_steps() {
        // Prices are EUR/MWh against kW powers, hence the /1000.
        let rate = table.price_day_ahead[t] / 1000.0 * dt();
        profit_da = profit_da + rate * (core.p_dis[t] - core.p_ch[t]);
    }

    // Both aFRR energy directions earn revenue; the negative direction pays
    // the battery for charging. Inactive (NaN) steps contribute coefficient
    // zero and their powers are pinned to zero anyway.
    let mut profit_afrr_energy = Expression::from(0.0);
    for t in 0..ctx.num_steps() {
        let pos = table.price_afrr_energy_pos[t];
        if !pos.is_nan() {
            let rate = pos / 1000.0 * table.w_afrr_pos[t] * dt();
            profit_afrr_energy = profit_afrr_energy + core.p_afrr_pos_e[t] * rate;
        }
        let neg = table.price_afrr_energy_neg[t];
        if !neg.is_nan() {
            let rate = neg / 1000.0 * table.w_afrr_neg[t] * dt();
            profit_afrr_energy = profit_afrr_energy + core.p_afrr_neg_e[t] * rate;
        }
    }

    // Capacity prices are EUR/MW per 4-hour block; the block duration is
    // already priced in, so there is no extra factor here.
    let mut profit_as_capacity = Expression::from(0.0);
    for b in 0..ctx.num_blocks() {
        profit_as_capacity = profit_as_capacity
            + core.c_fcr[b] * table.price_fcr[b]
            + core.c_afrr_pos[b] * table.price_afrr_cap_pos[b]
            + core.c_afrr_neg[b] * table.price_afrr_cap_neg[b];
    }

    ProfitParts {
        profit_da,
        profit_afrr_energy,
        profit_as_capacity,
    }
}
