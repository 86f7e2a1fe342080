//! Co-located renewable dispatch (Model III-renew).
//!
//! Forecast generation is split into self-consumption (routed through the
//! battery's charge path, where it occupies segments and pays cyclic cost),
//! grid export at the day-ahead price, and free curtailment. The optimizer
//! balances the three endogenously.

use good_lp::{constraint, variable, Expression, Variable};

use super::{dt, Assembly, ModelContext};

pub(crate) struct RenewableVars {
    pub p_self: Vec<Variable>,
    pub p_export: Vec<Variable>,
    pub p_curtail: Vec<Variable>,
}

pub(crate) fn declare_variables(asm: &mut Assembly, ctx: &ModelContext<'_>) -> RenewableVars {
    let forecast = ctx
        .table
        .renewable_kw
        .as_ref()
        .expect("renewable path requires a forecast; checked in ModelContext::validate");

    let mut p_self = Vec::with_capacity(forecast.len());
    let mut p_export = Vec::with_capacity(forecast.len());
    let mut p_curtail = Vec::with_capacity(forecast.len());
    for &gen_kw in forecast {
        // Each split member is individually capped by the step's forecast;
        // the balance equality ties them together.
        p_self.push(asm.add(variable().min(0.0).max(gen_kw)));
        p_export.push(asm.add(variable().min(0.0).max(gen_kw)));
        p_curtail.push(asm.add(variable().min(0.0).max(gen_kw)));
    }

    RenewableVars {
        p_self,
        p_export,
        p_curtail,
    }
}

/// The forecast is fully allocated every step.
pub(crate) fn emit_balance(asm: &mut Assembly, ctx: &ModelContext<'_>, vars: &RenewableVars) {
    let forecast = ctx.table.renewable_kw.as_ref().expect("checked in validate");
    for (t, &gen_kw) in forecast.iter().enumerate() {
        asm.push(constraint!(
            vars.p_self[t] + vars.p_export[t] + vars.p_curtail[t] == gen_kw
        ));
    }
}

/// Export earns the day-ahead price.
pub(crate) fn export_profit(ctx: &ModelContext<'_>, vars: &RenewableVars) -> Expression {
    let mut profit = Expression::from(0.0);
    for (t, &price) in ctx.table.price_day_ahead.iter().enumerate() {
        profit = profit + vars.p_export[t] * (price / 1000.0 * dt());
    }
    profit
}
