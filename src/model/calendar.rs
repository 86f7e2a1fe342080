//! Calendar aging (Model III).
//!
//! The SOC-dependent holding cost is a piecewise-linear curve over the
//! configured breakpoints. The interpolation weights form an SOS2 set (at
//! most two nonzero weights, and only adjacent ones); good_lp has no native
//! SOS2 support, so the set is emulated with one adjacency binary per
//! breakpoint interval.

use good_lp::{constraint, variable, Expression, Variable};

use super::{dt, Assembly, ModelContext};

pub(crate) struct CalendarVars {
    /// Interpolation weights, indexed [step][breakpoint].
    pub lambda: Vec<Vec<Variable>>,
    /// Interval selectors, indexed [step][interval] with one interval per
    /// adjacent breakpoint pair.
    pub z_interval: Vec<Vec<Variable>>,
    /// Interpolated holding cost per step (EUR/h).
    pub step_costs: Vec<Expression>,
    /// Unweighted calendar aging cost over the horizon (EUR).
    pub cost_calendar: Expression,
}

pub(crate) fn emit(
    asm: &mut Assembly,
    ctx: &ModelContext<'_>,
    soc_exprs: &[Expression],
) -> CalendarVars {
    let steps = ctx.num_steps();
    let breakpoints = &ctx.degradation.calendar.breakpoints;
    let n_points = breakpoints.len();
    let n_intervals = n_points - 1;

    let mut lambda = Vec::with_capacity(steps);
    let mut z_interval = Vec::with_capacity(steps);
    let mut step_costs = Vec::with_capacity(steps);
    let mut cost_calendar = Expression::from(0.0);

    for t in 0..steps {
        let lam = asm.add_vector(variable().min(0.0).max(1.0), n_points);
        let z = asm.add_vector(variable().binary(), n_intervals);

        // Convexity: the weights describe exactly one point on the curve.
        let mut lam_sum = Expression::from(0.0);
        for &l in &lam {
            lam_sum = lam_sum + l;
        }
        asm.push(constraint!(lam_sum == 1.0));

        // Exactly one interval is selected, and only the two breakpoints
        // bounding it may carry weight. This is the standard SOS2 emulation.
        let mut z_sum = Expression::from(0.0);
        for &zi in &z {
            z_sum = z_sum + zi;
        }
        asm.push(constraint!(z_sum == 1.0));

        for i in 0..n_points {
            let mut allowed = Expression::from(0.0);
            if i > 0 {
                allowed = allowed + z[i - 1];
            }
            if i < n_intervals {
                allowed = allowed + z[i];
            }
            asm.push(constraint!(lam[i] <= allowed));
        }

        // Anchor the weights to the aggregate SOC.
        let mut soc_interp = Expression::from(0.0);
        let mut cost_interp = Expression::from(0.0);
        for (i, (soc_kwh, cost_per_hour)) in breakpoints.iter().enumerate() {
            soc_interp = soc_interp + lam[i] * *soc_kwh;
            cost_interp = cost_interp + lam[i] * *cost_per_hour;
        }
        asm.push(constraint!(soc_exprs[t].clone() == soc_interp));

        cost_calendar = cost_calendar + cost_interp.clone() * dt();
        step_costs.push(cost_interp);
        lambda.push(lam);
        z_interval.push(z);
    }

    CalendarVars {
        lambda,
        z_interval,
        step_costs,
        cost_calendar,
    }
}
