//! Stacked-tank cyclic aging (Model II).
//!
//! The battery is split into equal segments that fill shallowest-first and
//! empty shallowest-last. Segment j may hold energy only while segment j-1
//! is full (LIFO fullness, relaxed by a small epsilon for tractability).
//! Discharge throughput per segment is charged at that segment's marginal
//! cost, which makes deep cycles more expensive than shallow ones.

use good_lp::{constraint, variable, Expression, Variable};

use super::base::CoreVars;
use super::{dt, Assembly, ModelContext};

pub(crate) struct SegmentVars {
    /// Indexed [step][segment], shallowest segment first.
    pub e_soc_seg: Vec<Vec<Variable>>,
    pub p_ch_seg: Vec<Vec<Variable>>,
    pub p_dis_seg: Vec<Vec<Variable>>,
    pub z_seg: Vec<Vec<Variable>>,
    /// Aggregate SOC per step: the sum over segments.
    pub soc_exprs: Vec<Expression>,
    /// Unweighted cyclic aging cost over the horizon (EUR).
    pub cost_cyclic: Expression,
}

pub(crate) fn build(asm: &mut Assembly, ctx: &ModelContext<'_>, core: &CoreVars) -> SegmentVars {
    let steps = ctx.num_steps();
    let cyclic = &ctx.degradation.cyclic;
    let battery = ctx.battery;
    let segments = cyclic.num_segments();
    let seg_kwh = cyclic.segment_kwh;
    let epsilon = ctx.degradation.lifo_epsilon_kwh;
    let p_max = battery.power_kw;

    let mut e_soc_seg = Vec::with_capacity(steps);
    let mut p_ch_seg = Vec::with_capacity(steps);
    let mut p_dis_seg = Vec::with_capacity(steps);
    let mut z_seg = Vec::with_capacity(steps);
    for _ in 0..steps {
        e_soc_seg.push(asm.add_vector(variable().min(0.0).max(seg_kwh), segments));
        p_ch_seg.push(asm.add_vector(variable().min(0.0).max(p_max), segments));
        p_dis_seg.push(asm.add_vector(variable().min(0.0).max(p_max), segments));
        z_seg.push(asm.add_vector(variable().binary(), segments));
    }

    // The initial energy fills segments top-down before any dynamics apply.
    let initial = cyclic.initial_split(battery.initial_energy_kwh);

    for t in 0..steps {
        for j in 0..segments {
            // Per-segment energy balance, same recurrence as the aggregate.
            let delta = p_ch_seg[t][j] * (battery.eta_charge * dt())
                - p_dis_seg[t][j] * (dt() / battery.eta_discharge);
            let previous: Expression = if t == 0 {
                initial[j].into()
            } else {
                e_soc_seg[t - 1][j].into()
            };
            asm.push(constraint!(e_soc_seg[t][j] == previous + delta));

            // Stacked-tank ordering: shallower segments hold at least as
            // much as deeper ones.
            if j + 1 < segments {
                asm.push(constraint!(e_soc_seg[t][j] >= e_soc_seg[t][j + 1]));
            }

            // LIFO fullness: a segment may hold energy only when active,
            // and may be active only once its shallower neighbour is full
            // (within epsilon).
            asm.push(constraint!(e_soc_seg[t][j] <= z_seg[t][j] * seg_kwh));
            if j >= 1 {
                asm.push(constraint!(
                    e_soc_seg[t][j - 1] >= z_seg[t][j] * (seg_kwh - epsilon)
                ));
            }

            // Strict mode additionally forbids power through inactive
            // segments. The ordering and LIFO constraints already produce
            // near-sequential filling, so this is off by default; enabling
            // it costs roughly an order of magnitude in solve time.
            if ctx.degradation.require_sequential_segment_activation {
                asm.push(constraint!(p_ch_seg[t][j] <= z_seg[t][j] * p_max));
                asm.push(constraint!(p_dis_seg[t][j] <= z_seg[t][j] * p_max));
            }
        }

        // Total power routes through the segments.
        let mut ch_sum = Expression::from(0.0);
        let mut dis_sum = Expression::from(0.0);
        for j in 0..segments {
            ch_sum = ch_sum + p_ch_seg[t][j];
            dis_sum = dis_sum + p_dis_seg[t][j];
        }
        asm.push(constraint!(core.p_total_ch[t] == ch_sum));
        asm.push(constraint!(core.p_total_dis[t] == dis_sum));
    }

    // Aggregate SOC becomes an expression over the segment variables. The
    // per-segment bounds only give [0, E_nom]; the configured envelope must
    // be re-imposed on the sum.
    let mut soc_exprs = Vec::with_capacity(steps);
    for t in 0..steps {
        let mut sum = Expression::from(0.0);
        for j in 0..segments {
            sum = sum + e_soc_seg[t][j];
        }
        if battery.soc_min > 0.0 {
            asm.push(constraint!(sum.clone() >= battery.soc_min_kwh()));
        }
        if battery.soc_max < 1.0 {
            asm.push(constraint!(sum.clone() <= battery.soc_max_kwh()));
        }
        soc_exprs.push(sum);
    }

    // Cyclic aging charges the energy drawn out of each segment at that
    // segment's marginal cost.
    let mut cost_cyclic = Expression::from(0.0);
    for t in 0..steps {
        for (j, cost) in cyclic.segment_costs.iter().enumerate() {
            cost_cyclic = cost_cyclic + p_dis_seg[t][j] * (cost * dt() / battery.eta_discharge);
        }
    }

    SegmentVars {
        e_soc_seg,
        p_ch_seg,
        p_dis_seg,
        z_seg,
        soc_exprs,
        cost_cyclic,
    }
}
