use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

use super::ModelType;

/// Terminal status of one optimization run.
///
/// Infeasibility and timeouts are normal outcomes reported with full
/// metadata, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Optimal,
    Feasible,
    Infeasible,
    Timeout,
    Error,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Optimal | RunStatus::Feasible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScheduleAction {
    Charge,
    Discharge,
    Idle,
}

/// Which market dominates a schedule step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MarketTag {
    Da,
    Fcr,
    AfrrCap,
    AfrrEnergy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RenewableAction {
    SelfConsume,
    Export,
    Curtail,
}

/// One 15-minute step of the committed schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub timestamp: DateTime<Utc>,
    pub action: ScheduleAction,
    pub power_kw: f64,
    pub market: MarketTag,
    /// SOC after this step as a fraction of capacity, clamped to [0, 1]
    /// to absorb floating-point drift.
    pub soc_after: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewable_action: Option<RenewableAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewable_power_kw: Option<f64>,
}

/// Revenue by market (EUR over the horizon).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevenueBreakdown {
    pub da: f64,
    pub afrr_energy: f64,
    pub fcr: f64,
    pub renewable_export: f64,
}

/// How the renewable forecast was dispatched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenewableUtilization {
    pub total_generation_kwh: f64,
    pub self_consumption_kwh: f64,
    pub export_kwh: f64,
    pub curtailment_kwh: f64,
    /// (self + export) / total; 1.0 when there is no generation.
    pub utilization_rate: f64,
}

/// The schedule plus financial summary returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub id: Uuid,
    pub model_type: ModelType,
    pub status: RunStatus,

    pub objective_value: f64,
    /// Objective minus total degradation cost.
    pub net_profit: f64,
    pub revenue_breakdown: RevenueBreakdown,

    /// Alpha-weighted aging costs actually charged in the objective.
    pub cyclic_aging_cost: f64,
    pub calendar_aging_cost: f64,
    pub degradation_cost: f64,

    pub schedule: Vec<ScheduleEntry>,
    /// SOC after each step as a fraction in [0, 1].
    pub soc_trajectory: Vec<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewable_utilization: Option<RenewableUtilization>,

    pub solve_time_seconds: f64,
    pub solver_name: String,
    pub num_variables: usize,
    pub num_constraints: usize,
}

impl OptimizationResult {
    /// Diagnostic result for a solve that produced no usable primal
    /// solution. The schedule is empty; the status says why.
    pub fn empty(
        model_type: ModelType,
        status: RunStatus,
        solver_name: impl Into<String>,
        solve_time_seconds: f64,
        num_variables: usize,
        num_constraints: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_type,
            status,
            objective_value: 0.0,
            net_profit: 0.0,
            revenue_breakdown: RevenueBreakdown::default(),
            cyclic_aging_cost: 0.0,
            calendar_aging_cost: 0.0,
            degradation_cost: 0.0,
            schedule: Vec::new(),
            soc_trajectory: Vec::new(),
            renewable_utilization: None,
            solve_time_seconds,
            solver_name: solver_name.into(),
            num_variables,
            num_constraints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&RunStatus::Optimal).unwrap(), "\"optimal\"");
        assert_eq!(serde_json::to_string(&RunStatus::Timeout).unwrap(), "\"timeout\"");
        assert_eq!(RunStatus::Infeasible.to_string(), "infeasible");
    }

    #[test]
    fn test_market_tag_serialization() {
        assert_eq!(serde_json::to_string(&MarketTag::AfrrCap).unwrap(), "\"afrr_cap\"");
        assert_eq!(
            serde_json::to_string(&RenewableAction::SelfConsume).unwrap(),
            "\"self_consume\""
        );
    }

    #[test]
    fn test_empty_result_has_no_schedule() {
        let result = OptimizationResult::empty(ModelType::I, RunStatus::Infeasible, "cbc", 0.2, 10, 20);
        assert!(result.schedule.is_empty());
        assert!(result.soc_trajectory.is_empty());
        assert_eq!(result.status, RunStatus::Infeasible);
        assert_eq!(result.num_constraints, 20);
    }
}
