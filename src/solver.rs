//! Backend selection and the solve call.
//!
//! The driver never returns `Err` from a solve: infeasibility, time limits
//! and backend failures are terminations the caller inspects. Selection
//! precedence is an explicit override from configuration, else HiGHS when
//! compiled in, else CBC. There is no retry logic anywhere; the caller
//! decides what a timeout means.

use std::time::Instant;

use good_lp::{Constraint, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable};
use strum_macros::{Display, EnumString};

#[cfg(feature = "cbc")]
use good_lp::coin_cbc;
#[cfg(feature = "cbc")]
use good_lp::solvers::coin_cbc::CoinCbcSolution;
#[cfg(feature = "highs")]
use good_lp::highs;
#[cfg(feature = "highs")]
use good_lp::solvers::highs::HighsSolution;

use crate::config::SolverConfig;
use crate::domain::RunStatus;
use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SolverBackend {
    Cbc,
    Highs,
}

/// Terminal outcome of one solve.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    Optimal,
    Feasible,
    Infeasible,
    TimeLimit,
    Error(String),
}

impl Termination {
    pub fn run_status(&self) -> RunStatus {
        match self {
            Termination::Optimal => RunStatus::Optimal,
            Termination::Feasible => RunStatus::Feasible,
            Termination::Infeasible => RunStatus::Infeasible,
            Termination::TimeLimit => RunStatus::Timeout,
            Termination::Error(_) => RunStatus::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Termination::Optimal | Termination::Feasible)
    }
}

#[derive(Debug, Clone)]
pub struct SolveReport {
    pub termination: Termination,
    pub solve_time_seconds: f64,
    pub solver_name: String,
}

/// Primal solution behind whichever backend ran.
pub enum SolverSolution {
    #[cfg(feature = "cbc")]
    Cbc(CoinCbcSolution),
    #[cfg(feature = "highs")]
    Highs(HighsSolution),
}

impl SolverSolution {
    pub fn value(&self, variable: Variable) -> f64 {
        match self {
            #[cfg(feature = "cbc")]
            SolverSolution::Cbc(s) => s.value(variable),
            #[cfg(feature = "highs")]
            SolverSolution::Highs(s) => s.value(variable),
            #[allow(unreachable_patterns)]
            _ => unreachable!("no backend compiled"),
        }
    }

    pub fn eval(&self, expr: &Expression) -> f64 {
        match self {
            #[cfg(feature = "cbc")]
            SolverSolution::Cbc(s) => s.eval(expr),
            #[cfg(feature = "highs")]
            SolverSolution::Highs(s) => s.eval(expr),
            #[allow(unreachable_patterns)]
            _ => unreachable!("no backend compiled"),
        }
    }
}

pub struct SolveOutcome {
    pub report: SolveReport,
    pub solution: Option<SolverSolution>,
}

/// Maps the shared knobs (wall-time limit, relative MIP gap, quiet logs)
/// onto whichever backend is selected.
#[derive(Debug, Clone)]
pub struct SolverDriver {
    pub backend: SolverBackend,
    pub time_limit_secs: u64,
    pub mip_rel_gap: f64,
}

impl SolverDriver {
    pub fn from_config(config: &SolverConfig) -> Result<Self> {
        let backend = select_backend(config.backend.as_deref())?;
        Ok(Self {
            backend,
            time_limit_secs: config.time_limit_secs,
            mip_rel_gap: config.mip_rel_gap,
        })
    }

    /// Solve a maximization problem. Consumes the assembled parts; the
    /// caller keeps its variable handles and expressions for extraction.
    pub fn solve(
        &self,
        problem: ProblemVariables,
        objective: Expression,
        constraints: Vec<Constraint>,
    ) -> SolveOutcome {
        let started = Instant::now();

        let (termination, solution) = match self.backend {
            #[cfg(feature = "cbc")]
            SolverBackend::Cbc => self.solve_cbc(problem, objective, constraints),
            #[cfg(feature = "highs")]
            SolverBackend::Highs => self.solve_highs(problem, objective, constraints),
            #[allow(unreachable_patterns)]
            _ => (
                Termination::Error(format!(
                    "solver backend {} is not compiled into this build",
                    self.backend
                )),
                None,
            ),
        };

        let solve_time_seconds = started.elapsed().as_secs_f64();
        let report = SolveReport {
            termination,
            solve_time_seconds,
            solver_name: self.backend.to_string(),
        };

        match &report.termination {
            Termination::Optimal | Termination::Feasible => {
                tracing::info!(
                    solver = %report.solver_name,
                    seconds = report.solve_time_seconds,
                    "solve finished"
                );
            }
            other => {
                tracing::warn!(
                    solver = %report.solver_name,
                    seconds = report.solve_time_seconds,
                    termination = ?other,
                    "solve did not produce a solution"
                );
            }
        }

        SolveOutcome {
            report,
            solution,
        }
    }

    #[cfg(feature = "cbc")]
    fn solve_cbc(
        &self,
        problem: ProblemVariables,
        objective: Expression,
        constraints: Vec<Constraint>,
    ) -> (Termination, Option<SolverSolution>) {
        let mut model = problem.maximise(objective).using(coin_cbc);
        for constraint in constraints {
            model.add_constraint(constraint);
        }
        model.set_parameter("logLevel", "0");
        model.set_parameter("seconds", &self.time_limit_secs.to_string());
        model.set_parameter("ratio", &self.mip_rel_gap.to_string());

        match model.solve() {
            Ok(solution) => (Termination::Optimal, Some(SolverSolution::Cbc(solution))),
            Err(err) => (map_resolution_error(err), None),
        }
    }

    #[cfg(feature = "highs")]
    fn solve_highs(
        &self,
        problem: ProblemVariables,
        objective: Expression,
        constraints: Vec<Constraint>,
    ) -> (Termination, Option<SolverSolution>) {
        let mut model = problem.maximise(objective).using(highs);
        for constraint in constraints {
            model.add_constraint(constraint);
        }
        model.set_verbose(false);
        model.set_time_limit(self.time_limit_secs as f64);
        model.set_mip_rel_gap(self.mip_rel_gap);

        match model.solve() {
            Ok(solution) => (Termination::Optimal, Some(SolverSolution::Highs(solution))),
            Err(err) => (map_resolution_error(err), None),
        }
    }
}

/// Resolve the backend with the documented precedence. An explicit override
/// naming a backend that is not compiled in is a configuration fault, not a
/// silent fallback.
pub fn select_backend(explicit: Option<&str>) -> Result<SolverBackend> {
    if let Some(name) = explicit {
        let backend: SolverBackend = name
            .to_lowercase()
            .parse()
            .map_err(|_| SchedulerError::configuration(format!("unknown solver backend: {name}")))?;
        if !backend_available(backend) {
            return Err(SchedulerError::configuration(format!(
                "solver backend {backend} is not compiled into this build"
            )));
        }
        return Ok(backend);
    }

    if cfg!(feature = "highs") {
        Ok(SolverBackend::Highs)
    } else if cfg!(feature = "cbc") {
        Ok(SolverBackend::Cbc)
    } else {
        Err(SchedulerError::configuration(
            "no solver backend compiled in; enable the `cbc` or `highs` feature",
        ))
    }
}

fn backend_available(backend: SolverBackend) -> bool {
    match backend {
        SolverBackend::Cbc => cfg!(feature = "cbc"),
        SolverBackend::Highs => cfg!(feature = "highs"),
    }
}

/// A stopped run is a wall-clock timeout; everything else that is neither
/// infeasible nor unbounded is a backend-internal failure.
fn map_resolution_error(err: ResolutionError) -> Termination {
    match err {
        ResolutionError::Infeasible => Termination::Infeasible,
        ResolutionError::Unbounded => Termination::Error("problem is unbounded".to_string()),
        ResolutionError::Other(msg) if msg.eq_ignore_ascii_case("stopped") => Termination::TimeLimit,
        other => Termination::Error(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_precedence_without_override() {
        let backend = select_backend(None).unwrap();
        if cfg!(feature = "highs") {
            assert_eq!(backend, SolverBackend::Highs);
        } else {
            assert_eq!(backend, SolverBackend::Cbc);
        }
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(select_backend(Some("gurobi")).is_err());
    }

    #[test]
    fn test_termination_status_mapping() {
        assert_eq!(Termination::Optimal.run_status(), RunStatus::Optimal);
        assert_eq!(Termination::TimeLimit.run_status(), RunStatus::Timeout);
        assert_eq!(
            Termination::Error("x".to_string()).run_status(),
            RunStatus::Error
        );
        assert!(!Termination::Infeasible.is_success());
    }

    #[cfg(any(feature = "cbc", feature = "highs"))]
    mod with_backend {
        use super::*;
        use good_lp::{constraint, variable};

        fn driver() -> SolverDriver {
            SolverDriver::from_config(&SolverConfig::default()).unwrap()
        }

        #[test]
        fn test_trivial_lp_solves_to_bound() {
            let mut problem = ProblemVariables::new();
            let x = problem.add(variable().min(0.0).max(10.0));
            let constraints = vec![constraint!(x <= 5.0)];

            let outcome = driver().solve(problem, x.into(), constraints);
            assert_eq!(outcome.report.termination, Termination::Optimal);
            let solution = outcome.solution.unwrap();
            assert!((solution.value(x) - 5.0).abs() < 1e-6);
        }

        #[test]
        fn test_infeasible_model_reported_not_raised() {
            let mut problem = ProblemVariables::new();
            let x = problem.add(variable().min(0.0).max(10.0));
            let constraints = vec![constraint!(x <= 2.0), constraint!(x >= 7.0)];

            let outcome = driver().solve(problem, x.into(), constraints);
            assert_eq!(outcome.report.termination, Termination::Infeasible);
            assert!(outcome.solution.is_none());
        }
    }
}
