//! Multi-market MILP scheduler for grid-connected battery storage.
//!
//! The scheduler co-optimizes a battery across day-ahead energy, aFRR
//! energy, FCR capacity, and aFRR capacity markets, with battery aging
//! priced into the objective and an optional co-located renewable plant.
//! Four model variants form a strict ladder (I, II, III, III-renew); a
//! rolling-horizon driver decomposes long horizons into overlapping solves.

pub mod adapter;
pub mod config;
pub mod degradation;
pub mod domain;
pub mod error;
pub mod extract;
pub mod model;
pub mod mpc;
pub mod service;
pub mod solver;
pub mod telemetry;
pub mod timegrid;

pub use config::AppConfig;
pub use domain::{
    BatteryParams, MarketPrices, ModelType, OptimizationRequest, OptimizationResult, RunStatus,
    ScheduleEntry,
};
pub use error::{Result, SchedulerError};
pub use mpc::MpcParams;
pub use service::OptimizerService;
