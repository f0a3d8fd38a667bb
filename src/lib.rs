/// ARBITRA
///
/// Host-side entry point of the Arbitra workspace. The protocol itself lives
/// in the `arbitra-*` crates; this crate drives scripted sessions against it.

pub mod simulation;

pub use simulation::{
    ProcessReport, ProcessScript, Rail, ServiceScript, Simulation, SimulationConfig,
    SimulationReport, StakeReport, ValidatorScript,
};
