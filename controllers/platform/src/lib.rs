//! Platform Controller
//!
//! Reconciles the virtual machines of OpenNebula platforms against their
//! definition files:
//! - `config`: command line, environment and engine settings
//! - `reconciler`: classification, differences and per-action operations
//! - `controller`: per-document driver
//! - `report`: per-machine outcomes printed for each document, even when it
//!   stops early

pub mod config;
pub mod controller;
pub mod error;
pub mod reconciler;
pub mod report;

pub use config::{Action, Args, EngineConfig, FailurePolicy, LogLevel};
pub use controller::Controller;
pub use error::ControllerError;
pub use reconciler::{Classification, Reconciler};
pub use report::{Outcome, Report};
