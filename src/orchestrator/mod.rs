//! Application-level orchestration.
//!
//! This module owns run lifecycle control (start/cancel/observe) around the
//! fetch engine. Front ends call into this module to keep responsibilities
//! separated.

mod controller;

pub use controller::{drive, RunController, RunnerCommand};
