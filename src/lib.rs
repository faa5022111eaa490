pub mod cli;
pub mod engine;
pub mod error;
pub mod logger;
pub mod model;
pub mod orchestrator;
