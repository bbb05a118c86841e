pub mod config;
pub mod domain;
pub mod flows;
pub mod loader;
pub mod repo;
pub mod solver;
pub mod telemetry;
