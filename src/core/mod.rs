//! Core modules for CORA's scaffolding engine and certification runs.
//!
//! Catalog loading, resolution, config merging and scaffolding live here,
//! together with the shared report model and the orchestrator that drives
//! the validators.

pub mod certification;
pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod merge;
pub mod orchestrator;
pub mod registry;
pub mod render;
pub mod report;
pub mod resolver;
pub mod scaffold;
pub mod walk;
