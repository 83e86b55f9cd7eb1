//! Read-only validators run against a scaffolded project.
//!
//! Each validator keeps its own entry point and argument shape; the
//! orchestrator reaches them through adapters in `core::orchestrator`.

pub mod api_sources;
pub mod api_tracer;
pub mod gateway;
pub mod introspect;
pub mod portability;
pub mod schema;
pub mod structure;
pub mod syntax;

/// Every validator, in presentation order.
pub const ALL: &[&str] = &[
    structure::NAME,
    portability::NAME,
    schema::NAME,
    api_tracer::NAME,
];

pub fn is_known(name: &str) -> bool {
    ALL.contains(&name)
}
