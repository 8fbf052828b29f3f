//! Observability: health probes and the stats endpoint.

pub mod health;

pub use health::{observability_router, HealthState};
