// src/health/mod.rs
mod probe;
mod registry;

pub use probe::{status_for_latency, HealthProbe, Prober};
pub use registry::{ServiceDescriptor, ServiceRegistry, StaticRegistry};
