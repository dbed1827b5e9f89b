pub mod api;
pub mod builder;
pub mod handler;
pub mod listener;

pub use api::{ApiError, HealthApi};
pub use builder::ServerBuilder;
pub use handler::RequestHandler;
