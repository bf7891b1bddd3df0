mod error;
mod routes;
mod telemetry;

pub mod app;
pub mod config;
pub mod prediction;
pub mod server;
pub mod store;
pub mod video;

pub use app::start_app;
