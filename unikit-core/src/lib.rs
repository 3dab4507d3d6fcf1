pub mod compiler;
pub mod config;
pub mod deadline;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod resolve;
pub mod types;

#[cfg(test)]
mod tests;

pub use compiler::*;
pub use config::*;
pub use deadline::with_deadline;
pub use error::*;
pub use logging::{InstanceLogger, LogLevel};
pub use pipeline::{BuildRequest, build_image};
pub use provider::*;
pub use registry::Providers;
pub use resolve::resolve;
pub use types::*;
