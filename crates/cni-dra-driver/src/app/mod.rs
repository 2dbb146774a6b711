//! Application module
//!
//! Wiring of the driver components and lifecycle of the long-running tasks.

pub mod builder;
pub mod core;
pub mod tasks;

pub use self::builder::ApplicationBuilder;
pub use self::core::Application;
