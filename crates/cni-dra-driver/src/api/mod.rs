//! Local HTTP bridge for the host plugin managers
//!
//! Exposes the allocation callbacks, the registration report and the sandbox hooks of
//! the driver to the node services calling into it.

use core::error::Error;

pub mod handlers;
pub mod server;

pub use server::ApiServer;

/// API errors
#[derive(Debug, derive_more::Display)]
pub enum ApiError {
    #[display("Server error: {message}")]
    ServerError { message: String },
}

impl Error for ApiError {}
