//! Kubernetes integration module.
//!
//! The main components are:
//! - [`ResourceClaim`]: typed view of `resource.k8s.io/v1beta1` claims
//! - [`ClaimStatusApi`]: status sub-resource writes used by the status reporter

pub mod claim_status;
pub mod types;

pub use claim_status::ClaimStatusApi;
pub use types::*;
