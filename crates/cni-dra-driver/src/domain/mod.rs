pub mod cni;
pub mod discovery;
pub mod driver;
pub mod nri;
pub mod registration;
pub mod status;
pub mod store;
pub mod traits;
