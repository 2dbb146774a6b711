//! Process-level helpers shared by the workspace binaries.

mod build_info;
pub mod logging;
pub mod version;
