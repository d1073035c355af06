pub use crate::config;
pub use crate::logging::*;
