pub mod config;
pub mod error;

pub use config::{ClusterConfig, DebugFlags};
pub use error::*;
