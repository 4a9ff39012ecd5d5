//! Handlers 模块

pub mod health;
pub mod metrics;
pub mod recovery;

pub use health::*;
pub use metrics::*;
pub use recovery::*;
