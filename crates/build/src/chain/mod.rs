//! Per-source transformation chains
//!
//! This module describes the ordered external tool invocations needed to build one
//! shader source, and the builder that derives them from the configuration.

mod builder;
mod step;

pub use builder::ChainBuilder;
pub use step::*;
