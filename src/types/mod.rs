//! Shared types

pub mod error;

pub use error::{DataFlowError, Result};
