//! Shared types for Tether

pub mod envelope;
pub mod error;

pub use envelope::DataEnvelope;
pub use error::{Result, TetherError};
