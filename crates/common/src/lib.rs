//! Common types and utilities shared across the coin rates components

pub mod config;
pub mod error;
pub mod titles;
pub mod types;

pub use error::*;
pub use titles::*;
pub use types::*;
