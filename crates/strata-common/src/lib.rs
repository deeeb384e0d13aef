//! Shared types, errors, configuration, and codec for strata.
//!
//! This crate provides the definitions used across all strata components.

pub mod codec;
pub mod config;
pub mod error;
pub mod handle;

pub use config::{StoreConfig, TreeConfig};
pub use error::{Result, StrataError};
pub use handle::ObjId;
