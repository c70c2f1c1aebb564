//!
//! strata-std-core - Shared Types
//!
//! This crate provides the pieces every strata primitive agrees on:
//!
//! - `SyncError` and `PopError`, the error taxonomy of the toolkit
//! - `Rank`, the position of a lock in the global acquisition order
//! - `ToolkitConfig`, optional TOML-loadable capacities and rank table
//!

pub mod config;
pub mod error;

pub use config::*;
pub use error::*;
