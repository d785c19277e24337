//! # LBBS Core
//!
//! Core types, configuration, and error definitions shared across all LBBS
//! crates.
//!
//! This crate provides:
//! - The unified error hierarchy (`LbbsError`, `ModuleError`)
//! - Configuration types for the module subsystem (`ModulesConfig`)
//! - The common `Result` alias

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;

pub use config::ModulesConfig;
pub use error::{LbbsError, ModuleError};

/// Re-export common result type
pub type Result<T> = std::result::Result<T, LbbsError>;
