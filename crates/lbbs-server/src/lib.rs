//! # LBBS Server
//!
//! Main server binary and integration crate.
//!
//! This crate wires together the LBBS components:
//! - Module loader lifecycle (autoload at startup, unload at shutdown)
//! - Sysop console command surface
//! - Configuration from environment or JSON file

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod console;

pub use config::ServerConfig;
pub use console::{ConsoleRegistry, ConsoleReply};
