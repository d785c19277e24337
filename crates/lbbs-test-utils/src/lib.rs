//! # LBBS Test Utils
//!
//! Shared test fixtures for exercising the module loader: scriptable
//! in-process modules with call counters and failure switches, and a
//! harness that wires them into a loader instance.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fixtures;
pub mod harness;

pub use fixtures::{ModuleCalls, ScriptedModuleBuilder};
pub use harness::LoaderHarness;
