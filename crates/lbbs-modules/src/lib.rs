//! # LBBS Modules
//!
//! Dynamic module loader and lifecycle manager, the process-wide subsystem
//! that discovers, loads, registers, reference-counts, depends, reloads,
//! and unloads pluggable units of functionality: network services
//! (SMTP, IMAP, IRC) and domain features (ChanServ, mailbox events).
//!
//! ## Important Security Note
//!
//! This loads native code that has full system access. Modules are
//! TRUSTED; there is no sandboxing.
//!
//! ## Features
//!
//! - Dynamic library loading via libloading
//! - Reference-counted module lifetimes with dependency pinning
//! - Deferred reloads that fire when the refcount returns to zero
//! - Built-in (in-process) module discovery via the inventory crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod autoload;
pub mod backend;
pub mod deps;
pub mod descriptor;
pub mod lifecycle;
pub mod module;
pub mod registry;

pub use autoload::AutoloadReport;
pub use descriptor::{ModuleDescriptor, ModuleFlags};
pub use lifecycle::{ModuleLoader, ReloadOutcome};
pub use module::{BuiltinModule, Module, ModuleContext, SelfToken};
pub use registry::{ModuleRef, ModuleState, ModuleStatus};

// Collect all built-in module registrations
inventory::collect!(BuiltinModule);

/// Discover all built-in modules compiled into this process.
#[must_use]
pub fn builtin_modules() -> Vec<&'static BuiltinModule> {
    inventory::iter::<BuiltinModule>().collect()
}
