//! Sysop console command surface.
//!
//! Maps command names to handlers operating on the module loader. Every
//! command returns promptly with a numeric status and a message list;
//! the deferred-reload queue is drained between commands.
//!
//! # Commands
//!
//! - `load <name>`
//! - `unload <name>` — fails while references or dependents exist
//! - `reload <name> [--queue]` — without `--queue`, refuses when busy
//! - `modules` — lists name, description, refcount, state
//! - `help`

use std::collections::HashMap;

use lbbs_modules::{ModuleLoader, ReloadOutcome};
use tracing::debug;

/// Result of one console command.
#[derive(Debug)]
pub struct ConsoleReply {
    /// Exit status: 0 on success, non-zero on failure.
    pub code: i32,
    /// Human-readable output lines.
    pub messages: Vec<String>,
}

impl ConsoleReply {
    fn ok(message: String) -> Self {
        Self {
            code: 0,
            messages: vec![message],
        }
    }

    fn ok_many(messages: Vec<String>) -> Self {
        Self { code: 0, messages }
    }

    fn err(message: String) -> Self {
        Self {
            code: 1,
            messages: vec![message],
        }
    }
}

/// Handler function type for console commands.
pub type ConsoleHandler = Box<dyn Fn(&ModuleLoader, &[&str]) -> ConsoleReply + Send + Sync>;

/// Registry mapping console command names to handlers.
pub struct ConsoleRegistry {
    commands: HashMap<String, ConsoleHandler>,
}

impl ConsoleRegistry {
    /// Create a new empty console registry.
    #[must_use]
    pub fn new() -> Self {
        debug!("Creating new ConsoleRegistry");
        Self {
            commands: HashMap::new(),
        }
    }

    /// Create a registry with the built-in module commands.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register("load", |loader, args| {
            let [name] = args else {
                return ConsoleReply::err("usage: load <name>".to_string());
            };
            match loader.load(name) {
                Ok(()) => ConsoleReply::ok(format!("loaded {name}")),
                Err(e) => ConsoleReply::err(e.to_string()),
            }
        });

        registry.register("unload", |loader, args| {
            let [name] = args else {
                return ConsoleReply::err("usage: unload <name>".to_string());
            };
            match loader.unload(name) {
                Ok(()) => ConsoleReply::ok(format!("unloaded {name}")),
                Err(e) => ConsoleReply::err(e.to_string()),
            }
        });

        registry.register("reload", |loader, args| {
            let (name, queue) = match args {
                [name] => (*name, false),
                [name, "--queue"] => (*name, true),
                _ => return ConsoleReply::err("usage: reload <name> [--queue]".to_string()),
            };
            match loader.reload(name, queue) {
                Ok(ReloadOutcome::Reloaded) => ConsoleReply::ok(format!("reloaded {name}")),
                Ok(ReloadOutcome::Queued) => {
                    ConsoleReply::ok(format!("reload of {name} queued"))
                }
                Err(e) => ConsoleReply::err(e.to_string()),
            }
        });

        registry.register("modules", |loader, _args| {
            let statuses = loader.list();
            let mut lines = Vec::with_capacity(statuses.len() + 2);
            lines.push(format!(
                "{:<24} {:<40} {:>8}  {}",
                "Name", "Description", "Refs", "State"
            ));
            for status in &statuses {
                lines.push(format!(
                    "{:<24} {:<40} {:>8}  {}",
                    status.name, status.description, status.refcount, status.state
                ));
            }
            lines.push(format!("{} modules", statuses.len()));
            ConsoleReply::ok_many(lines)
        });

        registry.register("help", |_loader, _args| {
            ConsoleReply::ok_many(vec![
                "load <name>              load a module".to_string(),
                "unload <name>            unload a module".to_string(),
                "reload <name> [--queue]  reload, optionally deferring until idle".to_string(),
                "modules                  list known modules".to_string(),
                "shutdown                 unload everything and exit".to_string(),
            ])
        });

        registry
    }

    /// Register a command handler.
    ///
    /// If a command with the same name already exists, it will be
    /// replaced.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&ModuleLoader, &[&str]) -> ConsoleReply + Send + Sync + 'static,
    {
        debug!("Registering console command: {}", name);
        self.commands.insert(name.to_string(), Box::new(handler));
    }

    /// Get a list of all registered command names.
    #[must_use]
    pub fn available_commands(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    /// Check if a command is registered.
    #[must_use]
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Parse and execute one console line.
    ///
    /// Deferred reloads are drained after the command, so a queued
    /// reload whose module went idle fires before the next prompt.
    pub fn dispatch(&self, loader: &ModuleLoader, line: &str) -> ConsoleReply {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((command, args)) = parts.split_first() else {
            return ConsoleReply::ok_many(Vec::new());
        };

        let reply = match self.commands.get(*command) {
            Some(handler) => handler(loader, args),
            None => ConsoleReply::err(format!("unknown command: {command}")),
        };
        loader.drain_deferred();
        reply
    }
}

impl Default for ConsoleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
