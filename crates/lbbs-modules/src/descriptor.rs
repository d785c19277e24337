//! Module descriptor published to the loader at registration.

use std::fmt;

/// Flags a module may set in its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleFlags {
    /// Open the module's shared object so its symbols are visible to
    /// later-loaded modules. Without this, symbols stay isolated to the
    /// loading module.
    pub exports_global_symbols: bool,
}

impl ModuleFlags {
    /// No flags set.
    pub const NONE: Self = Self {
        exports_global_symbols: false,
    };

    /// Export symbols globally.
    pub const GLOBAL_SYMBOLS: Self = Self {
        exports_global_symbols: true,
    };
}

impl fmt::Display for ModuleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exports_global_symbols {
            write!(f, "global-symbols")
        } else {
            write!(f, "-")
        }
    }
}

/// Module descriptor a module publishes to the loader.
pub struct ModuleDescriptor {
    /// Canonical module name (lowercase, no extension).
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Module flags.
    pub flags: ModuleFlags,
}

impl ModuleDescriptor {
    /// Create a new module descriptor with no flags.
    #[must_use]
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            flags: ModuleFlags::NONE,
        }
    }

    /// Create a new module descriptor with explicit flags.
    #[must_use]
    pub const fn with_flags(
        name: &'static str,
        description: &'static str,
        flags: ModuleFlags,
    ) -> Self {
        Self {
            name,
            description,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults() {
        static DESC: ModuleDescriptor = ModuleDescriptor::new("net_irc", "IRC server");
        assert_eq!(DESC.name, "net_irc");
        assert!(!DESC.flags.exports_global_symbols);
    }

    #[test]
    fn flags_display() {
        assert_eq!(ModuleFlags::NONE.to_string(), "-");
        assert_eq!(ModuleFlags::GLOBAL_SYMBOLS.to_string(), "global-symbols");
    }
}
