//! Built-in module discovery through inventory.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lbbs_core::{ModulesConfig, Result};
use lbbs_modules::{
    BuiltinModule, Module, ModuleContext, ModuleDescriptor, ModuleLoader, ModuleState,
};

static SYSINFO_LOADS: AtomicUsize = AtomicUsize::new(0);

struct SysInfo;

impl Module for SysInfo {
    fn descriptor(&self) -> &'static ModuleDescriptor {
        static DESC: ModuleDescriptor =
            ModuleDescriptor::new("mod_sysinfo", "System information commands");
        &DESC
    }

    fn load(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
        SYSINFO_LOADS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unload(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
        Ok(())
    }
}

fn make_sysinfo() -> Arc<dyn Module> {
    Arc::new(SysInfo)
}

inventory::submit! {
    BuiltinModule::new("mod_sysinfo", make_sysinfo)
}

#[test]
fn builtin_is_discovered() {
    assert!(
        lbbs_modules::builtin_modules()
            .iter()
            .any(|b| b.name == "mod_sysinfo")
    );
}

#[test]
fn builtin_loads_by_name_without_a_shared_object() {
    let loader = ModuleLoader::new(ModulesConfig::with_dir("/nonexistent"));

    loader.load("mod_sysinfo").unwrap();
    assert_eq!(SYSINFO_LOADS.load(Ordering::SeqCst), 1);

    let status = &loader.list()[0];
    assert_eq!(status.name, "mod_sysinfo");
    assert_eq!(status.state, ModuleState::Loaded);

    loader.unload("mod_sysinfo").unwrap();
    assert!(loader.list().is_empty());
}
