//! End-to-end module lifecycle scenarios.

use lbbs_core::{LbbsError, ModuleError};
use lbbs_modules::{ModuleLoader, ModuleState, ModuleStatus, ReloadOutcome};
use lbbs_test_utils::{LoaderHarness, ScriptedModuleBuilder};

fn status_of(loader: &ModuleLoader, name: &str) -> ModuleStatus {
    loader
        .list()
        .into_iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("module '{name}' not listed"))
}

#[test]
fn autoload_single_module() {
    let harness = LoaderHarness::with_autoload(&["mod_a"]);
    let calls = ScriptedModuleBuilder::new("mod_a").install(harness.loader());

    let report = harness.loader().load_all();
    assert!(report.fully_loaded());
    assert_eq!(calls.loads(), 1);

    let status = status_of(harness.loader(), "mod_a");
    assert_eq!(status.state, ModuleState::Loaded);
    assert_eq!(status.refcount, 0);

    harness.loader().unload_all();
    assert!(harness.loader().list().is_empty());
    assert_eq!(calls.unloads(), 1);
}

#[test]
fn dependency_pins_and_blocks_unload() {
    let harness = LoaderHarness::with_autoload(&["mod_b"]);
    let a_calls = ScriptedModuleBuilder::new("mod_a").install(harness.loader());
    ScriptedModuleBuilder::new("mod_b")
        .requires("mod_a")
        .install(harness.loader());

    let report = harness.loader().load_all();
    assert!(report.fully_loaded());
    assert_eq!(a_calls.loads(), 1);

    // a was pulled in implicitly and is pinned by b.
    assert_eq!(status_of(harness.loader(), "mod_a").refcount, 1);
    assert_eq!(status_of(harness.loader(), "mod_b").refcount, 0);

    match harness.loader().unload("mod_a") {
        Err(LbbsError::Module(ModuleError::UnloadRefused { reason, .. })) => {
            assert!(reason.contains("mod_b"), "reason was: {reason}");
        }
        other => panic!("expected unload refusal, got {other:?}"),
    }

    harness.loader().unload("mod_b").unwrap();
    assert_eq!(status_of(harness.loader(), "mod_a").refcount, 0);
    harness.loader().unload("mod_a").unwrap();
    assert!(harness.loader().list().is_empty());
}

#[test]
fn require_cycle_is_refused() {
    let harness = LoaderHarness::new();
    ScriptedModuleBuilder::new("mod_a")
        .requires("mod_b")
        .install(harness.loader());
    ScriptedModuleBuilder::new("mod_b")
        .requires("mod_a")
        .install(harness.loader());

    match harness.loader().load("mod_a") {
        Err(LbbsError::Module(ModuleError::LoadFailed { name, .. })) => {
            assert_eq!(name, "mod_a");
        }
        other => panic!("expected load failure, got {other:?}"),
    }

    // Both records were discarded; the names are not poisoned.
    assert!(harness.loader().list().is_empty());
}

#[test]
fn deferred_reload_fires_at_refcount_zero() {
    let harness = LoaderHarness::new();
    let calls = ScriptedModuleBuilder::new("mod_a").install(harness.loader());
    harness.loader().load("mod_a").unwrap();

    let reference = harness.loader().ref_module("mod_a").unwrap();
    assert_eq!(
        harness.loader().reload("mod_a", true).unwrap(),
        ReloadOutcome::Queued
    );
    // Nothing happened yet; the module is busy.
    assert_eq!(calls.loads(), 1);
    assert_eq!(status_of(harness.loader(), "mod_a").state, ModuleState::Loaded);

    harness.loader().unref(reference);
    harness.loader().drain_deferred();

    assert_eq!(calls.unloads(), 1);
    assert_eq!(calls.loads(), 2);
    assert_eq!(calls.reloads(), 1);
    assert_eq!(status_of(harness.loader(), "mod_a").state, ModuleState::Loaded);
}

#[test]
fn queued_reloads_coalesce() {
    let harness = LoaderHarness::new();
    let calls = ScriptedModuleBuilder::new("mod_a").install(harness.loader());
    harness.loader().load("mod_a").unwrap();

    let reference = harness.loader().ref_module("mod_a").unwrap();
    assert_eq!(
        harness.loader().reload("mod_a", true).unwrap(),
        ReloadOutcome::Queued
    );
    assert_eq!(
        harness.loader().reload("mod_a", true).unwrap(),
        ReloadOutcome::Queued
    );

    harness.loader().unref(reference);
    harness.loader().drain_deferred();
    assert_eq!(calls.loads(), 2);
}

#[test]
fn concurrent_ref_blocks_unload_until_released() {
    let harness = LoaderHarness::new();
    ScriptedModuleBuilder::new("mod_a").install(harness.loader());
    harness.loader().load("mod_a").unwrap();

    let reference = harness.loader().ref_module("mod_a").unwrap();

    let shared = harness.shared();
    let result = std::thread::spawn(move || shared.unload("mod_a"))
        .join()
        .unwrap();
    assert!(matches!(
        result,
        Err(LbbsError::Module(ModuleError::UnloadRefused { .. }))
    ));

    harness.loader().unref(reference);
    harness.loader().unload("mod_a").unwrap();
}

#[test]
fn racing_loads_serialize_to_one() {
    let harness = LoaderHarness::new();
    let calls = ScriptedModuleBuilder::new("mod_race").install(harness.loader());

    let first = harness.shared();
    let second = harness.shared();
    let t1 = std::thread::spawn(move || first.load("mod_race"));
    let t2 = std::thread::spawn(move || second.load("mod_race"));

    for result in [t1.join().unwrap(), t2.join().unwrap()] {
        match result {
            Ok(()) | Err(LbbsError::Module(ModuleError::AlreadyLoaded(_))) => {}
            other => panic!("unexpected race outcome: {other:?}"),
        }
    }
    assert_eq!(calls.loads(), 1);
    assert_eq!(status_of(harness.loader(), "mod_race").state, ModuleState::Loaded);
}

#[test]
fn partial_autoload_continues_past_failures() {
    let harness = LoaderHarness::with_autoload(&["mod_a", "mod_bad", "mod_c"]);
    ScriptedModuleBuilder::new("mod_a").install(harness.loader());
    ScriptedModuleBuilder::new("mod_bad")
        .fail_load()
        .install(harness.loader());
    ScriptedModuleBuilder::new("mod_c").install(harness.loader());

    let report = harness.loader().load_all();
    assert!(!report.fully_loaded());
    assert_eq!(report.loaded, vec!["mod_a", "mod_c"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "mod_bad");

    // The failed record was purged.
    assert_eq!(harness.loader().list().len(), 2);
    assert_eq!(status_of(harness.loader(), "mod_a").state, ModuleState::Loaded);
    assert_eq!(status_of(harness.loader(), "mod_c").state, ModuleState::Loaded);
}

#[test]
fn reload_is_unload_then_load() {
    let harness = LoaderHarness::new();
    let calls = ScriptedModuleBuilder::new("mod_a").install(harness.loader());
    harness.loader().load("mod_a").unwrap();

    assert_eq!(
        harness.loader().reload("mod_a", false).unwrap(),
        ReloadOutcome::Reloaded
    );
    assert_eq!(calls.unloads(), 1);
    assert_eq!(calls.loads(), 2);
    assert_eq!(calls.reloads(), 1);
}

#[test]
fn load_is_idempotent_modulo_error() {
    let harness = LoaderHarness::new();
    let calls = ScriptedModuleBuilder::new("mod_a").install(harness.loader());

    harness.loader().load("mod_a").unwrap();
    assert!(matches!(
        harness.loader().load("mod_a"),
        Err(LbbsError::Module(ModuleError::AlreadyLoaded(_)))
    ));
    assert_eq!(calls.loads(), 1);
}

#[test]
fn shutdown_unloads_in_reverse_dependency_order() {
    let harness = LoaderHarness::with_autoload(&["mod_c"]);
    let a_calls = ScriptedModuleBuilder::new("mod_a").install(harness.loader());
    let b_calls = ScriptedModuleBuilder::new("mod_b")
        .requires("mod_a")
        .install(harness.loader());
    let c_calls = ScriptedModuleBuilder::new("mod_c")
        .requires("mod_b")
        .install(harness.loader());

    harness.loader().load_all();
    assert_eq!(harness.loader().list().len(), 3);

    // mod_a cannot come down first; the orchestrator has to peel from
    // the leaves.
    harness.loader().unload_all();
    assert!(harness.loader().list().is_empty());
    assert_eq!(a_calls.unloads(), 1);
    assert_eq!(b_calls.unloads(), 1);
    assert_eq!(c_calls.unloads(), 1);
}

#[test]
fn failed_unload_keeps_module_loaded() {
    let harness = LoaderHarness::new();
    let calls = ScriptedModuleBuilder::new("mod_stubborn")
        .fail_unload()
        .install(harness.loader());
    harness.loader().load("mod_stubborn").unwrap();

    assert!(matches!(
        harness.loader().unload("mod_stubborn"),
        Err(LbbsError::Module(ModuleError::UnloadFailed { .. }))
    ));
    assert_eq!(calls.unloads(), 1);
    assert_eq!(
        status_of(harness.loader(), "mod_stubborn").state,
        ModuleState::Loaded
    );
}

#[test]
fn names_are_canonicalized() {
    let harness = LoaderHarness::new();
    ScriptedModuleBuilder::new("mod_case").install(harness.loader());

    let with_suffix = format!("MOD_Case{}", std::env::consts::DLL_SUFFIX);
    harness.loader().load(&with_suffix).unwrap();
    assert_eq!(status_of(harness.loader(), "mod_case").state, ModuleState::Loaded);

    assert!(matches!(
        harness.loader().load("mod case"),
        Err(LbbsError::Module(ModuleError::InvalidName(_)))
    ));
}
