// CLASSIFICATION: COMMUNITY
// Filename: load_module.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Drives the built shared library through the harness's dynamic loader.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use plugin_harness::bridge::ModuleBridge;
use plugin_harness::config::{HarnessConfig, Settings};
use plugin_harness::{ScenarioDriver, Verdict};

/// Cargo builds the cdylib next to the test binary (`deps/`) and uplifts a
/// copy into the profile directory.
fn module_path() -> PathBuf {
    let name = libloading::library_filename("file_watch");
    let exe = std::env::current_exe().unwrap();
    let deps = exe.parent().unwrap();
    [deps.join(&name), deps.parent().unwrap().join(&name)]
        .into_iter()
        .find(|p| p.exists())
        .unwrap_or_else(|| panic!("{} not built next to {}", name.to_string_lossy(), exe.display()))
}

fn demo(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos/scenarios")
        .join(name)
}

#[test]
fn demo_scenario_passes_against_the_module() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = HarnessConfig::from_file(&demo("harness.toml")).unwrap();
    let driver = ScenarioDriver::new(config);
    let report = driver.run_file(&demo("permissions.yaml"), Some(&module_path()));
    assert_eq!(report.verdict, Verdict::Passed, "{report}");
    assert_eq!(report.plugin.as_deref(), Some("file-watch"));
    assert!(report.parcels_observed >= 1);
    assert_eq!(report.stats.dropped, 0);
    assert_eq!(report.stats.malformed, 0);
}

#[test]
fn emitted_parcels_cross_the_trampoline() {
    let dir = tempfile::tempdir().unwrap();
    let watched = dir.path().join("watched");
    std::fs::write(&watched, b"x").unwrap();
    let settings: Settings = [("file_watch.interval_ms".to_string(), "5".to_string())].into();
    let mut bridge = ModuleBridge::load(&module_path(), &settings, 64).unwrap();
    let descriptor = bridge.poll_status().unwrap();
    assert_eq!(descriptor.name, "file-watch");
    assert!(descriptor.inbound("file-monitor").is_some());

    let request = serde_json::json!({ "path": watched, "attributes": ["file-type"] });
    bridge.deliver("file-monitor", &request).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut parcel = None;
    while parcel.is_none() && Instant::now() < deadline {
        parcel = bridge.wait_next(Duration::from_millis(50)).unwrap();
    }
    let parcel = parcel.expect("no parcel from the module");
    assert_eq!(parcel.sender(), "file-watch");
    assert_eq!(parcel.kind(), "file-state");
    assert!(parcel.payload_text().unwrap().contains("regular"));

    bridge.unload().unwrap();
    assert!(!bridge.is_loaded());
    bridge.unload().unwrap();
    assert!(bridge.drain().is_err());
}
