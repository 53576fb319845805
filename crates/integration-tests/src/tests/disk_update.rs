//! Integration tests against a live engine
//!
//! These need OVDK_URL, OVDK_PASSWORD, OVDK_VM_ID and OVDK_DISK_ID and
//! they modify the disk: every pipeline run grows it by more than half.
//! Use a throwaway disk.
//!
//! INTEGRATION TESTS MUST NEVER "warn and continue" ON FAILURES! Use
//! `assert!()` and `unwrap()` to fail hard.

use serde::Deserialize;
use serde_json::Value;
use xshell::{cmd, Shell};

use crate::get_ovdk_command;

#[derive(Debug, Deserialize)]
struct StepReport {
    step: String,
    result: String,
    after: Value,
}

#[derive(Debug, Deserialize)]
struct RunReport {
    passed: bool,
    error: Option<String>,
    steps: Vec<StepReport>,
}

fn show_disk(sh: &Shell, ovdk: &str) -> Value {
    let output = cmd!(sh, "{ovdk} disk show --json").output().unwrap();
    assert!(
        output.status.success(),
        "disk show failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("disk show did not print JSON")
}

/// The disk can be read and carries the fields the pipeline works on
pub fn test_disk_show_json() {
    let sh = Shell::new().unwrap();
    let ovdk = get_ovdk_command().unwrap();

    let disk = show_disk(&sh, &ovdk);
    let expected_id = std::env::var("OVDK_DISK_ID").unwrap();
    assert_eq!(disk["id"], expected_id.as_str());
    for field in ["name", "qcow_version", "provisioned_size", "status"] {
        assert!(!disk[field].is_null(), "disk is missing {field}: {disk}");
    }
}

/// Waiting on an idle disk returns promptly
pub fn test_disk_wait() {
    let sh = Shell::new().unwrap();
    let ovdk = get_ovdk_command().unwrap();

    cmd!(sh, "{ovdk} disk wait --wait-interval 1 --wait-timeout 120")
        .run()
        .unwrap();
    assert_eq!(show_disk(&sh, &ovdk)["status"], "ok");
}

/// The full pipeline passes and leaves every step with a stable disk
pub fn test_update_pipeline() {
    let sh = Shell::new().unwrap();
    let ovdk = get_ovdk_command().unwrap();

    let output = cmd!(sh, "{ovdk} run --json --wait-interval 2")
        .ignore_status()
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let report: RunReport = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("run did not print a report ({e}): {stdout}"));

    assert!(report.passed, "pipeline failed: {:?}", report.error);
    assert!(output.status.success());

    let steps: Vec<&str> = report.steps.iter().map(|s| s.step.as_str()).collect();
    assert_eq!(
        steps,
        [
            "initialize",
            "update-alias-desc-and-qcow",
            "update-qcow-only",
            "update-alias-only",
            "extend-size",
            "extend-and-change-compat",
        ]
    );
    for step in &report.steps {
        assert_eq!(step.result, "passed", "step {} failed", step.step);
        assert_eq!(step.after["status"], "ok", "step {} left disk unstable", step.step);
    }

    let disk = show_disk(&sh, &ovdk);
    assert_eq!(disk["name"], "my_new_alias");
    assert_eq!(disk["qcow_version"], "qcow2_v3");
}

/// A one-off alias update through `disk update`
pub fn test_disk_update_alias() {
    let sh = Shell::new().unwrap();
    let ovdk = get_ovdk_command().unwrap();

    let output = cmd!(
        sh,
        "{ovdk} disk update --name ovdk_it_alias --wait-interval 1 --json"
    )
    .output()
    .unwrap();
    assert!(
        output.status.success(),
        "disk update failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let disk: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(disk["name"], "ovdk_it_alias");
    assert_eq!(disk["status"], "ok");
}
