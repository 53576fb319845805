//! Command line checks that do not need an engine

use std::process::Command;

use crate::get_ovdk_command;

const VM_ID: &str = "f01048e6-208a-42f3-b2ff-e6f6ac1d5a5a";
const DISK_ID: &str = "d83a1d61-088c-4423-9695-a752561091b9";

/// Test that the top-level help lists both commands
pub fn test_help_lists_commands() {
    let ovdk = get_ovdk_command().unwrap();

    let output = Command::new(&ovdk)
        .arg("--help")
        .output()
        .expect("Failed to run ovdk --help");

    assert!(
        output.status.success(),
        "ovdk --help failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run"), "Missing 'run' command in help");
    assert!(stdout.contains("disk"), "Missing 'disk' command in help");

    let output = Command::new(&ovdk)
        .args(["disk", "update", "--help"])
        .output()
        .expect("Failed to run ovdk disk update --help");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--qcow-version",
        "--provisioned-size",
        "--name",
        "--description",
        "--no-wait",
        "--wait-timeout",
    ] {
        assert!(stdout.contains(flag), "Missing {flag} in disk update help");
    }
}

/// An update without any field must fail before contacting the engine
pub fn test_empty_update_rejected() {
    let ovdk = get_ovdk_command().unwrap();

    let output = Command::new(&ovdk)
        .args([
            "disk",
            "update",
            "--url",
            "http://127.0.0.1:9/ovirt-engine/api",
            "--password",
            "unused",
            "--vm-id",
            VM_ID,
            "--disk-id",
            DISK_ID,
        ])
        .output()
        .expect("Failed to run ovdk disk update");

    assert!(!output.status.success(), "empty update unexpectedly succeeded");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Nothing to update"),
        "Unexpected error output: {stderr}"
    );
}

/// Disk ids are validated as UUIDs
pub fn test_invalid_disk_id_rejected() {
    let ovdk = get_ovdk_command().unwrap();

    let output = Command::new(&ovdk)
        .args(["disk", "show", "--password", "unused", "--disk-id", "not-a-uuid"])
        .output()
        .expect("Failed to run ovdk disk show");

    assert_eq!(output.status.code(), Some(2), "expected a usage error");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--disk-id"), "Unexpected error output: {stderr}");
}
