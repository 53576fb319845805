//! Put the integration test disk back into the state `ovdk run` starts from

use std::process::Command;

/// Same values the pipeline's first step applies
const RESET_ARGS: &[&str] = &[
    "disk",
    "update",
    "--name",
    "mydisk_alias",
    "--description",
    "description",
    "--qcow-version",
    "v2",
];

fn reset_integration_test_disk() -> Result<(), Box<dyn std::error::Error>> {
    let ovdk = std::env::var("OVDK_PATH").unwrap_or_else(|_| "ovdk".to_owned());

    for var in ["OVDK_URL", "OVDK_PASSWORD", "OVDK_VM_ID", "OVDK_DISK_ID"] {
        if std::env::var_os(var).is_none() {
            return Err(format!("{var} must be set").into());
        }
    }

    println!("Resetting integration test disk...");
    let status = Command::new(&ovdk).args(RESET_ARGS).status()?;
    if !status.success() {
        return Err(format!("{ovdk} disk update exited with {status}").into());
    }

    println!("Reset completed");
    Ok(())
}

fn main() {
    if let Err(e) = reset_integration_test_disk() {
        eprintln!("Error during reset: {}", e);
        std::process::exit(1);
    }
}
