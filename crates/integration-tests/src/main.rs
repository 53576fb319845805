use std::path::Path;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};

mod tests {
    pub mod cli;
    pub mod disk_update;
}

/// Environment variables a live run needs besides the binary path
pub(crate) const LIVE_ENV: &[&str] = &["OVDK_URL", "OVDK_PASSWORD", "OVDK_VM_ID", "OVDK_DISK_ID"];

/// Get the path to the ovdk binary, checking OVDK_PATH env var first, then falling back to "ovdk"
pub(crate) fn get_ovdk_command() -> Result<String> {
    if let Ok(path) = std::env::var("OVDK_PATH") {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/ovdk", "target/release/ovdk"]
        .into_iter()
        .find(|p| Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set OVDK_PATH={path} to run using this binary"
        ));
    }
    Ok("ovdk".to_owned())
}

/// Whether the environment points at an engine we may modify
pub(crate) fn live_engine_configured() -> bool {
    LIVE_ENV.iter().all(|k| std::env::var_os(k).is_some())
}

fn main() {
    let mut args = Arguments::from_args();
    // Every live test works on the same disk; never run two at once
    if args.test_threads.is_none() {
        args.test_threads = Some(1);
    }

    let offline = vec![
        Trial::test("help_lists_commands", || {
            tests::cli::test_help_lists_commands();
            Ok(())
        }),
        Trial::test("empty_update_rejected", || {
            tests::cli::test_empty_update_rejected();
            Ok(())
        }),
        Trial::test("invalid_disk_id_rejected", || {
            tests::cli::test_invalid_disk_id_rejected();
            Ok(())
        }),
    ];

    let live = vec![
        Trial::test("disk_show_json", || {
            tests::disk_update::test_disk_show_json();
            Ok(())
        }),
        Trial::test("disk_wait", || {
            tests::disk_update::test_disk_wait();
            Ok(())
        }),
        Trial::test("update_pipeline", || {
            tests::disk_update::test_update_pipeline();
            Ok(())
        }),
        Trial::test("disk_update_roundtrip_alias", || {
            tests::disk_update::test_disk_update_alias();
            Ok(())
        }),
    ];

    let skip_live = !live_engine_configured();
    if skip_live {
        eprintln!(
            "Live engine tests are ignored; set {} to enable them",
            LIVE_ENV.join(", ")
        );
    }
    let tests = offline
        .into_iter()
        .chain(live.into_iter().map(|t| t.with_ignored_flag(skip_live)))
        .collect();

    libtest_mimic::run(&args, tests).exit();
}
