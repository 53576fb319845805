//! `ovdk run`: the full disk-update pipeline against a live engine

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::Table;
use serde::Serialize;
use tracing::info;

use crate::client::{Connection, ConnectionOpts, TargetOpts};
use crate::pipeline::{DiskTarget, Outcome, Runner, StepReport};
use crate::utils::{error_chain, format_size};
use crate::wait::WaitOpts;

/// Options for running the pipeline
#[derive(Debug, Parser)]
pub struct RunOpts {
    #[command(flatten)]
    pub conn: ConnectionOpts,

    #[command(flatten)]
    pub target: TargetOpts,

    #[command(flatten)]
    pub wait: WaitOpts,

    /// Print the run report as JSON instead of a table
    #[clap(long)]
    pub json: bool,
}

/// Everything `ovdk run` found out, as printed with `--json`
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub vm_id: String,
    pub disk_id: String,
    pub passed: bool,
    /// Error that stopped the run, with its causes
    pub error: Option<String>,
    pub steps: Vec<StepReport>,
}

fn banner(text: &str) {
    let line = "#".repeat(text.len() + 10);
    info!("{line}");
    info!("#### {text} ####");
    info!("{line}");
}

fn summary_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["STEP", "RESULT", "ALIAS", "QCOW", "SIZE", "NOTE"]);
    for step in &report.steps {
        let result = match &step.outcome {
            Outcome::Passed => "passed",
            Outcome::Failed { .. } => "FAILED",
        };
        let note = match (&step.outcome, &step.submission_error) {
            (Outcome::Failed { reason }, _) => reason.clone(),
            (Outcome::Passed, Some(e)) => format!("update error ignored: {e}"),
            (Outcome::Passed, None) => String::new(),
        };
        table.add_row(vec![
            step.step.to_string(),
            result.to_owned(),
            step.after.name.clone().unwrap_or_default(),
            step.after
                .qcow_version
                .map(|v| v.to_string())
                .unwrap_or_default(),
            step.after
                .provisioned_size
                .map(format_size)
                .unwrap_or_default(),
            note,
        ]);
    }
    table
}

fn display_human(report: &RunReport) {
    println!("{}", summary_table(report));
    match &report.error {
        None => println!(
            "\nAll {} steps passed on disk {}",
            report.steps.len(),
            report.disk_id
        ),
        Some(e) => println!("\nRun failed: {e}"),
    }
}

/// Execute the pipeline and report on it
pub fn run(opts: RunOpts) -> Result<()> {
    banner("Start test functionality of update disk");

    let conn = Connection::connect(&opts.conn).context("Connecting to the engine")?;
    info!("Connected to {}", conn.url());

    let vm_id = opts.target.vm_id.to_string();
    let vm = match conn.find_vm(&vm_id) {
        Ok(vm) => vm,
        Err(e) => {
            conn.close();
            return Err(e).with_context(|| format!("Looking up VM {vm_id}"));
        }
    };
    info!(
        "Using VM {} ({})",
        vm.name.as_deref().unwrap_or(&vm.id),
        vm.status.as_deref().unwrap_or("status unknown")
    );

    let target = DiskTarget {
        vm_id: vm.id,
        disk_id: opts.target.disk_id.to_string(),
    };
    let mut runner = Runner::new(&conn, target.clone(), opts.wait.policy());
    let result = runner.run_all();
    let steps = runner.into_reports();
    conn.close();

    let report = RunReport {
        vm_id: target.vm_id,
        disk_id: target.disk_id,
        passed: result.is_ok(),
        error: result.as_ref().err().map(|e| error_chain(e)),
        steps,
    };
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display_human(&report);
    }

    banner("Finish test functionality of update disk");
    result.context("Disk update pipeline failed")?;
    Ok(())
}
