//! Commands operating on a single disk
//!
//! - `show`: print the disk as the engine reports it
//! - `wait`: block until the disk is stable
//! - `update`: submit a partial update and wait for it to settle

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tracing::info;
use uuid::Uuid;

use crate::client::{Connection, ConnectionOpts, DiskApi, TargetOpts};
use crate::model::{Disk, DiskUpdate, QcowVersion};
use crate::utils::{format_size, parse_size};
use crate::wait::{wait_until_stable, WaitOpts};

/// Single-disk subcommands
#[derive(Debug, Subcommand)]
pub enum DiskCommands {
    /// Show the current state of a disk
    Show(ShowOpts),

    /// Wait until a disk reports status ok
    ///
    /// Polls the engine at a fixed interval. Useful after a manual change,
    /// or to check that a disk is usable before `ovdk run`.
    Wait(WaitCmdOpts),

    /// Apply a partial update to a disk through its VM attachment
    ///
    /// Only the given fields are sent. Unless --no-wait is given, waits for
    /// the disk to become stable and prints its new state.
    Update(UpdateOpts),
}

/// Options for `disk show`
#[derive(Debug, Parser)]
pub struct ShowOpts {
    #[command(flatten)]
    pub conn: ConnectionOpts,

    /// Id of the disk
    #[clap(long, env = "OVDK_DISK_ID")]
    pub disk_id: Uuid,

    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

/// Options for `disk wait`
#[derive(Debug, Parser)]
pub struct WaitCmdOpts {
    #[command(flatten)]
    pub conn: ConnectionOpts,

    /// Id of the disk
    #[clap(long, env = "OVDK_DISK_ID")]
    pub disk_id: Uuid,

    #[command(flatten)]
    pub wait: WaitOpts,
}

/// Options for `disk update`
#[derive(Debug, Parser)]
pub struct UpdateOpts {
    #[command(flatten)]
    pub conn: ConnectionOpts,

    #[command(flatten)]
    pub target: TargetOpts,

    #[command(flatten)]
    pub wait: WaitOpts,

    /// New disk alias
    #[clap(long)]
    pub name: Option<String>,

    /// New disk description
    #[clap(long)]
    pub description: Option<String>,

    /// New QCOW compatibility level
    #[clap(long, value_enum)]
    pub qcow_version: Option<QcowVersion>,

    /// New provisioned size (e.g. 12G, 13421772800)
    #[clap(long)]
    pub provisioned_size: Option<String>,

    /// Return right after submitting the update
    #[clap(long)]
    pub no_wait: bool,

    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

impl UpdateOpts {
    fn to_update(&self) -> Result<DiskUpdate> {
        let provisioned_size = self
            .provisioned_size
            .as_deref()
            .map(parse_size)
            .transpose()
            .context("Parsing --provisioned-size")?;
        let update = DiskUpdate {
            name: self.name.clone(),
            description: self.description.clone(),
            qcow_version: self.qcow_version,
            provisioned_size,
        };
        if update.is_empty() {
            return Err(eyre!(
                "Nothing to update; pass at least one of \
                 --name, --description, --qcow-version, --provisioned-size"
            ));
        }
        Ok(update)
    }
}

impl DiskCommands {
    pub fn run(self) -> Result<()> {
        match self {
            DiskCommands::Show(opts) => show(opts),
            DiskCommands::Wait(opts) => wait(opts),
            DiskCommands::Update(opts) => update(opts),
        }
    }
}

/// Format a disk snapshot for humans
fn format_human(disk: &Disk) -> String {
    let field = |v: Option<String>| v.unwrap_or_else(|| "-".to_owned());
    let mut out = String::new();
    out.push_str(&format!("{:<14} {}\n", "ID:", disk.id));
    out.push_str(&format!("{:<14} {}\n", "Alias:", field(disk.name.clone())));
    out.push_str(&format!(
        "{:<14} {}\n",
        "Description:",
        field(disk.description.clone())
    ));
    out.push_str(&format!(
        "{:<14} {}\n",
        "QCOW version:",
        field(disk.qcow_version.map(|v| v.to_string()))
    ));
    out.push_str(&format!(
        "{:<14} {}\n",
        "Size:",
        field(
            disk.provisioned_size
                .map(|s| format!("{} ({s} bytes)", format_size(s)))
        )
    ));
    out.push_str(&format!(
        "{:<14} {}",
        "Status:",
        field(disk.status.as_ref().map(|s| s.to_string()))
    ));
    out
}

fn print_disk(disk: &Disk, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(disk)?);
    } else {
        println!("{}", format_human(disk));
    }
    Ok(())
}

fn show(opts: ShowOpts) -> Result<()> {
    let conn = Connection::connect(&opts.conn).context("Connecting to the engine")?;
    let disk_id = opts.disk_id.to_string();
    let disk = conn.get_disk(&disk_id);
    conn.close();
    let disk = disk.with_context(|| format!("Fetching disk {disk_id}"))?;
    print_disk(&disk, opts.json)
}

fn wait(opts: WaitCmdOpts) -> Result<()> {
    let conn = Connection::connect(&opts.conn).context("Connecting to the engine")?;
    let disk_id = opts.disk_id.to_string();
    info!("Waiting for disk {disk_id} to become stable");
    let disk = wait_until_stable(&conn, &disk_id, &opts.wait.policy());
    conn.close();
    let disk = disk.with_context(|| format!("Waiting for disk {disk_id}"))?;
    info!("Disk {} is {}", disk.id, disk.status.as_ref().map(|s| s.as_str()).unwrap_or("ok"));
    Ok(())
}

fn update(opts: UpdateOpts) -> Result<()> {
    let update = opts.to_update()?;
    let conn = Connection::connect(&opts.conn).context("Connecting to the engine")?;
    let result = submit_and_settle(&conn, &opts, &update);
    conn.close();
    match result? {
        Some(disk) => print_disk(&disk, opts.json),
        None => Ok(()),
    }
}

fn submit_and_settle(
    conn: &Connection,
    opts: &UpdateOpts,
    update: &DiskUpdate,
) -> Result<Option<Disk>> {
    let vm_id = opts.target.vm_id.to_string();
    let disk_id = opts.target.disk_id.to_string();
    info!("Updating disk {disk_id} on VM {vm_id}");
    let attachment = conn
        .update_disk_attachment(&vm_id, &disk_id, update)
        .with_context(|| format!("Updating disk {disk_id}"))?;
    if opts.no_wait {
        return Ok(None);
    }
    let wait_id = attachment.disk_id().unwrap_or(disk_id.as_str());
    let disk = wait_until_stable(conn, wait_id, &opts.wait.policy())
        .with_context(|| format!("Waiting for disk {wait_id}"))?;
    Ok(Some(disk))
}
