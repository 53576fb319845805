//! The ordered disk-update pipeline
//!
//! Each [`Step`] captures the disk as a baseline, submits one partial
//! update, waits for the disk to become stable again and then checks the
//! fields it expected to change. Steps build on each other's end state (the
//! QCOW version in particular flips V2 → V3 → V2 → V3 across the run), so
//! they only make sense in the order [`Step::iter`] yields them and the
//! [`Runner`] refuses anything else.

use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{error, info, warn};

use crate::client::{ApiError, DiskApi};
use crate::model::{Disk, DiskAttachment, DiskUpdate, QcowVersion};
use crate::wait::{wait_until_stable, WaitError, WaitPolicy};

/// Alias and description set by [`Step::Initialize`]
pub const INITIAL_ALIAS: &str = "mydisk_alias";
pub const INITIAL_DESCRIPTION: &str = "description";
/// Alias and description set by [`Step::UpdateAliasDescAndQcow`]
pub const NEW_ALIAS: &str = "mydisk_new_alias";
pub const NEW_DESCRIPTION: &str = "new_description";
/// Alias set by [`Step::UpdateAliasOnly`]
pub const TARGET_ALIAS: &str = "my_new_alias";

/// One stage of the pipeline, in execution order
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// Normalize alias, description and QCOW version (V2)
    Initialize,
    /// Change alias and description, upgrade QCOW to V3
    UpdateAliasDescAndQcow,
    /// Downgrade QCOW back to V2
    UpdateQcowOnly,
    /// Rename the disk
    UpdateAliasOnly,
    /// Grow the disk by a quarter
    ExtendSize,
    /// Grow the disk by a quarter and upgrade QCOW to V3 in one request
    ExtendAndChangeCompat,
}

/// What to do when submitting a step's update fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitPolicy {
    /// Abort the run with [`Error::Submission`]
    Propagate,
    /// Log the error, then wait and verify as if the request had gone through
    LogAndContinue,
}

/// A failed postcondition
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{step}: {check}: expected {expected}, got {actual}")]
pub struct AssertionFailure {
    pub step: Step,
    pub check: &'static str,
    pub expected: String,
    pub actual: String,
}

/// Errors that stop the pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),
    #[error("{step}: submitting update failed")]
    Submission {
        step: Step,
        #[source]
        source: ApiError,
    },
    #[error("{step}: disk {disk_id} not stable after {attempts} polls ({elapsed:?})")]
    StabilityTimeout {
        step: Step,
        disk_id: String,
        attempts: u32,
        elapsed: std::time::Duration,
    },
    #[error("{step} cannot run now, next step is {}", display_next(.expected))]
    OutOfOrder { step: Step, expected: Option<Step> },
    #[error("{step}: disk has no {field}")]
    MissingField { step: Step, field: &'static str },
    #[error(transparent)]
    Api(#[from] ApiError),
}

fn display_next(next: &Option<Step>) -> String {
    next.map(|s| s.to_string())
        .unwrap_or_else(|| "none (pipeline complete)".to_owned())
}

/// Target size for the extension steps: a quarter more than `size`
///
/// Computed in floating point and compared exactly, so sizes that are not a
/// multiple of four bytes can never verify. Above 2^53 bytes `size as f64`
/// already rounds, and since the submitted target and the check share that
/// rounding a wrong size can verify there; no real disk gets that large.
pub fn extended_size(size: u64) -> f64 {
    size as f64 * 5.0 / 4.0
}

fn fmt_opt<T: std::fmt::Display>(v: &Option<T>) -> String {
    v.as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "<unset>".to_owned())
}

fn check(
    step: Step,
    ok: bool,
    check: &'static str,
    expected: impl Into<String>,
    actual: impl Into<String>,
) -> Result<(), AssertionFailure> {
    if ok {
        return Ok(());
    }
    Err(AssertionFailure {
        step,
        check,
        expected: expected.into(),
        actual: actual.into(),
    })
}

fn check_qcow(
    step: Step,
    check_name: &'static str,
    expected: QcowVersion,
    actual: Option<QcowVersion>,
) -> Result<(), AssertionFailure> {
    check(
        step,
        actual == Some(expected),
        check_name,
        expected.to_string(),
        fmt_opt(&actual),
    )
}

fn check_extended(step: Step, before: &Disk, after: &Disk) -> Result<(), AssertionFailure> {
    let expected = before.provisioned_size.map(extended_size);
    let actual = after.provisioned_size;
    check(
        step,
        matches!((expected, actual), (Some(e), Some(a)) if a as f64 == e),
        "provisioned size grew by a quarter",
        fmt_opt(&expected),
        fmt_opt(&actual),
    )
}

impl Step {
    /// Heading logged when the step starts
    pub fn title(self) -> &'static str {
        match self {
            Step::Initialize => "Initialize disk",
            Step::UpdateAliasDescAndQcow => "Update alias, description and QCOW version",
            Step::UpdateQcowOnly => "Update QCOW version",
            Step::UpdateAliasOnly => "Update disk alias",
            Step::ExtendSize => "Extend size",
            Step::ExtendAndChangeCompat => "Extend size and update QCOW version",
        }
    }

    /// How a failed submission is handled
    ///
    /// Only the two steps that change the QCOW version on a disk which may
    /// still be settling tolerate a failed request.
    pub fn submit_policy(self) -> SubmitPolicy {
        match self {
            Step::UpdateQcowOnly | Step::ExtendAndChangeCompat => SubmitPolicy::LogAndContinue,
            Step::Initialize
            | Step::UpdateAliasDescAndQcow
            | Step::UpdateAliasOnly
            | Step::ExtendSize => SubmitPolicy::Propagate,
        }
    }

    /// QCOW version the disk must have when the step starts
    ///
    /// Checked after the update, against the baseline snapshot, as part of
    /// [`Step::verify`].
    pub fn requires(self) -> Option<QcowVersion> {
        match self {
            Step::UpdateAliasDescAndQcow | Step::ExtendAndChangeCompat => Some(QcowVersion::V2),
            Step::UpdateQcowOnly => Some(QcowVersion::V3),
            Step::Initialize | Step::UpdateAliasOnly | Step::ExtendSize => None,
        }
    }

    /// Build the update this step submits, given the baseline
    pub fn mutation(self, baseline: &Disk) -> Result<DiskUpdate, Error> {
        let update = match self {
            Step::Initialize => DiskUpdate {
                name: Some(INITIAL_ALIAS.to_owned()),
                description: Some(INITIAL_DESCRIPTION.to_owned()),
                qcow_version: Some(QcowVersion::V2),
                ..Default::default()
            },
            Step::UpdateAliasDescAndQcow => DiskUpdate {
                name: Some(NEW_ALIAS.to_owned()),
                description: Some(NEW_DESCRIPTION.to_owned()),
                qcow_version: Some(QcowVersion::V3),
                ..Default::default()
            },
            Step::UpdateQcowOnly => DiskUpdate {
                qcow_version: Some(QcowVersion::V2),
                ..Default::default()
            },
            Step::UpdateAliasOnly => DiskUpdate {
                name: Some(TARGET_ALIAS.to_owned()),
                ..Default::default()
            },
            Step::ExtendSize => DiskUpdate {
                provisioned_size: Some(self.extension_target(baseline)?),
                ..Default::default()
            },
            Step::ExtendAndChangeCompat => DiskUpdate {
                qcow_version: Some(QcowVersion::V3),
                provisioned_size: Some(self.extension_target(baseline)?),
                ..Default::default()
            },
        };
        Ok(update)
    }

    fn extension_target(self, baseline: &Disk) -> Result<u64, Error> {
        let size = baseline.provisioned_size.ok_or(Error::MissingField {
            step: self,
            field: "provisioned_size",
        })?;
        let target = extended_size(size);
        if target.fract() != 0.0 {
            warn!(
                "{self}: target size {target} is not a whole number of bytes, submitting {}",
                target as u64
            );
        }
        Ok(target as u64)
    }

    fn check_requirement(self, before: &Disk) -> Result<(), AssertionFailure> {
        match self.requires() {
            Some(v) => check_qcow(self, "previous QCOW version", v, before.qcow_version),
            None => Ok(()),
        }
    }

    /// Check the step's postcondition
    pub fn verify(self, before: &Disk, after: &Disk) -> Result<(), AssertionFailure> {
        match self {
            Step::Initialize => Ok(()),
            Step::UpdateAliasDescAndQcow => {
                check(
                    self,
                    after.name != before.name,
                    "alias changed",
                    format!("not {}", fmt_opt(&before.name)),
                    fmt_opt(&after.name),
                )?;
                self.check_requirement(before)?;
                check_qcow(self, "new QCOW version", QcowVersion::V3, after.qcow_version)?;
                check(
                    self,
                    after.description != before.description,
                    "description changed",
                    format!("not {}", fmt_opt(&before.description)),
                    fmt_opt(&after.description),
                )
            }
            Step::UpdateQcowOnly => {
                self.check_requirement(before)?;
                check_qcow(self, "new QCOW version", QcowVersion::V2, after.qcow_version)
            }
            Step::UpdateAliasOnly => {
                check(
                    self,
                    before.name != after.name,
                    "alias changed",
                    format!("not {}", fmt_opt(&before.name)),
                    fmt_opt(&after.name),
                )?;
                check(
                    self,
                    after.name.as_deref() == Some(TARGET_ALIAS),
                    "alias",
                    TARGET_ALIAS,
                    fmt_opt(&after.name),
                )
            }
            Step::ExtendSize => check_extended(self, before, after),
            Step::ExtendAndChangeCompat => {
                check_extended(self, before, after)?;
                self.check_requirement(before)?;
                check_qcow(self, "new QCOW version", QcowVersion::V3, after.qcow_version)
            }
        }
    }
}

/// Result of a step that got as far as verification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { reason: String },
}

/// Record of one executed step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub submit_policy: SubmitPolicy,
    /// Error from the update request, if it was logged and ignored
    pub submission_error: Option<String>,
    pub before: Disk,
    pub after: Disk,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// The disk a runner mutates and the VM it is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskTarget {
    pub vm_id: String,
    pub disk_id: String,
}

/// Drives the steps against one disk, strictly in order
#[derive(Debug)]
pub struct Runner<'a, A: DiskApi + ?Sized> {
    api: &'a A,
    target: DiskTarget,
    wait: WaitPolicy,
    next: usize,
    attachment: Option<DiskAttachment>,
    reports: Vec<StepReport>,
}

impl<'a, A: DiskApi + ?Sized> Runner<'a, A> {
    pub fn new(api: &'a A, target: DiskTarget, wait: WaitPolicy) -> Self {
        Self {
            api,
            target,
            wait,
            next: 0,
            attachment: None,
            reports: Vec::new(),
        }
    }

    /// The step [`Runner::run_step`] will accept next
    pub fn next_step(&self) -> Option<Step> {
        Step::iter().nth(self.next)
    }

    pub fn into_reports(self) -> Vec<StepReport> {
        self.reports
    }

    /// Run every remaining step, stopping at the first failure
    pub fn run_all(&mut self) -> Result<(), Error> {
        while let Some(step) = self.next_step() {
            self.run_step(step)?;
        }
        Ok(())
    }

    /// Execute one step
    ///
    /// Fails with [`Error::OutOfOrder`] without touching the engine unless
    /// `step` is [`Runner::next_step`]. A failed step does not advance the
    /// pipeline.
    pub fn run_step(&mut self, step: Step) -> Result<(), Error> {
        let expected = self.next_step();
        if expected != Some(step) {
            return Err(Error::OutOfOrder { step, expected });
        }

        info!("");
        info!("Test - {}", step.title());
        let before = self.api.get_disk(&self.target.disk_id)?;
        log_baseline(step, &before);

        let update = step.mutation(&before)?;
        let submission_error = match self.api.update_disk_attachment(
            &self.target.vm_id,
            &self.target.disk_id,
            &update,
        ) {
            Ok(attachment) => {
                self.attachment = Some(attachment);
                None
            }
            Err(source) => match step.submit_policy() {
                SubmitPolicy::Propagate => return Err(Error::Submission { step, source }),
                SubmitPolicy::LogAndContinue => {
                    error!("{step}: {source}");
                    Some(source.to_string())
                }
            },
        };

        // After a tolerated failure this is the previous step's attachment
        let wait_id = self
            .attachment
            .as_ref()
            .and_then(|a| a.disk_id())
            .unwrap_or(self.target.disk_id.as_str())
            .to_owned();
        wait_until_stable(self.api, &wait_id, &self.wait).map_err(|e| match e {
            WaitError::Timeout {
                disk_id,
                attempts,
                elapsed,
                ..
            } => Error::StabilityTimeout {
                step,
                disk_id,
                attempts,
                elapsed,
            },
            WaitError::Api(e) => Error::Api(e),
        })?;

        let after = self.api.get_disk(&self.target.disk_id)?;
        log_result(&before, &after);

        let verified = step.verify(&before, &after);
        self.reports.push(StepReport {
            step,
            submit_policy: step.submit_policy(),
            submission_error,
            before,
            after,
            outcome: match &verified {
                Ok(()) => Outcome::Passed,
                Err(e) => Outcome::Failed {
                    reason: e.to_string(),
                },
            },
        });
        verified?;

        if step != Step::Initialize {
            info!("test result - success");
        }
        self.next += 1;
        Ok(())
    }
}

/// One method per step, each equivalent to [`Runner::run_step`] with that step
#[allow(dead_code)]
impl<'a, A: DiskApi + ?Sized> Runner<'a, A> {
    pub fn reports(&self) -> &[StepReport] {
        &self.reports
    }

    pub fn initialize(&mut self) -> Result<(), Error> {
        self.run_step(Step::Initialize)
    }

    pub fn run_update_alias_desc_and_qcow(&mut self) -> Result<(), Error> {
        self.run_step(Step::UpdateAliasDescAndQcow)
    }

    pub fn run_update_qcow_only(&mut self) -> Result<(), Error> {
        self.run_step(Step::UpdateQcowOnly)
    }

    pub fn run_update_alias_only(&mut self) -> Result<(), Error> {
        self.run_step(Step::UpdateAliasOnly)
    }

    pub fn run_extend_size(&mut self) -> Result<(), Error> {
        self.run_step(Step::ExtendSize)
    }

    pub fn run_extend_and_change_compat(&mut self) -> Result<(), Error> {
        self.run_step(Step::ExtendAndChangeCompat)
    }
}

fn log_baseline(step: Step, disk: &Disk) {
    match step {
        Step::Initialize | Step::UpdateAliasDescAndQcow => {}
        Step::UpdateQcowOnly => {
            info!("previous qcow version: {}", fmt_opt(&disk.qcow_version));
        }
        Step::UpdateAliasOnly => {
            info!(
                "previous disk alias: {}; target disk alias: {TARGET_ALIAS}",
                fmt_opt(&disk.name)
            );
        }
        Step::ExtendSize => {
            info!("previous size: {}", fmt_opt(&disk.provisioned_size));
        }
        Step::ExtendAndChangeCompat => {
            info!(
                "previous size: {}; target size: {}",
                fmt_opt(&disk.provisioned_size),
                fmt_opt(&disk.provisioned_size.map(extended_size))
            );
            info!("previous qcow version: {}", fmt_opt(&disk.qcow_version));
        }
    }
}

fn log_result(before: &Disk, after: &Disk) {
    info!("name: {}", fmt_opt(&after.name));
    info!("id: {}", after.id);
    info!(
        "qcow version: {} -> {}",
        fmt_opt(&before.qcow_version),
        fmt_opt(&after.qcow_version)
    );
    info!(
        "provisioned_size: {} -> {}",
        fmt_opt(&before.provisioned_size),
        fmt_opt(&after.provisioned_size)
    );
}
