//! In-memory engine used by unit tests
//!
//! Behaves like the real engine for the one disk it knows: an update is
//! applied immediately, after which the disk reports `locked` for a
//! configurable number of polls before going back to `ok`.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::client::{ApiError, DiskApi};
use crate::model::{Disk, DiskAttachment, DiskStatus, DiskUpdate, Link, QcowVersion};

/// How a given update call misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateFailure {
    /// Refuse the update without touching the disk
    Reject,
    /// Apply the update, then report an error anyway
    ApplyThenError,
}

#[derive(Debug)]
struct State {
    disk: Disk,
    locked_polls: u32,
    remaining_locked: u32,
    stuck: bool,
    omit_disk_link: bool,
    get_calls: u32,
    updates: Vec<DiskUpdate>,
    failures: HashMap<usize, UpdateFailure>,
}

#[derive(Debug)]
pub(crate) struct FakeEngine {
    state: RefCell<State>,
}

impl FakeEngine {
    pub(crate) const DISK_ID: &'static str = "d83a1d61-088c-4423-9695-a752561091b9";
    pub(crate) const VM_ID: &'static str = "f01048e6-208a-42f3-b2ff-e6f6ac1d5a5a";

    /// A disk that was never touched by ovdk
    pub(crate) fn initial_disk() -> Disk {
        Disk {
            id: Self::DISK_ID.to_owned(),
            name: Some("disk0".to_owned()),
            description: Some("created by hand".to_owned()),
            qcow_version: Some(QcowVersion::V3),
            provisioned_size: Some(10737418240),
            status: Some(DiskStatus::Ok),
        }
    }

    pub(crate) fn with_locked_polls(locked_polls: u32) -> Self {
        Self::with_disk(Self::initial_disk(), locked_polls)
    }

    pub(crate) fn with_disk(disk: Disk, locked_polls: u32) -> Self {
        Self {
            state: RefCell::new(State {
                disk,
                locked_polls,
                remaining_locked: 0,
                stuck: false,
                omit_disk_link: false,
                get_calls: 0,
                updates: Vec::new(),
                failures: HashMap::new(),
            }),
        }
    }

    /// Make the disk report `locked` forever
    pub(crate) fn set_stuck(&self, stuck: bool) {
        self.state.borrow_mut().stuck = stuck;
    }

    /// Answer updates with an attachment that does not link its disk
    pub(crate) fn set_omit_disk_link(&self, omit: bool) {
        self.state.borrow_mut().omit_disk_link = omit;
    }

    /// Make the update call with the given zero-based index fail
    pub(crate) fn fail_update(&self, call: usize, failure: UpdateFailure) {
        self.state.borrow_mut().failures.insert(call, failure);
    }

    pub(crate) fn get_calls(&self) -> u32 {
        self.state.borrow().get_calls
    }

    pub(crate) fn updates(&self) -> Vec<DiskUpdate> {
        self.state.borrow().updates.clone()
    }

    pub(crate) fn disk(&self) -> Disk {
        self.state.borrow().disk.clone()
    }
}

fn not_found(disk_id: &str) -> ApiError {
    ApiError::Status {
        method: "GET",
        url: format!("fake:///disks/{disk_id}"),
        status: 404,
        reason: "Not Found".to_owned(),
    }
}

impl DiskApi for FakeEngine {
    fn get_disk(&self, disk_id: &str) -> Result<Disk, ApiError> {
        let mut state = self.state.borrow_mut();
        state.get_calls += 1;
        if disk_id != Self::DISK_ID {
            return Err(not_found(disk_id));
        }
        let mut disk = state.disk.clone();
        if state.stuck {
            disk.status = Some(DiskStatus::Locked);
        } else if state.remaining_locked > 0 {
            state.remaining_locked -= 1;
            disk.status = Some(DiskStatus::Locked);
        }
        Ok(disk)
    }

    fn update_disk_attachment(
        &self,
        vm_id: &str,
        disk_id: &str,
        update: &DiskUpdate,
    ) -> Result<DiskAttachment, ApiError> {
        let mut state = self.state.borrow_mut();
        let call = state.updates.len();
        state.updates.push(update.clone());
        if disk_id != Self::DISK_ID {
            return Err(not_found(disk_id));
        }

        let failure = state.failures.get(&call).copied();
        let error = ApiError::Status {
            method: "PUT",
            url: format!("fake:///vms/{vm_id}/diskattachments/{disk_id}"),
            status: 409,
            reason: "Operation Failed [Cannot edit Virtual Disk. Disk is locked.]".to_owned(),
        };
        if failure == Some(UpdateFailure::Reject) {
            return Err(error);
        }

        let disk = &mut state.disk;
        if let Some(name) = &update.name {
            disk.name = Some(name.clone());
        }
        if let Some(description) = &update.description {
            disk.description = Some(description.clone());
        }
        if let Some(v) = update.qcow_version {
            disk.qcow_version = Some(v);
        }
        if let Some(size) = update.provisioned_size {
            disk.provisioned_size = Some(size);
        }
        state.remaining_locked = state.locked_polls;

        if failure == Some(UpdateFailure::ApplyThenError) {
            return Err(error);
        }
        let link = (!state.omit_disk_link).then(|| Link {
            id: disk_id.to_owned(),
            href: Some(format!("/ovirt-engine/api/disks/{disk_id}")),
        });
        Ok(DiskAttachment {
            id: disk_id.to_owned(),
            disk: link,
        })
    }
}
