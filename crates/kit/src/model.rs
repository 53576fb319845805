//! Typed views of the engine resources ovdk touches
//!
//! Only the attributes the disk-update workflow reads or writes are modeled.
//! The engine's JSON representation encodes integers as strings, so numeric
//! fields accept either form.

use serde::{Deserialize, Deserializer, Serialize};

/// QCOW compatibility level of a disk image
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, clap::ValueEnum,
)]
pub enum QcowVersion {
    /// QCOW2 version 2 (compat=0.10)
    #[serde(rename = "qcow2_v2")]
    #[strum(serialize = "qcow2_v2")]
    #[value(name = "v2")]
    V2,
    /// QCOW2 version 3 (compat=1.1)
    #[serde(rename = "qcow2_v3")]
    #[strum(serialize = "qcow2_v3")]
    #[value(name = "v3")]
    V3,
}

/// Disk status as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DiskStatus {
    /// The disk is usable; the only terminal success value
    Ok,
    /// An operation on the disk is in progress
    Locked,
    /// The disk is in an error state
    Illegal,
    /// A status this client does not know about
    Unknown(String),
}

impl From<String> for DiskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ok" => DiskStatus::Ok,
            "locked" => DiskStatus::Locked,
            "illegal" => DiskStatus::Illegal,
            _ => DiskStatus::Unknown(s),
        }
    }
}

impl From<DiskStatus> for String {
    fn from(status: DiskStatus) -> Self {
        status.as_str().to_owned()
    }
}

impl DiskStatus {
    /// Wire representation of the status
    pub fn as_str(&self) -> &str {
        match self {
            DiskStatus::Ok => "ok",
            DiskStatus::Locked => "locked",
            DiskStatus::Illegal => "illegal",
            DiskStatus::Unknown(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for DiskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a disk resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    /// Engine-assigned disk id
    pub id: String,
    /// Disk alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qcow_version: Option<QcowVersion>,
    /// Virtual size in bytes
    #[serde(
        default,
        deserialize_with = "deserialize_opt_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub provisioned_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DiskStatus>,
}

impl Disk {
    /// Whether the disk has reached the terminal `ok` status
    pub fn is_stable(&self) -> bool {
        self.status == Some(DiskStatus::Ok)
    }
}

/// Partial update applied to a disk through its attachment
///
/// Unset fields are omitted from the request body and left untouched by the
/// engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qcow_version: Option<QcowVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioned_size: Option<u64>,
}

impl DiskUpdate {
    /// True if the update would not change anything
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.qcow_version.is_none()
            && self.provisioned_size.is_none()
    }
}

/// Request body for `PUT /vms/{vm}/diskattachments/{disk}`
#[derive(Debug, Serialize)]
pub(crate) struct DiskAttachmentUpdate<'a> {
    pub(crate) disk: &'a DiskUpdate,
}

/// Reference to another resource, as embedded by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Association between a virtual machine and a disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskAttachment {
    pub id: String,
    #[serde(default)]
    pub disk: Option<Link>,
}

impl DiskAttachment {
    /// Id of the attached disk, if the engine linked it
    pub fn disk_id(&self) -> Option<&str> {
        self.disk.as_ref().map(|l| l.id.as_str())
    }
}

/// Virtual machine summary
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Vm {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Collection wrapper returned by `GET /vms`; an empty result is `{}`
#[derive(Debug, Default, Deserialize)]
pub(crate) struct VmList {
    #[serde(default)]
    pub(crate) vm: Vec<Vm>,
}

/// Error payload attached to failed engine requests
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Fault {
    #[serde(default)]
    pub(crate) reason: Option<String>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
}

impl Fault {
    /// Render reason and detail on one line
    pub(crate) fn summary(&self) -> Option<String> {
        match (&self.reason, &self.detail) {
            (Some(r), Some(d)) => Some(format!("{r} {d}")),
            (Some(s), None) | (None, Some(s)) => Some(s.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum U64Repr {
    Number(u64),
    Text(String),
}

fn deserialize_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<U64Repr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(U64Repr::Number(n)) => Ok(Some(n)),
        Some(U64Repr::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid integer {s:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_disk_from_engine_json() {
        let json = indoc! {r#"
            {
              "actual_size": "200704",
              "alias": "mydisk_alias",
              "name": "mydisk_alias",
              "description": "description",
              "format": "cow",
              "provisioned_size": "10737418240",
              "qcow_version": "qcow2_v2",
              "status": "ok",
              "storage_type": "image",
              "href": "/ovirt-engine/api/disks/d83a1d61-088c-4423-9695-a752561091b9",
              "id": "d83a1d61-088c-4423-9695-a752561091b9"
            }
        "#};
        let disk: Disk = serde_json::from_str(json).unwrap();
        assert_eq!(disk.id, "d83a1d61-088c-4423-9695-a752561091b9");
        assert_eq!(disk.name.as_deref(), Some("mydisk_alias"));
        assert_eq!(disk.qcow_version, Some(QcowVersion::V2));
        assert_eq!(disk.provisioned_size, Some(10737418240));
        assert!(disk.is_stable());
    }

    #[test]
    fn test_numeric_size_and_unknown_status() {
        let disk: Disk =
            serde_json::from_str(r#"{"id": "x", "provisioned_size": 1024, "status": "weird"}"#)
                .unwrap();
        assert_eq!(disk.provisioned_size, Some(1024));
        assert_eq!(disk.status, Some(DiskStatus::Unknown("weird".to_string())));
        assert!(!disk.is_stable());

        let bad = serde_json::from_str::<Disk>(r#"{"id": "x", "provisioned_size": "12G"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_update_body_omits_unset_fields() {
        let update = DiskUpdate {
            qcow_version: Some(QcowVersion::V3),
            ..Default::default()
        };
        let body = serde_json::to_value(DiskAttachmentUpdate { disk: &update }).unwrap();
        similar_asserts::assert_eq!(
            body,
            serde_json::json!({"disk": {"qcow_version": "qcow2_v3"}})
        );
        assert!(!update.is_empty());
        assert!(DiskUpdate::default().is_empty());
    }

    #[test]
    fn test_attachment_and_vm_list() {
        let att: DiskAttachment = serde_json::from_str(indoc! {r#"
            {
              "id": "d1",
              "interface": "virtio",
              "disk": {"href": "/ovirt-engine/api/disks/d1", "id": "d1"}
            }
        "#})
        .unwrap();
        assert_eq!(att.disk_id(), Some("d1"));

        let empty: VmList = serde_json::from_str("{}").unwrap();
        assert!(empty.vm.is_empty());
        let one: VmList =
            serde_json::from_str(r#"{"vm": [{"id": "v1", "name": "vm1", "status": "up"}]}"#)
                .unwrap();
        assert_eq!(one.vm[0].name.as_deref(), Some("vm1"));
    }

    #[test]
    fn test_fault_summary() {
        let f: Fault = serde_json::from_str(indoc! {r#"
            {
              "reason": "Operation Failed",
              "detail": "[Cannot edit Virtual Disk. Disk is locked.]"
            }
        "#})
        .unwrap();
        assert_eq!(
            f.summary().as_deref(),
            Some("Operation Failed [Cannot edit Virtual Disk. Disk is locked.]")
        );
        assert_eq!(Fault::default().summary(), None);
    }
}
