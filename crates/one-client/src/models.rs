//! OpenNebula CLI models
//!
//! `onevm list --json` and `oneuser show --json` emit JSON converted from the
//! XML-RPC documents: every scalar is a string, and a child element that
//! appears once is an object while a repeated one is an array.

use platform_def::{DiskSpec, MachineId, MachineSpec, Permissions, PowerState, DEFAULT_VCPU_COUNT};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;

/// Child element that may occur once or many times
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

fn flatten<T>(value: Option<OneOrMany<T>>) -> Vec<T> {
    value.map(OneOrMany::into_vec).unwrap_or_default()
}

/// Scalar sent either as a JSON string or a JSON number
fn scalar<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(text) => text.trim().parse().map_err(de::Error::custom),
        serde_json::Value::Number(number) => number.to_string().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected a scalar, got {}", other))),
    }
}

fn optional_scalar<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(text)) => text.trim().parse().map(Some).map_err(de::Error::custom),
        Some(serde_json::Value::Number(number)) => {
            number.to_string().parse().map(Some).map_err(de::Error::custom)
        }
        Some(other) => Err(de::Error::custom(format!("expected a scalar, got {}", other))),
    }
}

/// `onevm list --json`
#[derive(Debug, Clone, Deserialize)]
pub struct VmPoolResponse {
    #[serde(rename = "VM_POOL")]
    pub vm_pool: VmPool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmPool {
    #[serde(rename = "VM", default)]
    pub vms: Option<OneOrMany<VmRecord>>,
}

impl VmPoolResponse {
    pub fn into_records(self) -> Vec<VmRecord> {
        flatten(self.vm_pool.vms)
    }
}

/// One `VM` element of the pool listing
#[derive(Debug, Clone, Deserialize)]
pub struct VmRecord {
    #[serde(rename = "ID", deserialize_with = "scalar")]
    pub id: u64,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "GNAME", default)]
    pub group_name: Option<String>,
    #[serde(rename = "PERMISSIONS", default)]
    pub permissions: Option<PermissionRecord>,
    #[serde(rename = "STATE", deserialize_with = "scalar")]
    pub state: u32,
    #[serde(rename = "TEMPLATE", default)]
    pub template: VmTemplateRecord,
}

/// Use/manage/admin bits for owner, group and others (each "0" or "1")
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRecord {
    #[serde(rename = "OWNER_U", deserialize_with = "scalar")]
    pub owner_u: u8,
    #[serde(rename = "OWNER_M", deserialize_with = "scalar")]
    pub owner_m: u8,
    #[serde(rename = "OWNER_A", deserialize_with = "scalar")]
    pub owner_a: u8,
    #[serde(rename = "GROUP_U", deserialize_with = "scalar")]
    pub group_u: u8,
    #[serde(rename = "GROUP_M", deserialize_with = "scalar")]
    pub group_m: u8,
    #[serde(rename = "GROUP_A", deserialize_with = "scalar")]
    pub group_a: u8,
    #[serde(rename = "OTHER_U", deserialize_with = "scalar")]
    pub other_u: u8,
    #[serde(rename = "OTHER_M", deserialize_with = "scalar")]
    pub other_m: u8,
    #[serde(rename = "OTHER_A", deserialize_with = "scalar")]
    pub other_a: u8,
}

impl PermissionRecord {
    pub fn to_permissions(&self) -> Permissions {
        let bit = |value: u8| value != 0;
        Permissions::from_bits(
            [bit(self.owner_u), bit(self.owner_m), bit(self.owner_a)],
            [bit(self.group_u), bit(self.group_m), bit(self.group_a)],
            [bit(self.other_u), bit(self.other_m), bit(self.other_a)],
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmTemplateRecord {
    #[serde(rename = "CPU", default, deserialize_with = "optional_scalar")]
    pub cpu: Option<f64>,
    #[serde(rename = "VCPU", default, deserialize_with = "optional_scalar")]
    pub vcpu: Option<u32>,
    #[serde(rename = "MEMORY", default, deserialize_with = "optional_scalar")]
    pub memory: Option<u64>,
    #[serde(rename = "DISK", default)]
    pub disks: Option<OneOrMany<DiskRecord>>,
    #[serde(rename = "NIC", default)]
    pub nics: Option<OneOrMany<NicRecord>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskRecord {
    #[serde(rename = "IMAGE", default)]
    pub image: Option<String>,
    #[serde(rename = "IMAGE_UNAME", default)]
    pub image_owner: Option<String>,
    #[serde(rename = "SIZE", alias = "SIZE_MB", default, deserialize_with = "optional_scalar")]
    pub size_mb: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NicRecord {
    #[serde(rename = "NETWORK")]
    pub network: String,
    #[serde(rename = "NETWORK_UNAME", default)]
    pub network_owner: Option<String>,
    #[serde(rename = "NIC_ID", deserialize_with = "scalar")]
    pub nic_id: u32,
}

/// `owner[name]` for resources of another user, plain `name` otherwise
fn qualify(name: String, owner: Option<&str>, current_user: Option<&str>) -> String {
    match owner {
        Some(owner) if Some(owner) != current_user => format!("{}[{}]", owner, name),
        _ => name,
    }
}

impl VmRecord {
    /// Convert to an observed machine. Owner qualifiers matching
    /// `current_user` are dropped; with no current user every owner is kept.
    pub fn into_machine(self, current_user: Option<&str>) -> MachineSpec {
        let mut machine = MachineSpec::new(self.name);
        machine.id = Some(MachineId(self.id));
        machine.power_state = Some(PowerState::from_code(self.state));
        machine.group = self.group_name;
        machine.permissions = self.permissions.as_ref().map(PermissionRecord::to_permissions);
        machine.cpu_share = self.template.cpu;
        machine.vcpu_count = self.template.vcpu.unwrap_or(DEFAULT_VCPU_COUNT);
        machine.memory_mb = self.template.memory;

        let mut nics = flatten(self.template.nics);
        nics.sort_by_key(|nic| nic.nic_id);
        machine.networks = nics
            .into_iter()
            .map(|nic| qualify(nic.network, nic.network_owner.as_deref(), current_user))
            .collect();

        machine.disks = Some(
            flatten(self.template.disks)
                .into_iter()
                .map(|disk| DiskSpec {
                    image: disk
                        .image
                        .map(|image| qualify(image, disk.image_owner.as_deref(), current_user)),
                    size_mb: disk.size_mb,
                })
                .collect(),
        );
        machine
    }
}

/// `oneuser show --json`
#[derive(Debug, Clone, Deserialize)]
pub struct UserResponse {
    #[serde(rename = "USER")]
    pub user: UserInfo,
}

/// Identity of the authenticated control-plane user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    #[serde(rename = "ID", deserialize_with = "scalar")]
    pub uid: u64,
    #[serde(rename = "GID", deserialize_with = "scalar")]
    pub gid: u64,
    #[serde(rename = "NAME")]
    pub name: String,
}

/// Compute envelope change; `None` fields are left as they are
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResizeRequest {
    pub cpu_share: Option<f64>,
    pub vcpu_count: Option<u32>,
    pub memory_mb: Option<u64>,
}

impl ResizeRequest {
    pub fn is_empty(&self) -> bool {
        self.cpu_share.is_none() && self.vcpu_count.is_none() && self.memory_mb.is_none()
    }
}

/// Decode a CLI JSON document
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(text)
}
