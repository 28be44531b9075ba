//! Attribute-level differences between an existing and a target machine

use crate::error::ControllerError;
use one_client::ResizeRequest;
use platform_def::{disks_match, DiskSpec, MachineSpec, Permissions};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute compared between two machine specifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeKey {
    CpuPercent,
    VcpuCount,
    MemMb,
    Networks,
    Disks,
    Group,
    Permissions,
}

impl AttributeKey {
    /// Name used in definition files and reports
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeKey::CpuPercent => "cpu_percent",
            AttributeKey::VcpuCount => "vcpu_count",
            AttributeKey::MemMb => "mem_mb",
            AttributeKey::Networks => "networks",
            AttributeKey::Disks => "disks",
            AttributeKey::Group => "group",
            AttributeKey::Permissions => "permissions",
        }
    }

    /// Changes to these are never applied automatically
    pub fn is_topology(self) -> bool {
        matches!(self, AttributeKey::Networks | AttributeKey::Disks)
    }

    /// Applied through a resize of the compute envelope
    pub fn is_compute(self) -> bool {
        matches!(self, AttributeKey::CpuPercent | AttributeKey::VcpuCount | AttributeKey::MemMb)
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of one side of a difference
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    CpuShare(Option<f64>),
    VcpuCount(u32),
    MemoryMb(Option<u64>),
    Networks(Vec<String>),
    Disks(Vec<DiskSpec>),
    Group(String),
    Permissions(Permissions),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::CpuShare(Some(cpu)) => write!(f, "{}", cpu),
            AttributeValue::MemoryMb(Some(mem)) => write!(f, "{}", mem),
            AttributeValue::CpuShare(None) | AttributeValue::MemoryMb(None) => f.write_str("unset"),
            AttributeValue::VcpuCount(vcpu) => write!(f, "{}", vcpu),
            AttributeValue::Networks(networks) => write!(f, "[{}]", networks.join(", ")),
            AttributeValue::Disks(disks) => {
                let rendered: Vec<String> = disks
                    .iter()
                    .map(|disk| match (&disk.image, disk.size_mb) {
                        (Some(image), Some(size)) => format!("{}:{}", image, size),
                        (Some(image), None) => image.clone(),
                        (None, _) => "?".to_string(),
                    })
                    .collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            AttributeValue::Group(group) => f.write_str(group),
            AttributeValue::Permissions(permissions) => write!(f, "{}", permissions),
        }
    }
}

/// Differing attributes, each with its `(current, target)` values.
///
/// An empty difference means the machine is converged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Difference {
    changes: BTreeMap<AttributeKey, (AttributeValue, AttributeValue)>,
}

impl Difference {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn contains(&self, key: AttributeKey) -> bool {
        self.changes.contains_key(&key)
    }

    pub fn get(&self, key: AttributeKey) -> Option<&(AttributeValue, AttributeValue)> {
        self.changes.get(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = AttributeKey> + '_ {
        self.changes.keys().copied()
    }

    /// Changes in key order
    pub fn iter(&self) -> impl Iterator<Item = (AttributeKey, &AttributeValue, &AttributeValue)> {
        self.changes
            .iter()
            .map(|(key, (current, target))| (*key, current, target))
    }

    /// Subset of the difference restricted to the keys accepted by `keep`
    pub fn filter(&self, keep: impl Fn(AttributeKey) -> bool) -> Difference {
        Difference {
            changes: self
                .changes
                .iter()
                .filter(|(key, _)| keep(**key))
                .map(|(key, values)| (*key, values.clone()))
                .collect(),
        }
    }

    pub(crate) fn insert(&mut self, key: AttributeKey, current: AttributeValue, target: AttributeValue) {
        self.changes.insert(key, (current, target));
    }

    /// Resize carrying the target compute values that differ.
    ///
    /// A target left unset cannot be applied and is skipped.
    pub fn resize_request(&self) -> ResizeRequest {
        let mut request = ResizeRequest::default();
        for (_, _, target) in self.iter() {
            match target {
                AttributeValue::CpuShare(cpu) => request.cpu_share = *cpu,
                AttributeValue::VcpuCount(vcpu) => request.vcpu_count = Some(*vcpu),
                AttributeValue::MemoryMb(mem) => request.memory_mb = *mem,
                _ => {}
            }
        }
        request
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, current, target)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} from {} to {}", key, current, target)?;
        }
        Ok(())
    }
}

/// Compute the differences between an existing machine and its target.
///
/// Disks are compared only when both sides carry a disk list. Group and
/// permissions only count when both sides have a value.
pub fn diff(current: &MachineSpec, target: &MachineSpec) -> Result<Difference, ControllerError> {
    if current.name != target.name {
        return Err(ControllerError::IdentityMismatch {
            current: current.name.clone(),
            target: target.name.clone(),
        });
    }

    let mut difference = Difference::default();

    if current.cpu_share != target.cpu_share {
        difference.insert(
            AttributeKey::CpuPercent,
            AttributeValue::CpuShare(current.cpu_share),
            AttributeValue::CpuShare(target.cpu_share),
        );
    }
    if current.vcpu_count != target.vcpu_count {
        difference.insert(
            AttributeKey::VcpuCount,
            AttributeValue::VcpuCount(current.vcpu_count),
            AttributeValue::VcpuCount(target.vcpu_count),
        );
    }
    if current.memory_mb != target.memory_mb {
        difference.insert(
            AttributeKey::MemMb,
            AttributeValue::MemoryMb(current.memory_mb),
            AttributeValue::MemoryMb(target.memory_mb),
        );
    }
    if current.networks != target.networks {
        difference.insert(
            AttributeKey::Networks,
            AttributeValue::Networks(current.networks.clone()),
            AttributeValue::Networks(target.networks.clone()),
        );
    }
    if let (Some(current_disks), Some(target_disks)) = (&current.disks, &target.disks) {
        let same = disks_match(current_disks, target_disks).map_err(|e| ControllerError::InvalidState {
            name: current.name.clone(),
            reason: e.to_string(),
        })?;
        if !same {
            difference.insert(
                AttributeKey::Disks,
                AttributeValue::Disks(current_disks.clone()),
                AttributeValue::Disks(target_disks.clone()),
            );
        }
    }
    if let (Some(current_group), Some(target_group)) = (&current.group, &target.group) {
        if current_group != target_group {
            difference.insert(
                AttributeKey::Group,
                AttributeValue::Group(current_group.clone()),
                AttributeValue::Group(target_group.clone()),
            );
        }
    }
    if let (Some(current_perms), Some(target_perms)) = (current.permissions, target.permissions) {
        if current_perms != target_perms {
            difference.insert(
                AttributeKey::Permissions,
                AttributeValue::Permissions(current_perms),
                AttributeValue::Permissions(target_perms),
            );
        }
    }

    Ok(difference)
}
