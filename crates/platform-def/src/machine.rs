//! Machine specification model
//!
//! A `MachineSpec` describes one virtual machine, either as the platform
//! definition wants it (a target) or as the control plane reports it (an
//! observed machine). Observed-only fields (`id`, `power_state`) stay `None`
//! on targets until the machine is created.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of virtual CPUs a machine gets when nothing overrides it
pub const DEFAULT_VCPU_COUNT: u32 = 1;

/// Build the namespaced machine name for a host of a platform
pub fn machine_name(platform_name: &str, host_key: &str) -> String {
    format!("{}-{}", platform_name, host_key)
}

/// Whether a control-plane machine name belongs to the given platform
pub fn in_namespace(name: &str, platform_name: &str) -> bool {
    name.strip_prefix(platform_name)
        .is_some_and(|rest| rest.starts_with('-'))
}

/// Identifier assigned by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MachineId(pub u64);

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OpenNebula VM lifecycle state
///
/// See <https://docs.opennebula.io/stable/integration_and_development/references/vm_states.html>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    Init,
    Pending,
    Hold,
    Active,
    Stopped,
    Suspended,
    Done,
    Poweroff,
    Undeployed,
    Cloning,
    CloningFailure,
    /// A code this tool does not know about
    Unknown(u32),
}

impl PowerState {
    /// States in which the control plane accepts a resize of the compute envelope
    pub const DEFAULT_RESIZABLE: [PowerState; 5] = [
        PowerState::Hold,
        PowerState::Stopped,
        PowerState::Suspended,
        PowerState::Poweroff,
        PowerState::Undeployed,
    ];

    /// Map a numeric state code to a state
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Init,
            1 => Self::Pending,
            2 => Self::Hold,
            3 => Self::Active,
            4 => Self::Stopped,
            5 => Self::Suspended,
            6 => Self::Done,
            8 => Self::Poweroff,
            9 => Self::Undeployed,
            10 => Self::Cloning,
            11 => Self::CloningFailure,
            other => Self::Unknown(other),
        }
    }

    /// Numeric state code as reported by the control plane
    pub fn code(&self) -> u32 {
        match self {
            Self::Init => 0,
            Self::Pending => 1,
            Self::Hold => 2,
            Self::Active => 3,
            Self::Stopped => 4,
            Self::Suspended => 5,
            Self::Done => 6,
            Self::Poweroff => 8,
            Self::Undeployed => 9,
            Self::Cloning => 10,
            Self::CloningFailure => 11,
            Self::Unknown(code) => *code,
        }
    }

    fn label(&self) -> Option<&'static str> {
        Some(match self {
            Self::Init => "init",
            Self::Pending => "pending",
            Self::Hold => "hold",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Suspended => "suspended",
            Self::Done => "done",
            Self::Poweroff => "poweroff",
            Self::Undeployed => "undeployed",
            Self::Cloning => "cloning",
            Self::CloningFailure => "cloning_failure",
            Self::Unknown(_) => return None,
        })
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "{} ({})", label, self.code()),
            None => write!(f, "unknown ({})", self.code()),
        }
    }
}

/// Error returned when a power-state name or code cannot be parsed
#[derive(Debug, Error)]
#[error("unrecognized power state '{0}'")]
pub struct ParsePowerStateError(String);

impl FromStr for PowerState {
    type Err = ParsePowerStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u32>() {
            return Ok(Self::from_code(code));
        }
        let normalized = s.to_ascii_lowercase().replace('-', "_");
        (0..=11)
            .map(Self::from_code)
            .find(|state| state.label() == Some(normalized.as_str()))
            .ok_or_else(|| ParsePowerStateError(s.to_string()))
    }
}

/// Unix-like permission triple (owner, group, other), each digit being
/// use=4 + manage=2 + admin=1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub owner: u8,
    pub group: u8,
    pub other: u8,
}

impl Permissions {
    /// Build from the individual use/manage/admin bits of each class
    pub fn from_bits(owner: [bool; 3], group: [bool; 3], other: [bool; 3]) -> Self {
        let digit = |[u, m, a]: [bool; 3]| u8::from(u) * 4 + u8::from(m) * 2 + u8::from(a);
        Self {
            owner: digit(owner),
            group: digit(group),
            other: digit(other),
        }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.owner, self.group, self.other)
    }
}

/// Error returned when a permission string is not three octal digits
#[derive(Debug, Error)]
#[error("invalid permissions '{0}', expected three octal digits such as \"640\"")]
pub struct ParsePermissionsError(String);

impl FromStr for Permissions {
    type Err = ParsePermissionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: Vec<u8> = s
            .chars()
            .map(|c| c.to_digit(8).and_then(|d| u8::try_from(d).ok()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ParsePermissionsError(s.to_string()))?;
        match digits.as_slice() {
            [owner, group, other] => Ok(Self {
                owner: *owner,
                group: *group,
                other: *other,
            }),
            _ => Err(ParsePermissionsError(s.to_string())),
        }
    }
}

/// A disk comparison involved a disk with no image
#[derive(Debug, Error)]
#[error("a disk must be based on an image")]
pub struct MissingDiskImage;

/// One disk attached to a machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    /// Image name, `owner[image]` when the image belongs to another user
    #[serde(default)]
    pub image: Option<String>,
    /// Size override; `None` keeps the image's own size
    #[serde(default)]
    pub size_mb: Option<u64>,
}

impl DiskSpec {
    pub fn new(image: impl Into<String>, size_mb: Option<u64>) -> Self {
        Self {
            image: Some(image.into()),
            size_mb,
        }
    }

    /// Compare two disks for convergence purposes.
    ///
    /// Images must match. An unset size on either side means "any size",
    /// so only two explicit sizes can disagree.
    pub fn matches(&self, other: &DiskSpec) -> Result<bool, MissingDiskImage> {
        let (Some(ours), Some(theirs)) = (&self.image, &other.image) else {
            return Err(MissingDiskImage);
        };
        if ours != theirs {
            return Ok(false);
        }
        Ok(match (self.size_mb, other.size_mb) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        })
    }
}

impl fmt::Display for DiskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let image = self.image.as_deref().unwrap_or("<none>");
        match self.size_mb {
            Some(size) => write!(f, "image {} of size {} Mbytes", image, size),
            None => write!(f, "image {} of default size", image),
        }
    }
}

/// Compare two disk lists: same length and pairwise `DiskSpec::matches` in order
pub fn disks_match(current: &[DiskSpec], target: &[DiskSpec]) -> Result<bool, MissingDiskImage> {
    if current.len() != target.len() {
        return Ok(false);
    }
    for (a, b) in current.iter().zip(target) {
        if !a.matches(b)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Desired or observed configuration of one virtual machine
#[derive(Debug, Clone, PartialEq)]
pub struct MachineSpec {
    /// `{platform}-{host}`; never empty
    pub name: String,
    /// Fraction of a physical core, e.g. 0.1
    pub cpu_share: Option<f64>,
    pub vcpu_count: u32,
    pub memory_mb: Option<u64>,
    /// Network names in interface order
    pub networks: Vec<String>,
    /// `None` means the disk layout is not managed
    pub disks: Option<Vec<DiskSpec>>,
    /// Provisioning template to instantiate instead of a bare create
    pub template_ref: Option<String>,
    pub group: Option<String>,
    pub permissions: Option<Permissions>,
    pub id: Option<MachineId>,
    pub power_state: Option<PowerState>,
}

impl MachineSpec {
    /// An empty spec with only its name set
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cpu_share: None,
            vcpu_count: DEFAULT_VCPU_COUNT,
            memory_mb: None,
            networks: Vec::new(),
            disks: None,
            template_ref: None,
            group: None,
            permissions: None,
            id: None,
            power_state: None,
        }
    }
}

fn display_opt<T: fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "None".to_string(), ToString::to_string)
}

/// Multi-line human readable rendering used by `parse-only`
impl fmt::Display for MachineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "name: {}", self.name)?;
        writeln!(f, "\tgroup: {}", display_opt(self.group.as_ref()))?;
        writeln!(f, "\tpermissions: {}", display_opt(self.permissions.as_ref()))?;
        writeln!(f, "\tcpu: {}", display_opt(self.cpu_share.as_ref()))?;
        writeln!(f, "\tvcpu: {}", self.vcpu_count)?;
        writeln!(f, "\tmem_mb: {}", display_opt(self.memory_mb.as_ref()))?;
        writeln!(f, "\tone_template: {}", display_opt(self.template_ref.as_ref()))?;
        write!(f, "\tnetworks: {}", self.networks.len())?;
        for network in &self.networks {
            write!(f, "\n\t\t{}", network)?;
        }
        let disks = self.disks.as_deref().unwrap_or_default();
        write!(f, "\n\tdisks: {}", disks.len())?;
        for disk in disks {
            write!(f, "\n\t\t{}", disk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_unset_size_is_dont_care() {
        let bare = DiskSpec::new("x", None);
        let sized = DiskSpec::new("x", Some(100));
        assert!(bare.matches(&sized).unwrap());
        assert!(sized.matches(&bare).unwrap());
    }

    #[test]
    fn test_disk_explicit_sizes_must_agree() {
        let small = DiskSpec::new("x", Some(50));
        let large = DiskSpec::new("x", Some(100));
        assert!(!small.matches(&large).unwrap());
    }

    #[test]
    fn test_disk_image_mismatch() {
        assert!(!DiskSpec::new("x", None).matches(&DiskSpec::new("y", None)).unwrap());
    }

    #[test]
    fn test_disk_without_image_is_an_error() {
        let imageless = DiskSpec { image: None, size_mb: Some(10) };
        assert!(imageless.matches(&DiskSpec::new("x", None)).is_err());
        assert!(DiskSpec::new("x", None).matches(&imageless).is_err());
    }

    #[test]
    fn test_disk_lists_are_order_sensitive() {
        let a = vec![DiskSpec::new("a", None), DiskSpec::new("b", None)];
        let b = vec![DiskSpec::new("b", None), DiskSpec::new("a", None)];
        assert!(!disks_match(&a, &b).unwrap());
        assert!(disks_match(&a, &a.clone()).unwrap());
        assert!(!disks_match(&a, &a[..1]).unwrap());
    }

    #[test]
    fn test_namespace_requires_dash_after_prefix() {
        assert!(in_namespace("web-a", "web"));
        assert!(!in_namespace("webapp-a", "web"));
        assert!(!in_namespace("web", "web"));
        assert!(!in_namespace("other-web-a", "web"));
    }

    #[test]
    fn test_power_state_parsing() {
        assert_eq!("poweroff".parse::<PowerState>().unwrap(), PowerState::Poweroff);
        assert_eq!("8".parse::<PowerState>().unwrap(), PowerState::Poweroff);
        assert_eq!(" Hold ".parse::<PowerState>().unwrap(), PowerState::Hold);
        assert_eq!("42".parse::<PowerState>().unwrap(), PowerState::Unknown(42));
        assert!("sleeping".parse::<PowerState>().is_err());
    }

    #[test]
    fn test_power_state_code_roundtrip_for_known_states() {
        for code in [0, 1, 2, 3, 4, 5, 6, 8, 9, 10, 11] {
            assert_eq!(PowerState::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_permissions_parse_and_bits() {
        let perms: Permissions = "640".parse().unwrap();
        assert_eq!(perms.to_string(), "640");
        assert!("648".parse::<Permissions>().is_err());
        assert!("64".parse::<Permissions>().is_err());
        let from_bits = Permissions::from_bits(
            [true, true, false],
            [true, false, false],
            [false, false, false],
        );
        assert_eq!(from_bits, perms);
    }

    #[test]
    fn test_pretty_rendering() {
        let mut spec = MachineSpec::new("pf-web");
        spec.cpu_share = Some(0.5);
        spec.memory_mb = Some(512);
        spec.networks = vec!["cloud".to_string()];
        spec.disks = Some(vec![DiskSpec::new("ttylinux", Some(256))]);
        let rendered = spec.to_string();
        assert!(rendered.starts_with("name: pf-web\n"));
        assert!(rendered.contains("\tcpu: 0.5\n"));
        assert!(rendered.contains("\tnetworks: 1\n\t\tcloud"));
        assert!(rendered.ends_with("\tdisks: 1\n\t\timage ttylinux of size 256 Mbytes"));
    }
}
