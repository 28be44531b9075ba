//! Class resolution
//!
//! Turns a definition document into concrete machine specifications. For
//! each host the platform defaults are applied first, then the host's class
//! chain from the most distant ancestor down, then the host's own fields.

use crate::definition::{DefinitionDocument, MachineOverride, Patch, SUPPORTED_FORMAT_VERSION};
use crate::error::DefinitionError;
use crate::machine::{machine_name, MachineSpec, Permissions, DEFAULT_VCPU_COUNT};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Target machines of one platform, keyed by machine name
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDefinition {
    pub platform_name: String,
    pub targets: BTreeMap<String, MachineSpec>,
}

/// Resolve a definition document into its target machines
pub fn resolve(document: &DefinitionDocument) -> Result<ResolvedDefinition, DefinitionError> {
    if document.format_version.0 != SUPPORTED_FORMAT_VERSION {
        return Err(DefinitionError::ConfigFormat(format!(
            "unhandled format version {} (supported: {})",
            document.format_version.0, SUPPORTED_FORMAT_VERSION
        )));
    }

    let platform_name = document.platform_name.trim();
    if platform_name.is_empty() {
        return Err(DefinitionError::Validation(
            "platform name cannot be empty, because every accessible machine would be considered part of the platform".to_string(),
        ));
    }

    // Check every class, not only the referenced ones, so a broken class
    // fails the load even before a host starts using it.
    for class_name in document.classes.keys() {
        class_chain(document, Some(class_name))?;
    }

    let mut targets = BTreeMap::new();
    for (host_key, host) in document.hosts.iter() {
        if host_key.trim().is_empty() {
            return Err(DefinitionError::Validation(format!(
                "platform {} declares a host with an empty name",
                platform_name
            )));
        }
        let machine = resolve_host(document, platform_name, host_key, host)?;
        if targets.contains_key(&machine.name) {
            return Err(DefinitionError::Validation(format!(
                "host {} is declared more than once (machine {})",
                host_key, machine.name
            )));
        }
        debug!("VM final configuration {:?}", machine);
        targets.insert(machine.name.clone(), machine);
    }

    Ok(ResolvedDefinition {
        platform_name: platform_name.to_string(),
        targets,
    })
}

fn resolve_host(
    document: &DefinitionDocument,
    platform_name: &str,
    host_key: &str,
    host: &MachineOverride,
) -> Result<MachineSpec, DefinitionError> {
    let mut machine = MachineSpec::new(machine_name(platform_name, host_key));

    if let Some(defaults) = &document.defaults {
        apply_override(&mut machine, defaults, "defaults")?;
    }

    // chain is nearest-first; ancestors must apply before descendants
    let chain = class_chain(document, host.class.as_deref())?;
    for (class_name, class) in chain.iter().rev() {
        apply_override(&mut machine, class, &format!("class {}", class_name))?;
    }
    apply_override(&mut machine, host, &format!("host {}", host_key))?;

    Ok(machine)
}

/// Walk `class` references starting at `start`, nearest class first.
///
/// Fails on an unknown class name or on a class visited twice.
fn class_chain<'a>(
    document: &'a DefinitionDocument,
    start: Option<&'a str>,
) -> Result<Vec<(&'a str, &'a MachineOverride)>, DefinitionError> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut next = start;

    while let Some(class_name) = next {
        if !visited.insert(class_name) {
            let mut path: Vec<&str> = chain.iter().map(|(name, _)| *name).collect();
            path.push(class_name);
            return Err(DefinitionError::ConfigCycle(path.join(" -> ")));
        }
        let class = document.classes.get(class_name).ok_or_else(|| {
            DefinitionError::Validation(format!("reference to undefined class {}", class_name))
        })?;
        chain.push((class_name, class));
        next = class.class.as_deref();
    }

    Ok(chain)
}

/// Apply one partial override on top of a machine
fn apply_override(
    machine: &mut MachineSpec,
    params: &MachineOverride,
    origin: &str,
) -> Result<(), DefinitionError> {
    for key in params.unrecognized.keys() {
        warn!("Ignoring unrecognized key '{}' in {} of {}", key, origin, machine.name);
    }

    params.cpu_percent.apply_to(&mut machine.cpu_share);
    match &params.vcpu_count {
        Patch::Absent => {}
        Patch::Clear => machine.vcpu_count = DEFAULT_VCPU_COUNT,
        Patch::Set(count) => machine.vcpu_count = *count,
    }
    params.mem_mb.apply_to(&mut machine.memory_mb);
    match &params.networks {
        Patch::Absent => {}
        Patch::Clear => machine.networks.clear(),
        Patch::Set(networks) => machine.networks.clone_from(networks),
    }
    params.disks.apply_to(&mut machine.disks);
    params.one_template.apply_to(&mut machine.template_ref);
    params.group.apply_to(&mut machine.group);
    match &params.permissions {
        Patch::Absent => {}
        Patch::Clear => machine.permissions = None,
        Patch::Set(raw) => {
            let permissions = raw.parse::<Permissions>().map_err(|e| {
                DefinitionError::Validation(format!("{} of {}: {}", origin, machine.name, e))
            })?;
            machine.permissions = Some(permissions);
        }
    }

    debug!("VM {} after {} override {:?}", machine.name, origin, machine);
    Ok(())
}
