//! Synchronization of present machines

use super::diff::{diff, AttributeKey, AttributeValue, Difference};
use super::Reconciler;
use crate::error::ControllerError;
use crate::report::{Outcome, Report};
use platform_def::{MachineId, MachineSpec};
use tracing::{debug, info, warn};

impl Reconciler {
    /// Bring an existing machine in line with its target.
    ///
    /// Network and disk differences are only reported. Group and permissions
    /// are applied first, then the compute envelope if the observed power
    /// state allows a resize. The observed spec is updated with whatever
    /// was applied.
    #[tracing::instrument(skip_all, fields(machine = %target.name))]
    pub async fn synchronize_machine(
        &self,
        current: &mut MachineSpec,
        target: &mut MachineSpec,
        report: &mut Report,
    ) -> Result<(), ControllerError> {
        let difference = diff(current, target)?;
        if difference.is_empty() {
            debug!("{} is up to date", current.name);
            return Ok(());
        }
        let id = current.id.ok_or_else(|| ControllerError::InvalidState {
            name: current.name.clone(),
            reason: "listed without an ID".to_string(),
        })?;
        target.id = Some(id);
        target.power_state = current.power_state;

        for (key, from, to) in difference.iter().filter(|(key, _, _)| key.is_topology()) {
            warn!(
                "{}: ID {}, not changing {} from {} to {}, this must be done manually",
                current.name, id, key, from, to
            );
            report.warnings.push(format!(
                "{}: ID {}, {} differ ({} instead of {}), not changed automatically",
                current.name, id, key, from, to
            ));
        }

        let mut applied = Difference::default();

        if let Some((from, to @ AttributeValue::Group(group))) = difference.get(AttributeKey::Group) {
            self.client.set_group(id, group).await?;
            current.group = Some(group.clone());
            applied.insert(AttributeKey::Group, from.clone(), to.clone());
        }
        if let Some((from, to @ AttributeValue::Permissions(permissions))) = difference.get(AttributeKey::Permissions) {
            self.client.set_permissions(id, *permissions).await?;
            current.permissions = Some(*permissions);
            applied.insert(AttributeKey::Permissions, from.clone(), to.clone());
        }

        let compute = difference.filter(AttributeKey::is_compute);
        let resized = if compute.is_empty() {
            Ok(false)
        } else {
            self.resize_machine(current, id, &compute).await
        };
        if let Ok(true) = resized {
            for (key, from, to) in compute.iter() {
                applied.insert(key, from.clone(), to.clone());
            }
        }

        // changes applied before a failed resize stay in place
        if !applied.is_empty() {
            report.push(current.name.clone(), Outcome::Changed { id, applied });
        }
        resized.map(|_| ())
    }

    /// Returns whether a resize was sent
    async fn resize_machine(
        &self,
        current: &mut MachineSpec,
        id: MachineId,
        compute: &Difference,
    ) -> Result<bool, ControllerError> {
        let request = compute.resize_request();
        if request.is_empty() {
            warn!("{}: compute attributes differ but the target leaves them unset", current.name);
            return Ok(false);
        }
        self.check_resizable(current)?;
        info!("Resizing {} (ID {}): {}", current.name, id, compute);
        self.client.resize(id, &request).await?;
        if let Some(cpu) = request.cpu_share {
            current.cpu_share = Some(cpu);
        }
        if let Some(vcpu) = request.vcpu_count {
            current.vcpu_count = vcpu;
        }
        if let Some(memory) = request.memory_mb {
            current.memory_mb = Some(memory);
        }
        Ok(true)
    }

    /// Refuse a resize unless the observed power state is in the allowed set
    fn check_resizable(&self, current: &MachineSpec) -> Result<(), ControllerError> {
        match current.power_state {
            Some(state) if self.config.resizable_states.contains(&state) => Ok(()),
            Some(state) => Err(ControllerError::InvalidState {
                name: current.name.clone(),
                reason: format!(
                    "cannot resize in state {}, allowed states are: {}",
                    state,
                    self.config
                        .resizable_states
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
            None => Err(ControllerError::InvalidState {
                name: current.name.clone(),
                reason: "power state is unknown".to_string(),
            }),
        }
    }
}
