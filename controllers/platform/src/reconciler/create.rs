//! Creation of missing machines

use super::Reconciler;
use crate::error::ControllerError;
use crate::report::{Outcome, Report};
use platform_def::MachineSpec;
use tracing::{info, warn};

impl Reconciler {
    /// Create a missing machine and apply its group and permissions.
    ///
    /// The assigned id is recorded on the target. A group or permission
    /// failure after a successful create is reported as a warning, since the
    /// machine exists and a later synchronize can fix it.
    #[tracing::instrument(skip_all, fields(machine = %target.name))]
    pub async fn create_machine(&self, target: &mut MachineSpec, report: &mut Report) -> Result<(), ControllerError> {
        info!("Creating {}", target.name);
        let id = self.client.create(target).await?;
        target.id = Some(id);
        info!("Created {} with ID {}", target.name, id);

        if let Some(group) = &target.group {
            if let Err(e) = self.client.set_group(id, group).await {
                warn!("{}: could not set group {}: {}", target.name, group, e);
                report.warnings.push(format!("{}: ID {}, group {} not set: {}", target.name, id, group, e));
            }
        }
        if let Some(permissions) = target.permissions {
            if let Err(e) = self.client.set_permissions(id, permissions).await {
                warn!("{}: could not set permissions {}: {}", target.name, permissions, e);
                report
                    .warnings
                    .push(format!("{}: ID {}, permissions {} not set: {}", target.name, id, permissions, e));
            }
        }

        report.push(target.name.clone(), Outcome::Created { id });
        Ok(())
    }
}
