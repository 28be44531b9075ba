//! Destruction of machines

use super::Reconciler;
use crate::error::ControllerError;
use crate::report::{Outcome, Report};
use platform_def::MachineSpec;
use tracing::info;

impl Reconciler {
    /// Destroy an existing machine regardless of its power state
    #[tracing::instrument(skip_all, fields(machine = %current.name))]
    pub async fn destroy_machine(&self, current: &MachineSpec, report: &mut Report) -> Result<(), ControllerError> {
        let id = current.id.ok_or_else(|| ControllerError::InvalidState {
            name: current.name.clone(),
            reason: "listed without an ID".to_string(),
        })?;
        info!("Destroying {} (ID {})", current.name, id);
        self.client.destroy(id).await?;
        report.push(current.name.clone(), Outcome::Destroyed { id });
        Ok(())
    }
}
