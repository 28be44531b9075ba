//! Convergence engine.
//!
//! Classifies machine names into missing, present and unreferenced sets and
//! dispatches the operations of the requested action, one machine at a time
//! in name order:
//! - `create`: create-missing
//! - `synchronize`: group, permissions and resize of present machines
//! - `destroy`: delete-unreferenced and delete-all
//! - `diff`: attribute-level differences

pub mod create;
pub mod destroy;
pub mod diff;
pub mod synchronize;

use crate::config::{Action, EngineConfig, FailurePolicy};
use crate::error::ControllerError;
use crate::report::{Failure, Outcome, Report};
use one_client::OneClientTrait;
use platform_def::{in_namespace, MachineSpec, ResolvedDefinition};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Partition of machine names for one platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Defined but not on the control plane
    pub missing: BTreeSet<String>,
    /// Defined and on the control plane
    pub present: BTreeSet<String>,
    /// On the control plane under the platform's namespace but not defined
    pub unreferenced: BTreeSet<String>,
}

impl Classification {
    pub fn new<T, E>(targets: &BTreeMap<String, T>, existing: &BTreeMap<String, E>) -> Self {
        let target_names: BTreeSet<&String> = targets.keys().collect();
        let existing_names: BTreeSet<&String> = existing.keys().collect();
        Self {
            missing: target_names.difference(&existing_names).map(|n| (*n).clone()).collect(),
            present: target_names.intersection(&existing_names).map(|n| (*n).clone()).collect(),
            unreferenced: existing_names.difference(&target_names).map(|n| (*n).clone()).collect(),
        }
    }
}

/// Keep the machines of the platform's namespace, keyed by name.
///
/// The control plane allows duplicate names; the lowest id wins.
pub fn existing_in_namespace(platform_name: &str, inventory: Vec<MachineSpec>) -> BTreeMap<String, MachineSpec> {
    let mut existing: BTreeMap<String, MachineSpec> = BTreeMap::new();
    for machine in inventory {
        if !in_namespace(&machine.name, platform_name) {
            continue;
        }
        match existing.get(&machine.name) {
            Some(kept) if kept.id <= machine.id => {
                warn!(
                    "Several machines are named {}, ignoring ID {}",
                    machine.name,
                    machine.id.map(|id| id.to_string()).unwrap_or_default()
                );
            }
            _ => {
                existing.insert(machine.name.clone(), machine);
            }
        }
    }
    existing
}

/// Reconciles the machines of a platform against the control plane.
pub struct Reconciler {
    pub(crate) client: Box<dyn OneClientTrait>,
    pub(crate) config: EngineConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("endpoint", &self.client.endpoint())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(client: Box<dyn OneClientTrait>, config: EngineConfig, cancel: CancellationToken) -> Self {
        Self { client, config, cancel }
    }

    pub fn client(&self) -> &dyn OneClientTrait {
        self.client.as_ref()
    }

    /// Apply `action` to the resolved targets given the observed inventory.
    ///
    /// Outcomes and per-machine failures are recorded in `report` as they
    /// happen, so it stays accurate when a fatal error or cancellation is
    /// returned mid-batch.
    pub async fn reconcile(
        &self,
        action: Action,
        definition: &mut ResolvedDefinition,
        inventory: Vec<MachineSpec>,
        report: &mut Report,
    ) -> Result<(), ControllerError> {
        if action == Action::ParseOnly {
            for spec in definition.targets.values() {
                report.push(spec.name.clone(), Outcome::Resolved(Box::new(spec.clone())));
            }
            return Ok(());
        }

        let mut existing = existing_in_namespace(&definition.platform_name, inventory);
        let classification = Classification::new(&definition.targets, &existing);
        info!(
            "Platform {}: {} missing, {} present, {} unreferenced",
            definition.platform_name,
            classification.missing.len(),
            classification.present.len(),
            classification.unreferenced.len()
        );

        match action {
            Action::Status => Self::status(&classification, &existing, report),
            Action::CreateMissing => {
                for name in &classification.missing {
                    self.check_cancelled()?;
                    let Some(target) = definition.targets.get_mut(name) else { continue };
                    if let Err(e) = self.create_machine(target, report).await {
                        if !self.record_failure(report, name, "create", e)? {
                            break;
                        }
                    }
                }
            }
            Action::Synchronize => {
                for name in &classification.present {
                    self.check_cancelled()?;
                    let (Some(target), Some(current)) = (definition.targets.get_mut(name), existing.get_mut(name))
                    else {
                        continue;
                    };
                    if let Err(e) = self.synchronize_machine(current, target, report).await {
                        if !self.record_failure(report, name, "synchronize", e)? {
                            break;
                        }
                    }
                }
            }
            Action::DeleteUnreferenced | Action::DeleteAll => {
                let names = if action == Action::DeleteAll {
                    &classification.present
                } else {
                    &classification.unreferenced
                };
                for name in names {
                    self.check_cancelled()?;
                    let Some(current) = existing.get(name) else { continue };
                    if let Err(e) = self.destroy_machine(current, report).await {
                        if !self.record_failure(report, name, "destroy", e)? {
                            break;
                        }
                    }
                }
            }
            Action::ParseOnly => {}
        }

        debug!(
            "Platform {} reconciled in {} ms",
            report.platform_name,
            (chrono::Utc::now() - report.started_at).num_milliseconds()
        );
        Ok(())
    }

    fn status(classification: &Classification, existing: &BTreeMap<String, MachineSpec>, report: &mut Report) {
        for name in &classification.missing {
            report.push(name.clone(), Outcome::Missing);
        }
        for (names, unreferenced) in [(&classification.present, false), (&classification.unreferenced, true)] {
            for name in names {
                let Some(id) = existing.get(name).and_then(|machine| machine.id) else {
                    warn!("Machine {} was listed without an ID", name);
                    continue;
                };
                let outcome = if unreferenced {
                    Outcome::Unreferenced { id }
                } else {
                    Outcome::Present { id }
                };
                report.push(name.clone(), outcome);
            }
        }
    }

    /// Stop before the next queued operation once the run is cancelled
    pub(crate) fn check_cancelled(&self) -> Result<(), ControllerError> {
        if self.cancel.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }
        Ok(())
    }

    /// Record a per-machine failure; returns whether the batch goes on.
    fn record_failure(
        &self,
        report: &mut Report,
        name: &str,
        operation: &'static str,
        error: ControllerError,
    ) -> Result<bool, ControllerError> {
        if error.is_fatal() {
            return Err(error);
        }
        error!("{}: {} failed: {}", name, operation, error);
        report.failures.push(Failure {
            name: name.to_string(),
            operation,
            message: error.to_string(),
        });
        match self.config.failure_policy {
            FailurePolicy::Continue => Ok(true),
            FailurePolicy::Abort => {
                warn!("Stopping platform {} after a failure", report.platform_name);
                report.aborted = true;
                Ok(false)
            }
        }
    }
}
