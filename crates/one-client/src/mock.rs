//! Mock OneClient for unit testing
//!
//! This module provides an in-memory implementation of `OneClientTrait` that
//! records every call, so tests can assert which control-plane operations a
//! reconciliation issued without a running OpenNebula.

use crate::error::OneError;
use crate::models::{ResizeRequest, UserInfo};
use crate::one_trait::OneClientTrait;
use platform_def::{MachineId, MachineSpec, Permissions, PowerState};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A call received by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Verify,
    ListInventory,
    Create { name: String },
    Destroy { id: MachineId },
    Resize { id: MachineId, request: ResizeRequest },
    SetGroup { id: MachineId, group: String },
    SetPermissions { id: MachineId, permissions: Permissions },
}

impl GatewayCall {
    /// Whether the call changes control-plane state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, GatewayCall::Verify | GatewayCall::ListInventory)
    }
}

/// Operation selector for injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Create,
    Destroy,
    Resize,
    SetGroup,
    SetPermissions,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock control plane for testing
///
/// Machines live in memory keyed by id. Failures can be injected per
/// operation and machine name.
#[derive(Debug, Clone)]
pub struct MockOneClient {
    endpoint: Option<String>,
    machines: Arc<Mutex<BTreeMap<MachineId, MachineSpec>>>,
    calls: Arc<Mutex<Vec<GatewayCall>>>,
    failures: Arc<Mutex<HashSet<(MockOperation, String)>>>,
    unavailable: Arc<Mutex<bool>>,
    unconfirmed_creations: Arc<Mutex<HashSet<String>>>,
    // Counter for generating IDs
    next_id: Arc<Mutex<u64>>,
}

impl Default for MockOneClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOneClient {
    /// Create a new, empty mock
    pub fn new() -> Self {
        Self {
            endpoint: Some("http://mock-one:2633/RPC2".to_string()),
            machines: Arc::new(Mutex::new(BTreeMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashSet::new())),
            unavailable: Arc::new(Mutex::new(false)),
            unconfirmed_creations: Arc::new(Mutex::new(HashSet::new())),
            next_id: Arc::new(Mutex::new(100)),
        }
    }

    /// Add an existing machine (for test setup); assigns an id when it has none
    pub fn add_machine(&self, mut machine: MachineSpec) -> MachineId {
        let id = machine.id.unwrap_or_else(|| self.next_id());
        machine.id = Some(id);
        if machine.disks.is_none() {
            machine.disks = Some(Vec::new());
        }
        lock(&self.machines).insert(id, machine);
        id
    }

    /// Make `operation` fail for the machine with this name
    pub fn fail_on(&self, operation: MockOperation, name: impl Into<String>) {
        lock(&self.failures).insert((operation, name.into()));
    }

    /// Make `verify` and `list_inventory` fail as if the endpoint were down
    pub fn set_unavailable(&self, unavailable: bool) {
        *lock(&self.unavailable) = unavailable;
    }

    /// Let `create` of this machine succeed on the control plane but not
    /// report an id
    pub fn set_unconfirmed_creation(&self, name: impl Into<String>) {
        lock(&self.unconfirmed_creations).insert(name.into());
    }

    /// Snapshot of stored machines
    pub fn machines(&self) -> Vec<MachineSpec> {
        lock(&self.machines).values().cloned().collect()
    }

    pub fn machine(&self, id: MachineId) -> Option<MachineSpec> {
        lock(&self.machines).get(&id).cloned()
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    /// Only the calls that change control-plane state
    pub fn mutations(&self) -> Vec<GatewayCall> {
        self.calls().into_iter().filter(GatewayCall::is_mutation).collect()
    }

    fn next_id(&self) -> MachineId {
        let mut id = lock(&self.next_id);
        let current = *id;
        *id += 1;
        MachineId(current)
    }

    fn record(&self, call: GatewayCall) {
        lock(&self.calls).push(call);
    }

    fn name_of(&self, id: MachineId) -> Result<String, OneError> {
        lock(&self.machines)
            .get(&id)
            .map(|machine| machine.name.clone())
            .ok_or_else(|| OneError::Operation(format!("VM {} does not exist", id)))
    }

    fn check_failure(&self, operation: MockOperation, name: &str) -> Result<(), OneError> {
        if lock(&self.failures).contains(&(operation, name.to_string())) {
            return Err(OneError::Operation(format!("injected {:?} failure for {}", operation, name)));
        }
        Ok(())
    }

    fn update<F: FnOnce(&mut MachineSpec)>(&self, id: MachineId, apply: F) -> Result<(), OneError> {
        let mut machines = lock(&self.machines);
        let machine = machines
            .get_mut(&id)
            .ok_or_else(|| OneError::Operation(format!("VM {} does not exist", id)))?;
        apply(machine);
        Ok(())
    }
}

#[async_trait::async_trait]
impl OneClientTrait for MockOneClient {
    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn verify(&self) -> Result<UserInfo, OneError> {
        self.record(GatewayCall::Verify);
        if *lock(&self.unavailable) {
            return Err(OneError::Unavailable("mock control plane is down".to_string()));
        }
        Ok(UserInfo { uid: 0, gid: 0, name: "oneadmin".to_string() })
    }

    async fn list_inventory(&self) -> Result<Vec<MachineSpec>, OneError> {
        self.record(GatewayCall::ListInventory);
        if *lock(&self.unavailable) {
            return Err(OneError::Unavailable("mock control plane is down".to_string()));
        }
        Ok(self.machines())
    }

    async fn create(&self, spec: &MachineSpec) -> Result<MachineId, OneError> {
        self.record(GatewayCall::Create { name: spec.name.clone() });
        self.check_failure(MockOperation::Create, &spec.name)?;
        if spec.cpu_share.is_none() || spec.memory_mb.is_none() {
            return Err(OneError::InvalidRequest(format!("{} is missing cpu or memory", spec.name)));
        }

        let mut machine = spec.clone();
        machine.template_ref = None;
        machine.group = None;
        machine.permissions = None;
        // created on hold
        machine.power_state = Some(PowerState::Hold);
        let id = self.add_machine(MachineSpec { id: None, ..machine });

        if lock(&self.unconfirmed_creations).contains(&spec.name) {
            return Err(OneError::CreationConfirmation {
                name: spec.name.clone(),
                reason: "machine not found in the inventory after creation".to_string(),
            });
        }
        Ok(id)
    }

    async fn destroy(&self, id: MachineId) -> Result<(), OneError> {
        self.record(GatewayCall::Destroy { id });
        let name = self.name_of(id)?;
        self.check_failure(MockOperation::Destroy, &name)?;
        lock(&self.machines).remove(&id);
        Ok(())
    }

    async fn resize(&self, id: MachineId, request: &ResizeRequest) -> Result<(), OneError> {
        self.record(GatewayCall::Resize { id, request: request.clone() });
        let name = self.name_of(id)?;
        self.check_failure(MockOperation::Resize, &name)?;
        self.update(id, |machine| {
            if let Some(cpu) = request.cpu_share {
                machine.cpu_share = Some(cpu);
            }
            if let Some(vcpu) = request.vcpu_count {
                machine.vcpu_count = vcpu;
            }
            if let Some(memory) = request.memory_mb {
                machine.memory_mb = Some(memory);
            }
        })
    }

    async fn set_group(&self, id: MachineId, group: &str) -> Result<(), OneError> {
        self.record(GatewayCall::SetGroup { id, group: group.to_string() });
        let name = self.name_of(id)?;
        self.check_failure(MockOperation::SetGroup, &name)?;
        self.update(id, |machine| machine.group = Some(group.to_string()))
    }

    async fn set_permissions(&self, id: MachineId, permissions: Permissions) -> Result<(), OneError> {
        self.record(GatewayCall::SetPermissions { id, permissions });
        let name = self.name_of(id)?;
        self.check_failure(MockOperation::SetPermissions, &name)?;
        self.update(id, |machine| machine.permissions = Some(permissions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_ids_and_records_calls() {
        let mock = MockOneClient::new();
        let mut spec = MachineSpec::new("lab-a");
        spec.cpu_share = Some(0.1);
        spec.memory_mb = Some(128);

        let id = mock.create(&spec).await.unwrap();
        let stored = mock.machine(id).unwrap();
        assert_eq!(stored.power_state, Some(PowerState::Hold));
        assert_eq!(mock.calls(), vec![GatewayCall::Create { name: "lab-a".to_string() }]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mock = MockOneClient::new();
        let id = mock.add_machine(MachineSpec::new("lab-a"));
        mock.fail_on(MockOperation::Destroy, "lab-a");
        assert!(matches!(mock.destroy(id).await, Err(OneError::Operation(_))));
        assert!(mock.machine(id).is_some());
    }
}
