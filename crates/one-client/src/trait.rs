//! OneClient trait for mocking
//!
//! This trait abstracts the control plane so the reconciliation engine can be
//! exercised against an in-memory implementation in tests.

use crate::error::OneError;
use crate::models::{ResizeRequest, UserInfo};
use platform_def::{MachineId, MachineSpec, Permissions};

/// Lifecycle operations offered by the control plane.
///
/// Every mutating call either succeeds or fails as a whole; there is no
/// rollback of a call that already reached the control plane.
#[async_trait::async_trait]
pub trait OneClientTrait: Send + Sync {
    /// Endpoint this client talks to, if configured
    fn endpoint(&self) -> Option<&str>;

    /// Check configuration, tooling and session before any other call
    async fn verify(&self) -> Result<UserInfo, OneError>;

    /// Every machine visible to the authenticated user, with id and power state
    async fn list_inventory(&self) -> Result<Vec<MachineSpec>, OneError>;

    /// Create a machine from a fully resolved spec and return its id
    async fn create(&self, spec: &MachineSpec) -> Result<MachineId, OneError>;

    async fn destroy(&self, id: MachineId) -> Result<(), OneError>;

    /// Change the compute envelope of an existing machine
    async fn resize(&self, id: MachineId, request: &ResizeRequest) -> Result<(), OneError>;

    async fn set_group(&self, id: MachineId, group: &str) -> Result<(), OneError>;

    async fn set_permissions(&self, id: MachineId, permissions: Permissions) -> Result<(), OneError>;
}
