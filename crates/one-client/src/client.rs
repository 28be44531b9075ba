//! OpenNebula CLI client
//!
//! Implements the control plane gateway on top of the `onevm`, `onetemplate`
//! and `oneuser` commands.

use crate::command::{CommandFailure, CommandRunner, ENV_ONE_XMLRPC};
use crate::error::OneError;
use crate::models::{decode, ResizeRequest, UserInfo, UserResponse, VmPoolResponse};
use crate::one_trait::OneClientTrait;
use platform_def::{MachineId, MachineSpec, Permissions};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Commands that must be installed for any gateway call
pub const REQUIRED_COMMANDS: [&str; 3] = ["oneuser", "onevm", "onetemplate"];

/// Default per-command timeout
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection settings for the OpenNebula CLI
#[derive(Debug, Clone)]
pub struct OneClientConfig {
    /// XML-RPC endpoint, e.g. "http://one:2633/RPC2"
    pub endpoint: Option<String>,
    /// Upper bound for each command
    pub command_timeout: Duration,
    /// Directory of the `one*` tools, e.g. "$ONE_LOCATION/bin"; `PATH` when unset
    pub tools_dir: Option<PathBuf>,
}

impl Default for OneClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            tools_dir: None,
        }
    }
}

/// OpenNebula gateway backed by the `one*` command-line tools
#[derive(Debug)]
pub struct OneClient {
    runner: CommandRunner,
    endpoint: Option<String>,
    /// Set by `verify`; used to drop owner qualifiers on the user's own resources
    user: OnceLock<UserInfo>,
}

impl OneClient {
    /// Create a new client
    pub fn new(config: OneClientConfig) -> Self {
        Self {
            runner: CommandRunner::new(config.endpoint.clone(), config.command_timeout)
                .with_tools_dir(config.tools_dir),
            endpoint: config.endpoint,
            user: OnceLock::new(),
        }
    }

    fn operation_error(failure: CommandFailure) -> OneError {
        match failure {
            CommandFailure::Timeout { command, seconds } => OneError::Timeout { command, seconds },
            other => OneError::Operation(other.to_string()),
        }
    }

    fn unavailable_error(failure: CommandFailure) -> OneError {
        match failure {
            CommandFailure::Timeout { command, seconds } => OneError::Timeout { command, seconds },
            other => OneError::Unavailable(other.to_string()),
        }
    }

    async fn onevm(&self, args: Vec<String>) -> Result<String, OneError> {
        self.runner.run("onevm", &args, None).await.map_err(Self::operation_error)
    }

    /// Disk argument: `image` or `image:size=MB`
    fn disk_arg(spec: &MachineSpec) -> Result<Option<String>, OneError> {
        let Some(disks) = spec.disks.as_ref().filter(|disks| !disks.is_empty()) else {
            return Ok(None);
        };
        let mut parts = Vec::with_capacity(disks.len());
        for disk in disks {
            let image = disk.image.as_deref().ok_or_else(|| {
                OneError::InvalidRequest(format!("a disk of {} is not based on an image", spec.name))
            })?;
            parts.push(match disk.size_mb {
                Some(size) => format!("{}:size={}", image, size),
                None => image.to_string(),
            });
        }
        Ok(Some(parts.join(",")))
    }

    /// Arguments shared by `onevm create` and `onetemplate instantiate`
    pub fn create_args(spec: &MachineSpec) -> Result<Vec<String>, OneError> {
        let cpu = spec.cpu_share.ok_or_else(|| {
            OneError::InvalidRequest(format!("{} has no cpu_percent", spec.name))
        })?;
        let memory = spec.memory_mb.ok_or_else(|| {
            OneError::InvalidRequest(format!("{} has no mem_mb", spec.name))
        })?;

        let mut args = vec![
            "--name".to_string(),
            spec.name.clone(),
            // hold so that a template booting over PXE does not start early
            "--hold".to_string(),
            "--cpu".to_string(),
            cpu.to_string(),
            "--vcpu".to_string(),
            spec.vcpu_count.to_string(),
            "--memory".to_string(),
            format!("{}m", memory),
        ];
        if !spec.networks.is_empty() {
            args.push("--nic".to_string());
            args.push(spec.networks.join(","));
        }
        if let Some(disks) = Self::disk_arg(spec)? {
            args.push("--disk".to_string());
            args.push(disks);
        }
        Ok(args)
    }

    /// Arguments of `onevm resize`, or `None` when nothing changes
    pub fn resize_args(id: MachineId, request: &ResizeRequest) -> Option<Vec<String>> {
        if request.is_empty() {
            return None;
        }
        let mut args = vec!["resize".to_string()];
        if let Some(cpu) = request.cpu_share {
            args.push("--cpu".to_string());
            args.push(cpu.to_string());
        }
        if let Some(vcpu) = request.vcpu_count {
            args.push("--vcpu".to_string());
            args.push(vcpu.to_string());
        }
        if let Some(memory) = request.memory_mb {
            args.push("--memory".to_string());
            args.push(memory.to_string());
        }
        args.push(id.to_string());
        Some(args)
    }

    async fn find_created(&self, name: &str) -> Result<MachineId, OneError> {
        let inventory = self.list_inventory().await.map_err(|e| OneError::CreationConfirmation {
            name: name.to_string(),
            reason: format!("listing after creation failed: {}", e),
        })?;
        inventory
            .iter()
            .filter(|machine| machine.name == name)
            .filter_map(|machine| machine.id)
            .max()
            .ok_or_else(|| OneError::CreationConfirmation {
                name: name.to_string(),
                reason: "machine not found in the inventory after creation".to_string(),
            })
    }
}

#[async_trait::async_trait]
impl OneClientTrait for OneClient {
    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn verify(&self) -> Result<UserInfo, OneError> {
        let Some(endpoint) = self.endpoint.as_deref().filter(|e| !e.trim().is_empty()) else {
            return Err(OneError::Precondition(format!(
                "Undefined environment variable {0}, define it with : export {0}=\"http://your_opennebula_host:2633/RPC2\"",
                ENV_ONE_XMLRPC
            )));
        };
        info!("Using {}={} to communicate with OpenNebula", ENV_ONE_XMLRPC, endpoint);
        debug!("Each command times out after {}s", self.runner.timeout().as_secs());

        for command in REQUIRED_COMMANDS {
            self.runner.probe(command).await.map_err(|failure| {
                OneError::Precondition(format!("required command '{}' is not usable: {}", command, failure))
            })?;
            debug!("Command '{}' found", command);
        }

        let output = self
            .runner
            .run("oneuser", &["show".to_string(), "--json".to_string()], None)
            .await
            .map_err(|failure| {
                OneError::Unavailable(format!(
                    "{}; try to log in using `oneuser login your_user_name --force` first",
                    failure
                ))
            })?;
        let user = decode::<UserResponse>(&output)?.user;
        info!("User has a valid authorization token (uid={} gid={})", user.uid, user.gid);
        // a second verify keeps the first identity
        let _ = self.user.set(user.clone());
        Ok(user)
    }

    async fn list_inventory(&self) -> Result<Vec<MachineSpec>, OneError> {
        let output = self
            .runner
            .run("onevm", &["list".to_string(), "--json".to_string()], None)
            .await
            .map_err(Self::unavailable_error)?;
        let records = decode::<VmPoolResponse>(&output)?.into_records();
        let current_user = self.user.get().map(|user| user.name.as_str());
        let machines: Vec<MachineSpec> = records
            .into_iter()
            .map(|record| record.into_machine(current_user))
            .collect();
        debug!("Listed {} machines", machines.len());
        Ok(machines)
    }

    async fn create(&self, spec: &MachineSpec) -> Result<MachineId, OneError> {
        debug!("Creating vm: {:?}", spec);
        let args = Self::create_args(spec)?;
        let created = match &spec.template_ref {
            None => {
                let mut full = vec!["create".to_string()];
                full.extend(args);
                self.runner.run("onevm", &full, None).await
            }
            Some(template) => {
                warn!(
                    "Creation of VM {} from a template might require a prompt. In that case, the default entry is chosen (ie 'enter' is simulated)",
                    spec.name
                );
                let mut full = vec!["instantiate".to_string()];
                full.extend(args);
                full.push(template.clone());
                self.runner.run("onetemplate", &full, Some(b"\n")).await
            }
        };

        match created {
            Ok(_) => self.find_created(&spec.name).await,
            // the command was killed mid-flight, the machine may or may not exist
            Err(CommandFailure::Timeout { command, seconds }) => {
                warn!("`{}` timed out after {}s, looking for {} in the inventory", command, seconds, spec.name);
                self.find_created(&spec.name).await.map_err(|e| OneError::CreationConfirmation {
                    name: spec.name.clone(),
                    reason: format!("`{}` timed out after {}s and the machine may exist ({})", command, seconds, e),
                })
            }
            Err(failure) => Err(Self::operation_error(failure)),
        }
    }

    async fn destroy(&self, id: MachineId) -> Result<(), OneError> {
        debug!("Destroying vm {}", id);
        self.onevm(vec!["terminate".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn resize(&self, id: MachineId, request: &ResizeRequest) -> Result<(), OneError> {
        let Some(args) = Self::resize_args(id, request) else {
            info!("No difference in vcpu/cpu/mem detected, not resizing VM {}", id);
            return Ok(());
        };
        debug!("Resizing vm {} with {:?}", id, request);
        self.onevm(args).await?;
        info!("Resizing VM {} done", id);
        Ok(())
    }

    async fn set_group(&self, id: MachineId, group: &str) -> Result<(), OneError> {
        debug!("Setting group {} for vm {}", group, id);
        self.onevm(vec!["chgrp".to_string(), id.to_string(), group.to_string()]).await?;
        Ok(())
    }

    async fn set_permissions(&self, id: MachineId, permissions: Permissions) -> Result<(), OneError> {
        debug!("Setting permissions {} for vm {}", permissions, id);
        self.onevm(vec!["chmod".to_string(), id.to_string(), permissions.to_string()]).await?;
        Ok(())
    }
}
