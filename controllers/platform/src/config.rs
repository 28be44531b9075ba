//! Command line and environment configuration.

use clap::{Parser, ValueEnum};
use one_client::OneClientConfig;
use platform_def::PowerState;
use std::path::PathBuf;
use std::time::Duration;

/// Manage OpenNebula virtual machines from platform definition files
#[derive(Debug, Parser)]
#[command(name = "one-pf-manage", version, about)]
pub struct Args {
    /// Log verbosity; RUST_LOG takes precedence when set
    #[arg(short = 'l', long, value_enum, default_value_t = LogLevel::Warning)]
    pub log_level: LogLevel,

    /// OpenNebula XML-RPC endpoint
    #[arg(long, env = "ONE_XMLRPC", hide_env_values = true)]
    pub endpoint: Option<String>,

    /// Timeout in seconds for each OpenNebula command
    #[arg(long, env = "ONE_PF_COMMAND_TIMEOUT", default_value_t = 120)]
    pub command_timeout: u64,

    /// Directory of the OpenNebula tools (onevm, onetemplate, oneuser);
    /// they are looked up in PATH when unset
    #[arg(long, env = "ONE_PF_TOOLS_DIR")]
    pub tools_dir: Option<PathBuf>,

    /// Power states in which a machine may be resized (names or numeric codes)
    #[arg(
        long,
        env = "ONE_PF_RESIZABLE_STATES",
        value_delimiter = ',',
        default_value = "hold,stopped,suspended,poweroff,undeployed"
    )]
    pub resizable_states: Vec<PowerState>,

    /// What to do with the remaining machines after one of them fails
    #[arg(long, value_enum, default_value_t = FailurePolicy::Continue)]
    pub failure_policy: FailurePolicy,

    /// Action to perform
    #[arg(value_enum)]
    pub action: Action,

    /// Platform definition files (JSON, or YAML with a .yaml/.yml extension)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl Args {
    pub fn client_config(&self) -> OneClientConfig {
        OneClientConfig {
            endpoint: self.endpoint.clone(),
            command_timeout: Duration::from_secs(self.command_timeout),
            tools_dir: self.tools_dir.clone(),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            resizable_states: self.resizable_states.clone(),
            failure_policy: self.failure_policy,
        }
    }
}

/// Reconciliation mode, one per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Report missing, present and unreferenced machines
    Status,
    /// Create the machines that do not exist yet
    CreateMissing,
    /// Bring existing machines in line with their definition
    Synchronize,
    /// Destroy machines of the platform that are no longer defined
    DeleteUnreferenced,
    /// Destroy every defined machine that exists
    DeleteAll,
    /// Print the resolved definition without contacting OpenNebula
    ParseOnly,
}

impl Action {
    /// Whether the action needs the control plane at all
    pub fn uses_gateway(self) -> bool {
        self != Action::ParseOnly
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            // tracing has no level above error
            LogLevel::Critical | LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Batch behavior after a per-machine failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    /// Report the failure and go on with the next machine
    #[default]
    Continue,
    /// Stop processing the remaining machines
    Abort,
}

/// Settings of the convergence engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub resizable_states: Vec<PowerState>,
    pub failure_policy: FailurePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resizable_states: PowerState::DEFAULT_RESIZABLE.to_vec(),
            failure_policy: FailurePolicy::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["one-pf-manage", "status", "lab.json"]).unwrap();
        assert_eq!(args.action, Action::Status);
        assert_eq!(args.log_level, LogLevel::Warning);
        assert_eq!(args.failure_policy, FailurePolicy::Continue);
        assert_eq!(args.files, vec![PathBuf::from("lab.json")]);
        // unless ONE_PF_RESIZABLE_STATES is set in the test environment
        if std::env::var_os("ONE_PF_RESIZABLE_STATES").is_none() {
            assert_eq!(args.resizable_states, PowerState::DEFAULT_RESIZABLE.to_vec());
        }
    }

    #[test]
    fn test_action_names() {
        let args = Args::try_parse_from([
            "one-pf-manage",
            "-l",
            "debug",
            "delete-unreferenced",
            "a.json",
            "b.yaml",
        ])
        .unwrap();
        assert_eq!(args.action, Action::DeleteUnreferenced);
        assert_eq!(args.log_level, LogLevel::Debug);
        assert_eq!(args.files.len(), 2);
    }

    #[test]
    fn test_resizable_states_accept_names_and_codes() {
        let args = Args::try_parse_from([
            "one-pf-manage",
            "--resizable-states",
            "poweroff,2",
            "synchronize",
            "lab.json",
        ])
        .unwrap();
        assert_eq!(args.resizable_states, vec![PowerState::Poweroff, PowerState::Hold]);
    }

    #[test]
    fn test_tools_dir_reaches_the_client() {
        let args = Args::try_parse_from([
            "one-pf-manage",
            "--tools-dir",
            "/opt/one/bin",
            "--command-timeout",
            "30",
            "status",
            "lab.json",
        ])
        .unwrap();
        let config = args.client_config();
        assert_eq!(config.tools_dir, Some(PathBuf::from("/opt/one/bin")));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(Args::try_parse_from(["one-pf-manage", "explode", "lab.json"]).is_err());
    }

    #[test]
    fn test_files_are_required() {
        assert!(Args::try_parse_from(["one-pf-manage", "status"]).is_err());
    }

    #[test]
    fn test_action_properties() {
        assert!(!Action::ParseOnly.uses_gateway());
        assert!(Action::Status.uses_gateway());
    }
}
