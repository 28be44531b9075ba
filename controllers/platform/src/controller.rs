//! Main controller implementation.
//!
//! Processes definition documents one after the other: load, resolve, fetch
//! the inventory, reconcile and print the report.

use crate::config::{Action, EngineConfig};
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::report::Report;
use one_client::OneClientTrait;
use platform_def::load_and_resolve;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Drives one run over a list of definition files.
pub struct Controller {
    reconciler: Reconciler,
    verified: AtomicBool,
    output: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("reconciler", &self.reconciler)
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Controller printing its reports on stdout
    pub fn new(client: Box<dyn OneClientTrait>, config: EngineConfig, cancel: CancellationToken) -> Self {
        Self {
            reconciler: Reconciler::new(client, config, cancel),
            verified: AtomicBool::new(false),
            output: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    /// Print reports to `output` instead of stdout
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = Mutex::new(output);
        self
    }

    /// Process every file in order.
    ///
    /// Stops at the first fatal error. Per-machine failures are left in the
    /// returned reports.
    pub async fn run(&self, action: Action, files: &[PathBuf]) -> Result<Vec<Report>, ControllerError> {
        let mut reports = Vec::with_capacity(files.len());
        for file in files {
            let report = self.process_document(action, file).await.inspect_err(|e| {
                error!("Failed to process {}: {}", file.display(), e);
            })?;
            reports.push(report);
        }
        Ok(reports)
    }

    /// Reconcile one document and print its report.
    ///
    /// When reconciliation stops on a fatal error or cancellation, the
    /// outcomes reached so far are printed before the error is returned.
    pub async fn process_document(&self, action: Action, file: &Path) -> Result<Report, ControllerError> {
        self.reconciler.check_cancelled()?;
        let mut definition = load_and_resolve(file)?;
        info!(
            "Platform {} defines {} machines",
            definition.platform_name,
            definition.targets.len()
        );

        let inventory = if action.uses_gateway() {
            self.ensure_verified().await?;
            self.reconciler.client().list_inventory().await?
        } else {
            Vec::new()
        };

        let mut report = Report::new(definition.platform_name.clone());
        let result = self
            .reconciler
            .reconcile(action, &mut definition, inventory, &mut report)
            .await;
        self.emit(&report);
        if report.has_failures() {
            warn!(
                "Platform {}: {} machine operation(s) failed",
                report.platform_name,
                report.failures.len()
            );
        }
        result.map(|()| report)
    }

    fn emit(&self, report: &Report) {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = write!(output, "{}", report).and_then(|()| output.flush()) {
            warn!("Failed to print the report of platform {}: {}", report.platform_name, e);
        }
    }

    /// Check the gateway once per run, before its first use
    async fn ensure_verified(&self) -> Result<(), ControllerError> {
        if self.verified.load(Ordering::Acquire) {
            return Ok(());
        }
        let user = self.reconciler.client().verify().await?;
        info!("Connected to OpenNebula as {}", user.name);
        self.verified.store(true, Ordering::Release);
        Ok(())
    }
}
