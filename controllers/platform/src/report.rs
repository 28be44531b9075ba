//! Per-run report
//!
//! Collects one entry per processed machine plus the warnings and failures
//! of the run, and renders them in the line format printed on stdout.

use crate::reconciler::diff::Difference;
use chrono::{DateTime, Utc};
use platform_def::{MachineId, MachineSpec};
use std::fmt;

/// What happened to one machine
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Missing,
    Present { id: MachineId },
    Unreferenced { id: MachineId },
    Created { id: MachineId },
    Changed { id: MachineId, applied: Difference },
    Destroyed { id: MachineId },
    /// Resolved target, printed by `parse-only`
    Resolved(Box<MachineSpec>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub name: String,
    pub outcome: Outcome,
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Missing => write!(f, "{}: missing", self.name),
            Outcome::Present { id } => write!(f, "{}: present ID {}", self.name, id),
            Outcome::Unreferenced { id } => write!(f, "{}: unreferenced ID {}", self.name, id),
            Outcome::Created { id } => write!(f, "{}: created ID {}", self.name, id),
            Outcome::Changed { id, applied } => {
                write!(f, "{}: ID {}, changing {}", self.name, id, applied)
            }
            Outcome::Destroyed { id } => write!(f, "{}: destroyed ID {}", self.name, id),
            Outcome::Resolved(spec) => write!(f, "{}", spec),
        }
    }
}

/// A machine operation that did not complete
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub name: String,
    pub operation: &'static str,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} failed: {}", self.name, self.operation, self.message)
    }
}

/// Result of reconciling one definition document
#[derive(Debug, Clone)]
pub struct Report {
    pub platform_name: String,
    pub started_at: DateTime<Utc>,
    pub entries: Vec<ReportEntry>,
    pub warnings: Vec<String>,
    pub failures: Vec<Failure>,
    /// Set when the failure policy stopped the batch early
    pub aborted: bool,
}

impl Report {
    pub fn new(platform_name: impl Into<String>) -> Self {
        Self {
            platform_name: platform_name.into(),
            started_at: Utc::now(),
            entries: Vec::new(),
            warnings: Vec::new(),
            failures: Vec::new(),
            aborted: false,
        }
    }

    pub fn push(&mut self, name: impl Into<String>, outcome: Outcome) {
        self.entries.push(ReportEntry { name: name.into(), outcome });
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Outcome recorded for a machine, if any
    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.outcome)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        for warning in &self.warnings {
            writeln!(f, "WARNING {}", warning)?;
        }
        for failure in &self.failures {
            writeln!(f, "ERROR {}", failure)?;
        }
        if self.aborted {
            writeln!(
                f,
                "WARNING platform {}: remaining machines were skipped after a failure",
                self.platform_name
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::diff::diff;

    #[test]
    fn test_entry_lines() {
        let mut report = Report::new("lab");
        report.push("lab-a", Outcome::Missing);
        report.push("lab-b", Outcome::Present { id: MachineId(12) });
        report.push("lab-d", Outcome::Unreferenced { id: MachineId(14) });
        report.push("lab-e", Outcome::Destroyed { id: MachineId(15) });
        assert_eq!(
            report.to_string(),
            "lab-a: missing\nlab-b: present ID 12\nlab-d: unreferenced ID 14\nlab-e: destroyed ID 15\n"
        );
    }

    #[test]
    fn test_changed_line_lists_every_change() {
        let mut current = MachineSpec::new("lab-a");
        current.vcpu_count = 1;
        current.memory_mb = Some(256);
        let mut target = current.clone();
        target.vcpu_count = 2;
        target.memory_mb = Some(512);

        let entry = ReportEntry {
            name: "lab-a".to_string(),
            outcome: Outcome::Changed { id: MachineId(3), applied: diff(&current, &target).unwrap() },
        };
        assert_eq!(
            entry.to_string(),
            "lab-a: ID 3, changing vcpu_count from 1 to 2, mem_mb from 256 to 512"
        );
    }

    #[test]
    fn test_failures_are_rendered_last() {
        let mut report = Report::new("lab");
        report.failures.push(Failure {
            name: "lab-a".to_string(),
            operation: "create",
            message: "boom".to_string(),
        });
        report.push("lab-b", Outcome::Created { id: MachineId(1) });
        assert!(report.has_failures());
        assert_eq!(report.to_string(), "lab-b: created ID 1\nERROR lab-a: create failed: boom\n");
    }

    #[test]
    fn test_aborted_report_says_machines_were_skipped() {
        let mut report = Report::new("lab");
        report.push("lab-a", Outcome::Created { id: MachineId(7) });
        report.failures.push(Failure {
            name: "lab-b".to_string(),
            operation: "create",
            message: "quota exceeded".to_string(),
        });
        report.aborted = true;
        assert_eq!(
            report.to_string(),
            "lab-a: created ID 7\n\
             ERROR lab-b: create failed: quota exceeded\n\
             WARNING platform lab: remaining machines were skipped after a failure\n"
        );
    }
}
