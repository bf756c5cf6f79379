//! Result of a deployment run.

use std::fmt;

use super::{DeployState, ErrorKind};
use crate::provider::InstanceId;
use crate::report::RunReport;

/// Why a run aborted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Failure {
    /// Coarse category.
    pub kind: ErrorKind,
    /// Human readable cause, including the source chain.
    pub message: String,
}

/// What a deployment run did, successful or not.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentOutcome {
    /// `true` when the run reached [`DeployState::Done`].
    pub success: bool,
    /// Identifier of the instance created by this run.
    pub new_instance_id: Option<InstanceId>,
    /// Name of the instance created by this run.
    pub new_instance_name: Option<String>,
    /// Identifier of the previous instance, set once it has been destroyed.
    pub replaced_instance_id: Option<InstanceId>,
    /// Every state entered, in order.
    pub states: Vec<DeployState>,
    /// Abort reason for failed runs.
    pub failure: Option<Failure>,
    /// Diagnostics accumulated during the run.
    pub report: RunReport,
}

impl DeploymentOutcome {
    /// Last state entered.
    #[must_use]
    pub fn final_state(&self) -> Option<DeployState> {
        self.states.last().copied()
    }

    /// Process exit code: `0` for a clean success, `1` otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.success || self.report.has_errors())
    }
}

impl fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.success { "succeeded" } else { "failed" };
        writeln!(f, "deployment {verdict}")?;
        if let Some(name) = &self.new_instance_name {
            let id = self
                .new_instance_id
                .as_ref()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);
            writeln!(f, "new instance: {name} ({id})")?;
        }
        if let Some(replaced) = &self.replaced_instance_id {
            writeln!(f, "replaced instance: {replaced}")?;
        }
        let path: Vec<String> = self.states.iter().map(ToString::to_string).collect();
        writeln!(f, "states: {}", path.join(" -> "))?;
        if let Some(failure) = &self.failure {
            writeln!(f, "error: {}: {}", failure.kind, failure.message)?;
        }
        for entry in self.report.entries() {
            writeln!(f, "{entry}")?;
        }
        write!(f, "{}", self.report.status())
    }
}
