//! Deployment states and the transitions allowed between them.

use std::fmt;

/// A step of the blue-green deployment.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DeployState {
    /// Looking for the instance currently serving the stack.
    Discover,
    /// Resolving the snapshot and creating the new instance.
    Provision,
    /// Waiting for the new instance's boot action.
    AwaitBoot,
    /// Waiting for the application inside the new instance.
    AwaitAppHealthy,
    /// Moving the floating IP.
    Cutover,
    /// Draining, archiving and destroying the previous instance.
    RetireOld,
    /// The deployment finished.
    Done,
    /// The deployment stopped early.
    Aborted,
}

impl DeployState {
    /// Returns `true` for [`DeployState::Done`] and [`DeployState::Aborted`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Whether the orchestrator may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Discover, Self::Provision)
            | (Self::Provision, Self::AwaitBoot)
            | (Self::AwaitBoot, Self::AwaitAppHealthy)
            | (Self::AwaitAppHealthy, Self::Cutover)
            | (Self::Cutover, Self::RetireOld | Self::Done)
            | (Self::RetireOld, Self::Done) => true,
            (current, Self::Aborted) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Discover => "DISCOVER",
            Self::Provision => "PROVISION",
            Self::AwaitBoot => "AWAIT_BOOT",
            Self::AwaitAppHealthy => "AWAIT_APP_HEALTHY",
            Self::Cutover => "CUTOVER",
            Self::RetireOld => "RETIRE_OLD",
            Self::Done => "DONE",
            Self::Aborted => "ABORTED",
        };
        f.write_str(label)
    }
}
