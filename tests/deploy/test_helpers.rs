//! Shared fixtures for deploy BDD scenarios.

use rstest::fixture;
use stackswap::deploy::{DeploymentOutcome, DeploymentPlan, PlanError};
use stackswap::test_support::{FakeArchive, FakeProbe, FakeProvider};
use thiserror::Error;

use crate::deploy_fixtures::{plan, provider};

#[derive(Clone, Debug)]
pub struct DeployContext {
    pub provider: FakeProvider,
    pub probe: FakeProbe,
    pub archive: FakeArchive,
    pub plan: DeploymentPlan,
    pub outcome: Option<DeploymentOutcome>,
}

#[derive(Debug, Error)]
pub enum DeployTestError {
    #[error(transparent)]
    Plan(#[from] PlanError),
}

pub type DeployContextResult = Result<DeployContext, DeployTestError>;

#[fixture]
pub fn deploy_context_result() -> DeployContextResult {
    let plan = plan();
    plan.validate()?;
    Ok(DeployContext {
        provider: provider(),
        probe: FakeProbe::new([]),
        archive: FakeArchive::new(),
        plan,
        outcome: None,
    })
}

#[fixture]
pub fn deploy_context(deploy_context_result: DeployContextResult) -> DeployContext {
    deploy_context_result
        .unwrap_or_else(|err| panic!("deploy context fixture should initialise: {err}"))
}
