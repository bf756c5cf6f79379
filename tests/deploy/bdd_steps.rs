//! BDD step definitions for the deploy workflow.

use stackswap::deploy::DeploymentOrchestrator;
use stackswap::health::ProbeOutcome;
use stackswap::provider::{ActionKind, ActionStatus, InstanceId};
use stackswap::report::Severity;
use stackswap::test_support::{FakeArchive, FakeProbe, ProviderCall};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Builder;

use super::test_helpers::{DeployContext, DeployTestError};
use crate::deploy_fixtures::PREFIX;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] DeployTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("no running instance")]
fn no_running_instance(deploy_context: DeployContext) -> DeployContext {
    deploy_context
}

#[given("a running instance named \"{name}\"")]
fn running_instance(deploy_context: DeployContext, name: String) -> DeployContext {
    let _instance = deploy_context.provider.add_instance(&name);
    deploy_context
}

#[given("the application answers after \"{failures}\" failed probes")]
fn application_answers_after(mut deploy_context: DeployContext, failures: usize) -> DeployContext {
    deploy_context.probe = FakeProbe::new(std::iter::repeat_n(ProbeOutcome::Status(502), failures));
    deploy_context
}

#[given("the floating IP assignment errors")]
fn assignment_errors(deploy_context: DeployContext) -> DeployContext {
    deploy_context
        .provider
        .script_action(ActionKind::AssignFloatingIp, [ActionStatus::Errored]);
    deploy_context
}

#[given("log archival fails")]
fn archival_fails(mut deploy_context: DeployContext) -> DeployContext {
    deploy_context.archive = FakeArchive::failing("connection refused");
    deploy_context
}

#[given("the boot action never completes")]
fn boot_never_completes(deploy_context: DeployContext) -> DeployContext {
    deploy_context.provider.hang_action(ActionKind::Create);
    deploy_context
}

#[when("I deploy release \"{sha}\"")]
fn deploy_release(deploy_context: DeployContext, sha: String) -> Result<DeployContext, StepError> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let DeployContext {
        provider,
        probe,
        archive,
        mut plan,
        ..
    } = deploy_context;
    plan.instance_name = format!("{PREFIX}{sha}");
    plan.validate().map_err(DeployTestError::from)?;

    let orchestrator = DeploymentOrchestrator::new(provider.clone(), probe.clone(), archive.clone());
    let outcome = runtime.block_on(orchestrator.execute(&plan));

    Ok(DeployContext {
        provider,
        probe,
        archive,
        plan,
        outcome: Some(outcome),
    })
}

#[then("the deployment succeeds")]
fn deployment_succeeds(deploy_context: &DeployContext) -> Result<(), StepError> {
    let outcome = deploy_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))?;
    if outcome.success && outcome.exit_code() == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected success, got:\n{outcome}"
        )))
    }
}

#[then("the deployment fails with \"{kind}\"")]
fn deployment_fails_with(deploy_context: &DeployContext, kind: String) -> Result<(), StepError> {
    let failure = deploy_context
        .outcome
        .as_ref()
        .and_then(|outcome| outcome.failure.as_ref())
        .ok_or_else(|| StepError::Assertion(String::from("expected failure outcome")))?;
    let actual = failure.kind.to_string();
    if actual == kind {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure kind {kind}, got {actual}: {}",
            failure.message
        )))
    }
}

#[then("the health endpoint was probed \"{count}\" times")]
fn probed_times(deploy_context: &DeployContext, count: usize) -> Result<(), StepError> {
    let actual = deploy_context.probe.probe_count();
    if actual == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} probes, got {actual}"
        )))
    }
}

#[then("the floating IP routes to \"{name}\"")]
fn floating_ip_routes_to(deploy_context: &DeployContext, name: String) -> Result<(), StepError> {
    let target = deploy_context.provider.floating_ip_target();
    if target == Some(InstanceId::new(name.as_str())) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected floating IP on {name}, got {target:?}"
        )))
    }
}

#[then("instance \"{name}\" is destroyed")]
fn instance_destroyed(deploy_context: &DeployContext, name: String) -> Result<(), StepError> {
    let id = InstanceId::new(name.as_str());
    let destroyed = deploy_context
        .provider
        .call_index(|call| *call == ProviderCall::Destroy(id.clone()))
        .is_some();
    let present = deploy_context
        .provider
        .instances()
        .iter()
        .any(|instance| instance.name == name);
    if destroyed && !present {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{name} should be destroyed")))
    }
}

#[then("instance \"{name}\" is still running")]
fn instance_still_running(deploy_context: &DeployContext, name: String) -> Result<(), StepError> {
    let present = deploy_context
        .provider
        .instances()
        .iter()
        .any(|instance| instance.name == name);
    if present {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{name} should still exist")))
    }
}

#[then("the replaced instance is \"{name}\"")]
fn replaced_instance_is(deploy_context: &DeployContext, name: String) -> Result<(), StepError> {
    let replaced = deploy_context
        .outcome
        .as_ref()
        .and_then(|outcome| outcome.replaced_instance_id.clone());
    if replaced == Some(InstanceId::new(name.as_str())) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {name} to be replaced, got {replaced:?}"
        )))
    }
}

#[then("the new instance is \"{name}\"")]
fn new_instance_is(deploy_context: &DeployContext, name: String) -> Result<(), StepError> {
    let created = deploy_context
        .outcome
        .as_ref()
        .and_then(|outcome| outcome.new_instance_id.clone());
    if created == Some(InstanceId::new(name.as_str())) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected new instance {name}, got {created:?}"
        )))
    }
}

#[then("logs of \"{name}\" are archived")]
fn logs_archived(deploy_context: &DeployContext, name: String) -> Result<(), StepError> {
    let archived = deploy_context.archive.archived();
    if archived.contains(&name) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected logs of {name} to be archived, got {archived:?}"
        )))
    }
}

#[then("no instance is replaced")]
fn nothing_replaced(deploy_context: &DeployContext) -> Result<(), StepError> {
    let replaced = deploy_context
        .outcome
        .as_ref()
        .and_then(|outcome| outcome.replaced_instance_id.as_ref());
    match replaced {
        None => Ok(()),
        Some(id) => Err(StepError::Assertion(format!(
            "nothing should be replaced, got {id}"
        ))),
    }
}

#[then("no instance is created")]
fn nothing_created(deploy_context: &DeployContext) -> Result<(), StepError> {
    let created = deploy_context
        .provider
        .call_index(|call| matches!(call, ProviderCall::Create { .. }));
    match created {
        None => Ok(()),
        Some(_) => Err(StepError::Assertion(String::from(
            "create_instance should not be called",
        ))),
    }
}

#[then("the report carries a retirement warning")]
fn retirement_warning(deploy_context: &DeployContext) -> Result<(), StepError> {
    let warned = deploy_context.outcome.as_ref().is_some_and(|outcome| {
        outcome.report.entries().iter().any(|entry| {
            entry.severity == Severity::Warning && entry.message.starts_with("RetirementWarning")
        })
    });
    if warned {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "expected a RetirementWarning diagnostic",
        )))
    }
}
