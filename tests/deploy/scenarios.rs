//! BDD scenarios for the deploy workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{DeployContext, deploy_context};

#[scenario(
    path = "tests/features/deploy.feature",
    name = "Replace the running instance"
)]
fn scenario_replace_running_instance(deploy_context: DeployContext) {
    drop(deploy_context);
}

#[scenario(
    path = "tests/features/deploy.feature",
    name = "First deployment has nothing to retire"
)]
fn scenario_first_deployment(deploy_context: DeployContext) {
    drop(deploy_context);
}

#[scenario(
    path = "tests/features/deploy.feature",
    name = "Refuse to choose between two running instances"
)]
fn scenario_ambiguous_discovery(deploy_context: DeployContext) {
    drop(deploy_context);
}

#[scenario(
    path = "tests/features/deploy.feature",
    name = "Keep the old instance when cutover fails"
)]
fn scenario_cutover_failure(deploy_context: DeployContext) {
    drop(deploy_context);
}

#[scenario(
    path = "tests/features/deploy.feature",
    name = "Finish retirement when logs cannot be archived"
)]
fn scenario_archive_failure(deploy_context: DeployContext) {
    drop(deploy_context);
}

#[scenario(
    path = "tests/features/deploy.feature",
    name = "Discard an instance that never boots"
)]
fn scenario_boot_timeout(deploy_context: DeployContext) {
    drop(deploy_context);
}
