//! Blue-green deployment state machine.
//!
//! A run discovers the instance currently serving the stack, provisions a
//! replacement from the snapshot, waits for it to boot and for the
//! application to answer, moves the floating IP, and only then retires the
//! previous instance. The previous instance is never destroyed before the
//! floating IP assignment action has completed.

use std::time::Duration;

use tracing::{info, warn};

use crate::archive::LogArchive;
use crate::health::{HealthChecker, HealthProbe, health_url};
use crate::poll::CancelToken;
use crate::provider::{AwaitError, Instance, InstanceId, Provider, await_action};
use crate::report::RunReport;

mod error;
mod outcome;
mod plan;
mod state;

pub use error::{DeployError, ErrorKind};
pub use outcome::{DeploymentOutcome, Failure};
pub use plan::{DeploymentPlan, PlanError};
pub use state::DeployState;

/// Drives a single deployment through [`DeployState`].
#[derive(Debug)]
pub struct DeploymentOrchestrator<P, H, A> {
    provider: P,
    health: HealthChecker<H>,
    archiver: A,
    cancel: CancelToken,
}

impl<P, H, A> DeploymentOrchestrator<P, H, A>
where
    P: Provider,
    H: HealthProbe,
    A: LogArchive,
{
    /// Creates an orchestrator with its own cancellation token.
    #[must_use]
    pub fn new(provider: P, probe: H, archiver: A) -> Self {
        Self {
            provider,
            health: HealthChecker::new(probe),
            archiver,
            cancel: CancelToken::new(),
        }
    }

    /// Replaces the cancellation token, typically with one wired to Ctrl-C.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Borrows the provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Borrows the cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Runs the deployment to completion and reports what happened.
    ///
    /// Failures do not surface as `Err`: the outcome carries the abort
    /// reason, the states visited, and any diagnostics recorded on the way.
    pub async fn execute(&self, plan: &DeploymentPlan) -> DeploymentOutcome {
        let mut run = RunState::new();
        let result = self.drive(plan, &mut run).await;
        run.finish(result)
    }

    async fn drive(
        &self,
        plan: &DeploymentPlan,
        run: &mut RunState,
    ) -> Result<(), DeployError<P::Error>> {
        let previous = self.discover(plan, run).await?;

        self.advance(run, DeployState::Provision)?;
        let created = self.provision(plan).await?;
        run.report.info(
            DeployState::Provision,
            format!("created {} ({})", created.name, created.id),
        );
        run.new_instance = Some(created.clone());

        self.advance(run, DeployState::AwaitBoot)?;
        self.await_boot(plan, &created, run).await?;

        self.advance(run, DeployState::AwaitAppHealthy)?;
        self.await_app_healthy(plan, &created, run).await?;

        self.advance(run, DeployState::Cutover)?;
        self.cutover(plan, &created).await?;
        run.report.info(
            DeployState::Cutover,
            format!("{} now routes to {}", plan.floating_ip, created.name),
        );

        if let Some(old) = previous {
            self.advance(run, DeployState::RetireOld)?;
            self.retire(plan, &old, run).await?;
        }
        Ok(())
    }

    fn advance(&self, run: &mut RunState, next: DeployState) -> Result<(), DeployError<P::Error>> {
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled {
                state: run.current(),
            });
        }
        run.enter(next);
        Ok(())
    }

    async fn discover(
        &self,
        plan: &DeploymentPlan,
        run: &mut RunState,
    ) -> Result<Option<Instance>, DeployError<P::Error>> {
        let mut matches = self
            .provider
            .list_instances_by_prefix(&plan.name_prefix)
            .await
            .map_err(provider_error(DeployState::Discover, "list_instances_by_prefix"))?;
        if matches.len() > 1 {
            return Err(DeployError::DiscoveryAmbiguous {
                prefix: plan.name_prefix.clone(),
                names: matches.into_iter().map(|instance| instance.name).collect(),
            });
        }
        let previous = matches.pop();
        match &previous {
            Some(old) => run.report.info(
                DeployState::Discover,
                format!("current instance is {} ({})", old.name, old.id),
            ),
            None => run.report.info(
                DeployState::Discover,
                format!("no instance matches {}; nothing to retire", plan.name_prefix),
            ),
        }
        Ok(previous)
    }

    async fn provision(&self, plan: &DeploymentPlan) -> Result<Instance, DeployError<P::Error>> {
        let image = self
            .provider
            .resolve_image_id(&plan.snapshot_name)
            .await
            .map_err(provider_error(DeployState::Provision, "resolve_image_id"))?;
        let ssh_keys = if plan.install_account_ssh_keys {
            self.provider
                .list_ssh_key_ids()
                .await
                .map_err(provider_error(DeployState::Provision, "list_ssh_key_ids"))?
        } else {
            Vec::new()
        };
        info!(name = %plan.instance_name, %image, keys = ssh_keys.len(), "creating instance");
        let request = plan.create_request(image, ssh_keys);
        self.provider
            .create_instance(&request)
            .await
            .map_err(provider_error(DeployState::Provision, "create_instance"))
    }

    async fn await_boot(
        &self,
        plan: &DeploymentPlan,
        created: &Instance,
        run: &mut RunState,
    ) -> Result<(), DeployError<P::Error>> {
        let action = self
            .provider
            .latest_action(created)
            .await
            .map_err(provider_error(DeployState::AwaitBoot, "latest_action"))?;
        match await_action(&self.provider, &action, &plan.boot_policy, &self.cancel).await {
            Ok(done) => {
                run.report.info(
                    DeployState::AwaitBoot,
                    format!("boot action {} completed", done.id),
                );
                Ok(())
            }
            Err(source) => {
                if matches!(source, AwaitError::TimedOut { .. }) {
                    self.discard_unbooted(plan, created, run).await;
                }
                Err(DeployError::Action {
                    state: DeployState::AwaitBoot,
                    source,
                })
            }
        }
    }

    async fn discard_unbooted(&self, plan: &DeploymentPlan, created: &Instance, run: &mut RunState) {
        warn!(instance = %created.name, "boot timed out; destroying unbooted instance");
        let result = match self.provider.destroy_instance(created).await {
            Ok(action) => {
                await_action(&self.provider, &action, &plan.action_policy, &self.cancel)
                    .await
                    .map(|_| ())
                    .map_err(|err| err.to_string())
            }
            Err(err) => Err(err.to_string()),
        };
        match result {
            Ok(()) => run.report.warning(
                DeployState::AwaitBoot,
                format!("destroyed unbooted instance {}", created.name),
            ),
            Err(message) => run.report.critical(
                DeployState::AwaitBoot,
                format!(
                    "failed to destroy unbooted instance {} ({}): {message}",
                    created.name, created.id
                ),
            ),
        }
    }

    async fn await_app_healthy(
        &self,
        plan: &DeploymentPlan,
        created: &Instance,
        run: &mut RunState,
    ) -> Result<(), DeployError<P::Error>> {
        let refreshed = self
            .provider
            .get_instance(&created.id)
            .await
            .map_err(provider_error(DeployState::AwaitAppHealthy, "get_instance"))?;
        let address =
            refreshed
                .public_ipv4()
                .ok_or_else(|| DeployError::MissingPublicAddress {
                    instance: refreshed.name.clone(),
                })?;
        let url = health_url(address, &plan.health_path);
        let report = self
            .health
            .poll_until_healthy(&url, &plan.health_policy, &self.cancel)
            .await?;
        run.report.info(
            DeployState::AwaitAppHealthy,
            format!("{url} healthy after {} probes", report.attempts),
        );
        Ok(())
    }

    async fn cutover(
        &self,
        plan: &DeploymentPlan,
        created: &Instance,
    ) -> Result<(), DeployError<P::Error>> {
        let action = self
            .provider
            .assign_floating_ip(plan.floating_ip, &created.id)
            .await
            .map_err(provider_error(DeployState::Cutover, "assign_floating_ip"))?;
        await_action(&self.provider, &action, &plan.action_policy, &self.cancel)
            .await
            .map_err(|source| DeployError::Action {
                state: DeployState::Cutover,
                source,
            })?;
        Ok(())
    }

    async fn retire(
        &self,
        plan: &DeploymentPlan,
        old: &Instance,
        run: &mut RunState,
    ) -> Result<(), DeployError<P::Error>> {
        self.drain(plan.drain_grace).await?;

        match self.archiver.archive(old, &plan.remote_log_paths) {
            Ok(receipt) => run.report.info(
                DeployState::RetireOld,
                format!(
                    "archived logs of {} as {} ({} bytes)",
                    old.name, receipt.key, receipt.size
                ),
            ),
            Err(err) => run.report.warning(
                DeployState::RetireOld,
                format!("RetirementWarning: logs of {} not archived: {err}", old.name),
            ),
        }

        let action = self
            .provider
            .destroy_instance(old)
            .await
            .map_err(provider_error(DeployState::RetireOld, "destroy_instance"))?;
        await_action(&self.provider, &action, &plan.action_policy, &self.cancel)
            .await
            .map_err(|source| DeployError::Action {
                state: DeployState::RetireOld,
                source,
            })?;
        run.replaced = Some(old.id.clone());
        run.report.info(
            DeployState::RetireOld,
            format!("destroyed {} ({})", old.name, old.id),
        );
        Ok(())
    }

    async fn drain(&self, grace: Duration) -> Result<(), DeployError<P::Error>> {
        if grace.is_zero() {
            return Ok(());
        }
        info!(seconds = grace.as_secs(), "draining previous instance");
        tokio::select! {
            () = tokio::time::sleep(grace) => Ok(()),
            () = self.cancel.cancelled() => Err(DeployError::Cancelled {
                state: DeployState::RetireOld,
            }),
        }
    }
}

fn provider_error<E>(
    state: DeployState,
    operation: &'static str,
) -> impl FnOnce(E) -> DeployError<E>
where
    E: std::error::Error + 'static,
{
    move |source| DeployError::Provider {
        state,
        operation,
        source,
    }
}

/// Mutable bookkeeping for one run.
struct RunState {
    states: Vec<DeployState>,
    report: RunReport,
    new_instance: Option<Instance>,
    replaced: Option<InstanceId>,
}

impl RunState {
    fn new() -> Self {
        info!(state = %DeployState::Discover, "deployment started");
        Self {
            states: vec![DeployState::Discover],
            report: RunReport::new(),
            new_instance: None,
            replaced: None,
        }
    }

    fn current(&self) -> DeployState {
        self.states.last().copied().unwrap_or(DeployState::Discover)
    }

    fn enter(&mut self, next: DeployState) {
        let current = self.current();
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current} -> {next}"
        );
        info!(from = %current, to = %next, "state transition");
        self.states.push(next);
    }

    fn finish<E>(mut self, result: Result<(), DeployError<E>>) -> DeploymentOutcome
    where
        E: std::error::Error + 'static,
    {
        let failure = match result {
            Ok(()) => {
                self.enter(DeployState::Done);
                None
            }
            Err(err) => {
                let message = err.to_string();
                self.report.error(err.state(), message.clone());
                self.enter(DeployState::Aborted);
                Some(Failure {
                    kind: err.kind(),
                    message,
                })
            }
        };
        DeploymentOutcome {
            success: failure.is_none(),
            new_instance_id: self.new_instance.as_ref().map(|instance| instance.id.clone()),
            new_instance_name: self.new_instance.map(|instance| instance.name),
            replaced_instance_id: self.replaced,
            states: self.states,
            failure,
            report: self.report,
        }
    }
}
