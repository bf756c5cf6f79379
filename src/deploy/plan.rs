//! Immutable per-run deployment inputs.

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

use crate::archive::ArchiveConfig;
use crate::config::{ConfigError, DeployConfig, DigitalOceanConfig};
use crate::poll::PollPolicy;
use crate::provider::{CreateInstanceRequest, ImageId};
use crate::release::{ReleaseId, instance_name};

/// Everything a single deployment needs, resolved before the run starts.
#[derive(Clone, Debug, Eq, PartialEq)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "droplet creation flags map one-to-one onto provider booleans"
)]
pub struct DeploymentPlan {
    /// Name given to the new instance.
    pub instance_name: String,
    /// Prefix shared by every instance of the stack.
    pub name_prefix: String,
    /// Snapshot the new instance boots from.
    pub snapshot_name: String,
    /// Region slug.
    pub region: String,
    /// Size slug.
    pub size: String,
    /// Tags applied to the new instance.
    pub tags: Vec<String>,
    /// Install every account SSH key on the new instance.
    pub install_account_ssh_keys: bool,
    /// Enables provider monitoring.
    pub monitoring: bool,
    /// Attaches a private network interface.
    pub private_networking: bool,
    /// Enables provider backups.
    pub backups: bool,
    /// Rendered bootstrap payload.
    pub user_data: String,
    /// Path probed on the new instance.
    pub health_path: String,
    /// Polling bound for health probes.
    pub health_policy: PollPolicy,
    /// Polling bound for the boot action.
    pub boot_policy: PollPolicy,
    /// Polling bound for floating IP and destroy actions.
    pub action_policy: PollPolicy,
    /// Address moved to the new instance at cutover.
    pub floating_ip: IpAddr,
    /// Pause before the previous instance's logs are collected.
    pub drain_grace: Duration,
    /// Paths copied off the previous instance before it is destroyed.
    pub remote_log_paths: Vec<String>,
}

/// Errors raised while assembling a [`DeploymentPlan`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum PlanError {
    /// A configuration layer failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A plan field is empty or inconsistent.
    #[error("invalid deployment plan: {0}")]
    Validation(String),
}

impl DeploymentPlan {
    /// Builds a plan from validated configuration, the release being
    /// deployed and the rendered bootstrap payload.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Config`] when a configuration layer is invalid
    /// and [`PlanError::Validation`] when the resulting plan is unusable.
    pub fn from_config(
        provider: &DigitalOceanConfig,
        deploy: &DeployConfig,
        archive: &ArchiveConfig,
        release: &ReleaseId,
        user_data: String,
    ) -> Result<Self, PlanError> {
        provider.validate()?;
        deploy.validate()?;
        let plan = Self {
            instance_name: instance_name(&deploy.name_prefix, release),
            name_prefix: deploy.name_prefix.clone(),
            snapshot_name: provider.snapshot_name.trim().to_owned(),
            region: provider.region.trim().to_owned(),
            size: provider.size.trim().to_owned(),
            tags: provider.tag_list(),
            install_account_ssh_keys: provider.installs_account_ssh_keys(),
            monitoring: provider.monitoring_enabled(),
            private_networking: provider.private_networking_enabled(),
            backups: provider.backups_enabled(),
            user_data,
            health_path: deploy.health_path.clone(),
            health_policy: deploy.health_policy(),
            boot_policy: deploy.boot_policy(),
            action_policy: deploy.action_policy(),
            floating_ip: provider.floating_ip_addr()?,
            drain_grace: deploy.drain_grace(),
            remote_log_paths: archive.remote_path_list(),
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Checks the invariants the orchestrator relies on.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), PlanError> {
        let required = [
            ("name_prefix", &self.name_prefix),
            ("instance_name", &self.instance_name),
            ("snapshot_name", &self.snapshot_name),
            ("region", &self.region),
            ("size", &self.size),
            ("user_data", &self.user_data),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(PlanError::Validation(format!("{field} must not be empty")));
        }
        if !self.instance_name.starts_with(&self.name_prefix) {
            return Err(PlanError::Validation(format!(
                "instance name {} does not start with prefix {}",
                self.instance_name, self.name_prefix
            )));
        }
        if !self.health_path.starts_with('/') {
            return Err(PlanError::Validation(
                "health_path must start with '/'".to_owned(),
            ));
        }
        Ok(())
    }

    /// Request used to create the new instance.
    #[must_use]
    pub fn create_request(&self, image: ImageId, ssh_keys: Vec<String>) -> CreateInstanceRequest {
        CreateInstanceRequest {
            name: self.instance_name.clone(),
            region: self.region.clone(),
            size: self.size.clone(),
            image,
            ssh_keys,
            tags: self.tags.clone(),
            user_data: self.user_data.clone(),
            monitoring: self.monitoring,
            private_networking: self.private_networking,
            backups: self.backups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn provider() -> DigitalOceanConfig {
        DigitalOceanConfig {
            token: "dop_v1_example".to_owned(),
            region: "sgp1".to_owned(),
            size: "s-1vcpu-1gb".to_owned(),
            snapshot_name: " stack-base ".to_owned(),
            floating_ip: "203.0.113.50".to_owned(),
            tags: "stack, web".to_owned(),
            monitoring: None,
            private_networking: None,
            backups: None,
            install_account_ssh_keys: None,
            api_base: crate::config::DEFAULT_API_BASE.to_owned(),
        }
    }

    #[fixture]
    fn deploy() -> DeployConfig {
        DeployConfig {
            name_prefix: "stack-a-".to_owned(),
            template_path: "cloud-config.yaml".to_owned(),
            secret_blocks: String::new(),
            release: Some("0123456789abcdef".to_owned()),
            github_repo: None,
            github_branch: "master".to_owned(),
            github_token: None,
            health_path: "/healthz".to_owned(),
            health_interval_secs: 5,
            health_probe_timeout_secs: 5,
            health_max_attempts: Some(12),
            health_max_wait_secs: None,
            boot_poll_interval_secs: 1,
            boot_max_wait_secs: 600,
            action_poll_interval_secs: 1,
            action_max_wait_secs: 0,
            drain_grace_secs: 5,
        }
    }

    fn archive() -> ArchiveConfig {
        ArchiveConfig {
            scp_bin: "scp".to_owned(),
            ssh_user: "root".to_owned(),
            ssh_identity_file: "secrets/deploy_key".to_owned(),
            remote_paths: "/var/log/cloud-init.log".to_owned(),
            staging_dir: "logs".to_owned(),
            bundle_prefix: "stack-a".to_owned(),
            key_prefix: "stack-logs".to_owned(),
            aws_bin: "aws".to_owned(),
            bucket: "logs".to_owned(),
        }
    }

    fn release() -> ReleaseId {
        ReleaseId::parse("0123456789abcdef").unwrap_or_else(|err| panic!("release: {err}"))
    }

    #[rstest]
    fn builds_a_plan_from_configuration(provider: DigitalOceanConfig, deploy: DeployConfig) {
        let plan = DeploymentPlan::from_config(
            &provider,
            &deploy,
            &archive(),
            &release(),
            "#cloud-config\n".to_owned(),
        )
        .unwrap_or_else(|err| panic!("plan: {err}"));

        assert_eq!(plan.instance_name, "stack-a-0123456");
        assert_eq!(plan.snapshot_name, "stack-base");
        assert_eq!(plan.tags, vec!["stack", "web"]);
        assert_eq!(plan.floating_ip, IpAddr::from([203, 0, 113, 50]));
        assert_eq!(plan.health_policy.max_attempts, Some(12));
        assert_eq!(plan.action_policy.max_wait, None);
        assert_eq!(plan.boot_policy.max_wait, Some(Duration::from_secs(600)));
        assert_eq!(plan.remote_log_paths, vec!["/var/log/cloud-init.log"]);
    }

    #[rstest]
    fn rejects_an_invalid_floating_ip(provider: DigitalOceanConfig, deploy: DeployConfig) {
        let bad = DigitalOceanConfig {
            floating_ip: "not-an-ip".to_owned(),
            ..provider
        };
        let err = DeploymentPlan::from_config(&bad, &deploy, &archive(), &release(), "x".to_owned())
            .expect_err("invalid ip");
        assert!(matches!(
            err,
            PlanError::Config(ConfigError::InvalidValue {
                field: "floating_ip",
                ..
            })
        ));
    }

    #[rstest]
    fn rejects_an_empty_payload(provider: DigitalOceanConfig, deploy: DeployConfig) {
        let err =
            DeploymentPlan::from_config(&provider, &deploy, &archive(), &release(), "  ".to_owned())
                .expect_err("payload required");
        assert_eq!(
            err,
            PlanError::Validation("user_data must not be empty".to_owned())
        );
    }

    #[rstest]
    fn create_request_carries_the_plan_shape(provider: DigitalOceanConfig, deploy: DeployConfig) {
        let plan = DeploymentPlan::from_config(
            &provider,
            &deploy,
            &archive(),
            &release(),
            "#cloud-config\n".to_owned(),
        )
        .unwrap_or_else(|err| panic!("plan: {err}"));
        let request = plan.create_request(ImageId::new("42"), vec!["aa:bb".to_owned()]);
        assert_eq!(request.name, "stack-a-0123456");
        assert_eq!(request.image, ImageId::new("42"));
        assert_eq!(request.ssh_keys, vec!["aa:bb"]);
        assert!(request.monitoring);
        assert!(!request.backups);
    }
}
