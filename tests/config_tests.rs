//! Unit tests for configuration loading and validation.

use std::time::Duration;

use rstest::*;
use stackswap::config::{ConfigError, DEFAULT_NAME_PREFIX, DeployConfig, DigitalOceanConfig};
use stackswap::poll::PollPolicy;
use stackswap::test_support::EnvGuard;

#[fixture]
fn provider_config() -> DigitalOceanConfig {
    DigitalOceanConfig {
        token: String::from("dop_v1_example"),
        region: String::from("sgp1"),
        size: String::from("s-1vcpu-1gb"),
        snapshot_name: String::from("stack-base"),
        floating_ip: String::from("203.0.113.50"),
        tags: String::from("stack, web ,"),
        monitoring: None,
        private_networking: None,
        backups: None,
        install_account_ssh_keys: None,
        api_base: String::from("https://api.digitalocean.com/v2"),
    }
}

#[fixture]
fn deploy_config() -> DeployConfig {
    DeployConfig {
        name_prefix: String::from(DEFAULT_NAME_PREFIX),
        template_path: String::from("cloud-config.yaml"),
        secret_blocks: String::new(),
        release: Some(String::from("abc1234")),
        github_repo: None,
        github_branch: String::from("master"),
        github_token: None,
        health_path: String::from("/"),
        health_interval_secs: 5,
        health_probe_timeout_secs: 5,
        health_max_attempts: None,
        health_max_wait_secs: None,
        boot_poll_interval_secs: 1,
        boot_max_wait_secs: 600,
        action_poll_interval_secs: 1,
        action_max_wait_secs: 300,
        drain_grace_secs: 5,
    }
}

#[rstest]
fn valid_provider_config_passes(provider_config: DigitalOceanConfig) {
    provider_config
        .validate()
        .unwrap_or_else(|err| panic!("valid config: {err}"));
    assert_eq!(provider_config.tag_list(), vec!["stack", "web"]);
}

#[rstest]
#[case::token(|cfg: &mut DigitalOceanConfig| cfg.token.clear(), "DIGITALOCEAN_TOKEN", "token")]
#[case::snapshot(
    |cfg: &mut DigitalOceanConfig| cfg.snapshot_name.clear(),
    "DIGITALOCEAN_SNAPSHOT_NAME",
    "snapshot_name"
)]
#[case::floating_ip(
    |cfg: &mut DigitalOceanConfig| cfg.floating_ip = String::from("  "),
    "DIGITALOCEAN_FLOATING_IP",
    "floating_ip"
)]
#[case::region(|cfg: &mut DigitalOceanConfig| cfg.region.clear(), "DIGITALOCEAN_REGION", "region")]
#[case::size(|cfg: &mut DigitalOceanConfig| cfg.size.clear(), "DIGITALOCEAN_SIZE", "size")]
fn missing_provider_fields_are_actionable(
    provider_config: DigitalOceanConfig,
    #[case] mutate: fn(&mut DigitalOceanConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = provider_config;
    mutate(&mut cfg);
    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(message.contains(env_var), "should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "should mention {toml_key}: {message}");
    assert!(
        message.contains("stackswap.toml"),
        "should mention config file: {message}"
    );
}

#[rstest]
fn malformed_floating_ip_is_rejected(provider_config: DigitalOceanConfig) {
    let cfg = DigitalOceanConfig {
        floating_ip: String::from("203.0.113"),
        ..provider_config
    };
    let error = cfg.validate().expect_err("floating IP must parse");
    assert!(matches!(
        error,
        ConfigError::InvalidValue {
            field: "floating_ip",
            ..
        }
    ));
}

#[rstest]
fn release_or_repository_is_required(deploy_config: DeployConfig) {
    let cfg = DeployConfig {
        release: None,
        ..deploy_config.clone()
    };
    let message = cfg.validate().expect_err("release source required").to_string();
    assert!(message.contains("STACKSWAP_GITHUB_REPO"), "{message}");

    let with_repo = DeployConfig {
        release: None,
        github_repo: Some(String::from("example/stack")),
        ..deploy_config
    };
    with_repo
        .validate()
        .unwrap_or_else(|err| panic!("repository is a release source: {err}"));
}

#[rstest]
#[case::relative_health_path(|cfg: &mut DeployConfig| cfg.health_path = String::from("healthz"), "health_path")]
#[case::zero_interval(|cfg: &mut DeployConfig| cfg.health_interval_secs = 0, "health_interval_secs")]
#[case::zero_timeout(|cfg: &mut DeployConfig| cfg.health_probe_timeout_secs = 0, "health_probe_timeout_secs")]
#[case::zero_attempts(|cfg: &mut DeployConfig| cfg.health_max_attempts = Some(0), "health_max_attempts")]
#[case::zero_wait(|cfg: &mut DeployConfig| cfg.health_max_wait_secs = Some(0), "health_max_wait_secs")]
#[case::zero_boot_poll(|cfg: &mut DeployConfig| cfg.boot_poll_interval_secs = 0, "boot_poll_interval_secs")]
fn invalid_deploy_values_name_the_field(
    deploy_config: DeployConfig,
    #[case] mutate: fn(&mut DeployConfig),
    #[case] expected: &str,
) {
    let mut cfg = deploy_config;
    mutate(&mut cfg);
    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::InvalidValue { field, .. } = error else {
        panic!("expected InvalidValue, got {error:?}");
    };
    assert_eq!(field, expected);
}

#[rstest]
fn polling_policies_follow_configuration(deploy_config: DeployConfig) {
    assert_eq!(
        deploy_config.health_policy(),
        PollPolicy::unbounded(Duration::from_secs(5))
    );
    assert_eq!(
        deploy_config.boot_policy(),
        PollPolicy::bounded(Duration::from_secs(1), Duration::from_secs(600))
    );

    let cfg = DeployConfig {
        health_max_attempts: Some(12),
        health_max_wait_secs: Some(60),
        action_max_wait_secs: 0,
        ..deploy_config
    };
    assert_eq!(
        cfg.health_policy(),
        PollPolicy::bounded(Duration::from_secs(5), Duration::from_secs(60)).with_max_attempts(12)
    );
    assert_eq!(
        cfg.action_policy(),
        PollPolicy::unbounded(Duration::from_secs(1))
    );
}

#[tokio::test]
async fn environment_values_layer_over_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("STACKSWAP_CONFIG_PATH", None),
        ("DIGITALOCEAN_TOKEN", Some("dop_v1_from_env")),
        ("DIGITALOCEAN_SNAPSHOT_NAME", Some("stack-base")),
        ("DIGITALOCEAN_FLOATING_IP", Some("203.0.113.50")),
        ("DIGITALOCEAN_REGION", Some("ams3")),
        ("DIGITALOCEAN_SIZE", None),
        ("DIGITALOCEAN_TAGS", None),
        ("DIGITALOCEAN_MONITORING", None),
        ("DIGITALOCEAN_PRIVATE_NETWORKING", None),
        ("DIGITALOCEAN_BACKUPS", None),
        ("DIGITALOCEAN_INSTALL_ACCOUNT_SSH_KEYS", None),
    ])
    .await;

    let cfg = DigitalOceanConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("load from env: {err}"));

    assert_eq!(cfg.token, "dop_v1_from_env");
    assert_eq!(cfg.region, "ams3");
    assert_eq!(cfg.size, "s-1vcpu-1gb");
    assert_eq!(cfg.tag_list(), vec!["stack"]);
    assert!(cfg.installs_account_ssh_keys());
    assert!(cfg.monitoring_enabled());
    assert!(cfg.private_networking_enabled());
    assert!(!cfg.backups_enabled());
    cfg.validate()
        .unwrap_or_else(|err| panic!("env config validates: {err}"));
}

#[tokio::test]
async fn droplet_flags_can_be_switched_from_the_environment() {
    let _guard = EnvGuard::set_vars(&[
        ("STACKSWAP_CONFIG_PATH", None),
        ("DIGITALOCEAN_TOKEN", Some("dop_v1_from_env")),
        ("DIGITALOCEAN_SNAPSHOT_NAME", Some("stack-base")),
        ("DIGITALOCEAN_FLOATING_IP", Some("203.0.113.50")),
        ("DIGITALOCEAN_MONITORING", Some("false")),
        ("DIGITALOCEAN_PRIVATE_NETWORKING", None),
        ("DIGITALOCEAN_BACKUPS", Some("true")),
        ("DIGITALOCEAN_INSTALL_ACCOUNT_SSH_KEYS", Some("false")),
    ])
    .await;

    let cfg = DigitalOceanConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("load from env: {err}"));

    assert!(!cfg.monitoring_enabled());
    assert!(cfg.private_networking_enabled());
    assert!(cfg.backups_enabled());
    assert!(!cfg.installs_account_ssh_keys());
}

#[tokio::test]
async fn deploy_defaults_apply_without_overrides() {
    let _guard = EnvGuard::set_vars(&[
        ("STACKSWAP_CONFIG_PATH", None),
        ("STACKSWAP_NAME_PREFIX", None),
        ("STACKSWAP_HEALTH_INTERVAL_SECS", None),
        ("STACKSWAP_BOOT_MAX_WAIT_SECS", None),
        ("STACKSWAP_GITHUB_REPO", Some("example/stack")),
    ])
    .await;

    let cfg =
        DeployConfig::load_without_cli_args().unwrap_or_else(|err| panic!("load defaults: {err}"));

    assert_eq!(cfg.name_prefix, DEFAULT_NAME_PREFIX);
    assert_eq!(cfg.health_interval_secs, 5);
    assert_eq!(cfg.boot_max_wait_secs, 600);
    assert_eq!(cfg.github_repo.as_deref(), Some("example/stack"));
    assert_eq!(cfg.drain_grace(), Duration::from_secs(5));
}
