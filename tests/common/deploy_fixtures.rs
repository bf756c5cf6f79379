//! Shared deployment plan and provider fixtures.

use std::net::IpAddr;
use std::time::Duration;

use stackswap::deploy::DeploymentPlan;
use stackswap::poll::PollPolicy;
use stackswap::test_support::FakeProvider;

pub const PREFIX: &str = "stack-a-";
pub const NEW_NAME: &str = "stack-a-abc1234";
pub const SNAPSHOT: &str = "stack-base";
pub const FLOATING_IP: [u8; 4] = [203, 0, 113, 50];

/// Plan with one-second polls, bounded action waits and a short drain.
pub fn plan() -> DeploymentPlan {
    DeploymentPlan {
        instance_name: NEW_NAME.to_owned(),
        name_prefix: PREFIX.to_owned(),
        snapshot_name: SNAPSHOT.to_owned(),
        region: "sgp1".to_owned(),
        size: "s-1vcpu-1gb".to_owned(),
        tags: vec!["stack".to_owned()],
        install_account_ssh_keys: true,
        monitoring: true,
        private_networking: true,
        backups: false,
        user_data: "#cloud-config\n".to_owned(),
        health_path: "/".to_owned(),
        health_policy: PollPolicy::unbounded(Duration::from_secs(5)),
        boot_policy: PollPolicy::bounded(Duration::from_secs(1), Duration::from_secs(30)),
        action_policy: PollPolicy::bounded(Duration::from_secs(1), Duration::from_secs(30)),
        floating_ip: IpAddr::from(FLOATING_IP),
        drain_grace: Duration::from_secs(2),
        remote_log_paths: vec!["/var/log/cloud-init.log".to_owned()],
    }
}

/// Provider holding the snapshot and one account SSH key.
pub fn provider() -> FakeProvider {
    let provider = FakeProvider::new();
    provider.add_image(SNAPSHOT, "9001");
    provider.set_ssh_keys(&["aa:bb:cc"]);
    provider
}
